//! Periodic CAN sender.
//!
//! Sends a two-byte frame with id 8 on `vcan0` once per second.
//!
//! Set up a virtual interface first:
//!
//! ```text
//! sudo ip link add dev vcan0 type vcan
//! sudo ip link set up vcan0
//! ```
//!
//! Run with: cargo run --example can_send [interface]
//! Watch with: candump vcan0

use std::thread;
use std::time::Duration;

use bsw_rs::transport::{CanConfig, CanId, CanSocket};
use tracing_subscriber::EnvFilter;

const FRAME_ID: u16 = 8;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let interface = std::env::args().nth(1).unwrap_or_else(|| "vcan0".to_string());
    let mut can = CanSocket::open(CanConfig::new(&interface).with_fd_frames(true))?;
    println!(
        "Sending on {interface} (CAN-FD: {}, frame size {} bytes)",
        can.is_fd_enabled(),
        can.mtu()
    );

    let mut counter: u8 = 0;
    loop {
        let payload = [counter, 0x01];
        match can.send(CanId::standard(FRAME_ID), &payload, payload.len()) {
            Ok(written) => println!("Sent id={FRAME_ID:#x} data={payload:02X?} ({written} bytes)"),
            Err(e) => {
                eprintln!("Sending CAN frame not possible: {e} (errno {})", can.last_error());
                return Err(e.into());
            }
        }
        counter = counter.wrapping_add(1);
        thread::sleep(Duration::from_secs(1));
    }
}
