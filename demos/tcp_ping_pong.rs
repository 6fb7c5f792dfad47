//! TCP client and server in one process.
//!
//! A server thread accepts one connection and prints every 4-byte message;
//! the client sends ten messages `[counter, 'S', 'O', 'S']`, one per second.
//!
//! Run with: cargo run --example tcp_ping_pong

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use bsw_rs::transport::{IpAddress, TcpClient, TcpServer};
use tracing_subscriber::EnvFilter;

const PORT: u16 = 5555;
const MESSAGES: u8 = 10;

fn server_thread(running: Arc<AtomicBool>, listening: mpsc::Sender<bsw_rs::Result<()>>) {
    let mut server = TcpServer::new();
    let started = server
        .reuse_addr()
        .and_then(|()| server.listen(IpAddress::ANY, PORT));
    let ok = started.is_ok();
    let _ = listening.send(started);
    if !ok {
        return;
    }

    if let Err(e) = server.accept() {
        eprintln!("Accept failed: {e}");
        return;
    }

    println!("Bytes received | msg counter | user data");
    let mut data = [0u8; 4];
    while running.load(Ordering::Acquire) {
        match server.data_mut().wait_readable(Duration::from_millis(100)) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                eprintln!("Wait failed: {e}");
                break;
            }
        }
        match server.data_mut().receive(&mut data) {
            Ok(0) => break,
            Ok(received) => println!(
                "{received} | {:x} | {}",
                data[0],
                String::from_utf8_lossy(&data[1..received])
            ),
            Err(e) => {
                eprintln!("Receive failed: {e}");
                break;
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let running = Arc::new(AtomicBool::new(true));
    let (tx, rx) = mpsc::channel();
    let server = {
        let running = Arc::clone(&running);
        thread::spawn(move || server_thread(running, tx))
    };

    // Do not connect before the server listens.
    rx.recv()??;

    let mut client = TcpClient::new();
    match client.connect(IpAddress::LOCALHOST, PORT) {
        Ok(()) => {
            println!("Connection established...");
            client.set_nodelay(true)?;
            for counter in 0..MESSAGES {
                if let Err(e) = client.send(&[counter, b'S', b'O', b'S']) {
                    eprintln!("Sending not possible: {e}");
                    break;
                }
                thread::sleep(Duration::from_secs(1));
            }
        }
        Err(e) => {
            eprintln!("Connection has not been established: {e}");
            eprintln!("Error: {}", client.socket().last_error());
        }
    }

    running.store(false, Ordering::Release);
    client.disconnect()?;
    server.join().map_err(|_| "server thread panicked")?;
    Ok(())
}
