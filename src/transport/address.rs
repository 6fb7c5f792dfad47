//! IPv4 addresses used by the TCP transport.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::BswError;
use crate::sys;

/// An IPv4 address stored in host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct IpAddress(u32);

impl IpAddress {
    /// `0.0.0.0`, bind on every interface.
    pub const ANY: Self = Self(0);

    /// `127.0.0.1`.
    pub const LOCALHOST: Self = Self(0x7F00_0001);

    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self(u32::from_be_bytes([a, b, c, d]))
    }

    pub const fn from_host_order(address: u32) -> Self {
        Self(address)
    }

    pub const fn to_host_order(self) -> u32 {
        self.0
    }

    pub const fn octets(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    pub(crate) fn to_sockaddr(self, port: u16) -> libc::sockaddr_in {
        sys::ipv4_sockaddr(self.0, port)
    }
}

impl FromStr for IpAddress {
    type Err = BswError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Ipv4Addr>()
            .map(Self::from)
            .map_err(|_| BswError::InvalidAddress(s.to_string()))
    }
}

impl TryFrom<&str> for IpAddress {
    type Error = BswError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Ipv4Addr> for IpAddress {
    fn from(addr: Ipv4Addr) -> Self {
        Self(u32::from(addr))
    }
}

impl From<IpAddress> for Ipv4Addr {
    fn from(addr: IpAddress) -> Self {
        Ipv4Addr::from(addr.0)
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Ipv4Addr::from(*self).fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let addr: IpAddress = "127.0.0.1".parse().unwrap();
        assert_eq!(addr, IpAddress::LOCALHOST);
        assert_eq!(addr.to_host_order(), 0x7F00_0001);
        assert_eq!(addr.octets(), [127, 0, 0, 1]);

        let addr = IpAddress::try_from("192.168.1.20").unwrap();
        assert_eq!(addr, IpAddress::new(192, 168, 1, 20));
    }

    #[test]
    fn test_parse_invalid() {
        for input in ["", "localhost", "256.0.0.1", "1.2.3", "1.2.3.4.5"] {
            let err = input.parse::<IpAddress>().unwrap_err();
            assert!(matches!(err, BswError::InvalidAddress(s) if s == input));
        }
    }

    #[test]
    fn test_display_and_conversion() {
        let addr = IpAddress::new(10, 0, 0, 7);
        assert_eq!(addr.to_string(), "10.0.0.7");
        assert_eq!(Ipv4Addr::from(addr), Ipv4Addr::new(10, 0, 0, 7));
        assert_eq!(IpAddress::from(Ipv4Addr::UNSPECIFIED), IpAddress::ANY);
    }

    #[test]
    fn test_sockaddr_network_order() {
        let sa = IpAddress::LOCALHOST.to_sockaddr(5555);
        assert_eq!(sa.sin_addr.s_addr.to_ne_bytes(), [127, 0, 0, 1]);
        assert_eq!(sa.sin_port.to_ne_bytes(), 5555u16.to_be_bytes());
    }
}
