// CIDR network prefixes as they appear in `to` / `from` fields

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// A network in CIDR notation, always stored in canonical form
/// (host bits cleared).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkPrefix {
    addr: IpAddr,
    len: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid CIDR address: {0}")]
pub struct PrefixParseError(pub String);

impl NetworkPrefix {
    pub fn new(addr: IpAddr, len: u8) -> Result<Self, PrefixParseError> {
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if len > max {
            return Err(PrefixParseError(format!("{}/{}", addr, len)));
        }

        let addr = match addr {
            IpAddr::V4(v4) => IpAddr::V4(mask_v4(v4, len)),
            IpAddr::V6(v6) => IpAddr::V6(mask_v6(v6, len)),
        };
        Ok(NetworkPrefix { addr, len })
    }

    /// Network (base) address
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn prefix_len(&self) -> u8 {
        self.len
    }

    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }
}

fn mask_v4(addr: Ipv4Addr, prefix_len: u8) -> Ipv4Addr {
    if prefix_len == 0 {
        return Ipv4Addr::UNSPECIFIED;
    }
    let mask = if prefix_len == 32 {
        0xFFFFFFFF
    } else {
        0xFFFFFFFFu32 << (32 - prefix_len)
    };
    Ipv4Addr::from(u32::from(addr) & mask)
}

fn mask_v6(addr: Ipv6Addr, prefix_len: u8) -> Ipv6Addr {
    if prefix_len == 0 {
        return Ipv6Addr::UNSPECIFIED;
    }
    let mask = if prefix_len == 128 {
        u128::MAX
    } else {
        u128::MAX << (128 - prefix_len)
    };
    Ipv6Addr::from(u128::from(addr) & mask)
}

impl FromStr for NetworkPrefix {
    type Err = PrefixParseError;

    // Both halves are mandatory: a bare address is not a network.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PrefixParseError(s.to_string());

        let (addr, len) = s.split_once('/').ok_or_else(invalid)?;
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        if len.is_empty() || !len.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let len: u8 = len.parse().map_err(|_| invalid())?;

        NetworkPrefix::new(addr, len).map_err(|_| invalid())
    }
}

impl fmt::Display for NetworkPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

impl Serialize for NetworkPrefix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NetworkPrefix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PrefixVisitor;

        impl Visitor<'_> for PrefixVisitor {
            type Value = NetworkPrefix;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a network in CIDR notation, e.g. 10.0.0.0/24")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_str(PrefixVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let prefix: NetworkPrefix = "10.0.0.0/24".parse().unwrap();
        assert_eq!(prefix.addr(), "10.0.0.0".parse::<IpAddr>().unwrap());
        assert_eq!(prefix.prefix_len(), 24);
        assert_eq!(prefix.to_string(), "10.0.0.0/24");
    }

    #[test]
    fn test_host_bits_are_masked() {
        let prefix: NetworkPrefix = "192.168.1.77/16".parse().unwrap();
        assert_eq!(prefix.to_string(), "192.168.0.0/16");

        let prefix: NetworkPrefix = "2001:db8::1/32".parse().unwrap();
        assert_eq!(prefix.to_string(), "2001:db8::/32");
    }

    #[test]
    fn test_reparse_is_same_network() {
        for s in ["0.0.0.0/0", "10.1.2.3/8", "172.16.5.4/32", "fd00::17/64", "::/0"] {
            let prefix: NetworkPrefix = s.parse().unwrap();
            let again: NetworkPrefix = prefix.to_string().parse().unwrap();
            assert_eq!(prefix, again, "{}", s);
        }
    }

    #[test]
    fn test_rejects_malformed() {
        for s in ["not-a-cidr", "10.0.0.0", "10.0.0.0/33", "10.0.0/8", "fd00::/129", "10.0.0.0/", "10.0.0.0/+8"] {
            assert!(s.parse::<NetworkPrefix>().is_err(), "{}", s);
        }
    }

    #[test]
    fn test_error_names_value() {
        let err = "bogus/8".parse::<NetworkPrefix>().unwrap_err();
        assert!(err.to_string().contains("bogus/8"));
    }
}
