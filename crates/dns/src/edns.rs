use std::fmt::{Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::Bytes;

/// EDNS option code for client subnet (RFC 7871).
pub const OPT_CLIENT_SUBNET: u16 = 8;

/// A single EDNS option as a code plus its raw value. The dispatch layer
/// hands options through untouched; only client subnet gets a typed view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdnsOption {
    pub code: u16,
    pub data: Bytes,
}

impl EdnsOption {
    pub fn new(code: u16, data: impl Into<Bytes>) -> Self {
        Self {
            code,
            data: data.into(),
        }
    }
}

bitflags::bitflags! {
    /// EDNS header flags (the OPT TTL low word).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EdnsFlags: u16 {
        /// DNSSEC OK
        const DO = 0x8000;
    }
}

impl EdnsFlags {
    /// The names of the flags that are set.
    pub fn names(self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.contains(EdnsFlags::DO) {
            out.push("DO");
        }
        out
    }

    /// Look a single flag up by name.
    pub fn by_name(name: &str) -> Option<EdnsFlags> {
        match name {
            "DO" => Some(EdnsFlags::DO),
            _ => None,
        }
    }
}

/// EDNS client subnet (RFC 7871) as carried in a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSubnet {
    pub addr: IpAddr,
    pub source_prefix: u8,
    pub scope_prefix: u8,
}

impl ClientSubnet {
    /// Parse the value of a client-subnet option.
    pub fn parse(data: &[u8]) -> anyhow::Result<Self> {
        anyhow::ensure!(data.len() >= 4, "ECS option too short: {} bytes", data.len());

        let family = u16::from_be_bytes([data[0], data[1]]);
        let source_prefix = data[2];
        let scope_prefix = data[3];
        let addr_bytes = &data[4..];

        let want = (source_prefix as usize).div_ceil(8);
        anyhow::ensure!(
            addr_bytes.len() >= want,
            "ECS address truncated: {} of {} bytes",
            addr_bytes.len(),
            want
        );

        let addr = match family {
            1 => {
                anyhow::ensure!(source_prefix <= 32, "ECS v4 prefix too long: {}", source_prefix);
                let mut octets = [0u8; 4];
                octets[..want].copy_from_slice(&addr_bytes[..want]);
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            2 => {
                anyhow::ensure!(source_prefix <= 128, "ECS v6 prefix too long: {}", source_prefix);
                let mut octets = [0u8; 16];
                octets[..want].copy_from_slice(&addr_bytes[..want]);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            other => anyhow::bail!("unsupported ECS address family: {}", other),
        };

        Ok(Self {
            addr,
            source_prefix,
            scope_prefix,
        })
    }
}

impl Display for ClientSubnet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.source_prefix)
    }
}
