pub mod domain_name;
pub mod edns;
pub mod header;
pub mod record;

pub use domain_name::DomainName;
pub use edns::{ClientSubnet, EdnsFlags, EdnsOption, OPT_CLIENT_SUBNET};
pub use header::{HeaderFlags, HeaderSnapshot};
pub use record::{DnsRecord, RecordData, RecordPlace, RecordType, ResponseCode};

/// Transport a query travels over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

impl Transport {
    pub fn is_tcp(self) -> bool {
        self == Transport::Tcp
    }
}
