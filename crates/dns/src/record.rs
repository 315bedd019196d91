use std::fmt::{Display, Formatter};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::domain_name::DomainName;

/// DNS record types policy code deals with.
///
/// Wire values per https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-4
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum RecordType {
    /// IPv4
    A = 1,
    /// Name server
    NS = 2,
    /// Canonical name
    CNAME = 5,
    /// Start of authority
    SOA = 6,
    /// Pointer (reverse DNS)
    PTR = 12,
    /// Mail exchange
    MX = 15,
    /// Text strings
    TXT = 16,
    /// IPv6
    AAAA = 28,
    /// Service locator
    SRV = 33,
    /// Naming Authority Pointer
    NAPTR = 35,
    /// DNAME redirection
    DNAME = 39,
    /// OPT pseudo-record (EDNS)
    OPT = 41,
    /// Delegation Signer
    DS = 43,
    /// RRSIG
    RRSIG = 46,
    /// NSEC
    NSEC = 47,
    /// DNSKEY
    DNSKEY = 48,
    /// NSEC3
    NSEC3 = 50,
    /// General-purpose service binding
    SVCB = 64,
    /// SVCB-compatible type for HTTP
    HTTPS = 65,
    /// All records
    ANY = 255,
    /// Certification Authority Restriction
    CAA = 257,
}

impl RecordType {
    pub fn to_u16(self) -> u16 {
        self.into()
    }
}

/// DNS response codes.
///
/// Wire values per https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-6
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum ResponseCode {
    /// No error
    #[default]
    NoError = 0,
    /// Malformed request
    FormatError = 1,
    /// Server failure
    ServerFailure = 2,
    /// Non-existent domain
    NxDomain = 3,
    /// Not implemented
    NotImp = 4,
    /// Query refused
    Refused = 5,
    /// Name exists when it should not
    YXDomain = 6,
    /// RR set exists when it should not
    YXRRSet = 7,
    /// RR set that should exist does not
    NXRRSet = 8,
    /// Not authorized
    NotAuth = 9,
    /// Name not contained in zone
    NotZone = 10,
}

impl ResponseCode {
    pub fn to_u16(self) -> u16 {
        self.into()
    }
}

/// The message section a record is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum RecordPlace {
    Answer = 1,
    Authority = 2,
    Additional = 3,
}

/// Typed record content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Name(DomainName),
    Text(Arc<str>),
    Raw(Vec<u8>),
}

impl RecordData {
    /// Parse textual record content for the given type, the form policy
    /// callbacks supply ("192.0.2.1" for A, a domain name for CNAME, ...).
    /// Types without a textual form fall back to raw bytes.
    pub fn parse(rtype: RecordType, content: &str) -> anyhow::Result<Self> {
        Ok(match rtype {
            RecordType::A => {
                let addr: Ipv4Addr = content
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid A content: {}", content))?;
                RecordData::Ipv4(addr)
            }
            RecordType::AAAA => {
                let addr: Ipv6Addr = content
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid AAAA content: {}", content))?;
                RecordData::Ipv6(addr)
            }
            RecordType::CNAME | RecordType::NS | RecordType::PTR | RecordType::DNAME => {
                RecordData::Name(DomainName::from_ascii(content)?)
            }
            RecordType::TXT => RecordData::Text(content.into()),
            _ => RecordData::Raw(content.as_bytes().to_vec()),
        })
    }
}

impl Display for RecordData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordData::Ipv4(addr) => write!(f, "{}", addr),
            RecordData::Ipv6(addr) => write!(f, "{}", addr),
            RecordData::Name(name) => write!(f, "{}", name),
            RecordData::Text(text) => write!(f, "{}", text),
            RecordData::Raw(bytes) => write!(f, "<{} raw bytes>", bytes.len()),
        }
    }
}

/// A single record in the in-progress answer sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: DomainName,
    pub rtype: RecordType,
    pub ttl: u32,
    pub place: RecordPlace,
    pub data: RecordData,
}

impl DnsRecord {
    pub fn new(
        name: DomainName,
        rtype: RecordType,
        ttl: u32,
        place: RecordPlace,
        data: RecordData,
    ) -> Self {
        Self {
            name,
            rtype,
            ttl,
            place,
            data,
        }
    }

    /// Build an answer-section record from textual content.
    pub fn answer(name: DomainName, rtype: RecordType, ttl: u32, content: &str) -> anyhow::Result<Self> {
        Ok(Self {
            name,
            rtype,
            ttl,
            place: RecordPlace::Answer,
            data: RecordData::parse(rtype, content)?,
        })
    }
}
