use std::sync::Arc;

use waygate_dns::DnsRecord;

/// What the policy decided to do with the query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PolicyKind {
    /// Matched, but no action taken.
    #[default]
    NoAction,
    /// Drop the query without answering.
    Drop,
    /// Answer NXDOMAIN.
    Nxdomain,
    /// Answer NOERROR with no records.
    Nodata,
    /// Force the client onto TCP.
    Truncate,
    /// Answer with the given records.
    Custom(Vec<DnsRecord>),
}

/// The decision a rule-matching collaborator attached to a query.
/// Absent on the context means "no policy matched".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPolicy {
    /// Name of the policy zone or rule set that matched, if it has one.
    pub name: Option<Arc<str>>,
    pub kind: PolicyKind,
}

impl AppliedPolicy {
    pub fn new(kind: PolicyKind) -> Self {
        Self { name: None, kind }
    }

    pub fn named(name: impl Into<Arc<str>>, kind: PolicyKind) -> Self {
        Self {
            name: Some(name.into()),
            kind,
        }
    }
}
