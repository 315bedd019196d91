use std::fmt::{Display, Formatter};
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;

use idna::AsciiDenyList;

/// A domain name, stored lowercase so comparisons are case-insensitive.
/// The trailing dot is stripped on construction; the root name is kept as ".".
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct DomainName(Arc<str>);

impl DomainName {
    /// The root name ".".
    pub fn root() -> Self {
        Self(Arc::from("."))
    }

    /// Build a name from ASCII input, validated according to RFC 1035.
    ///
    /// NOTE: Unicode input must go through [`DomainName::from_user`] instead.
    pub fn from_ascii(s: impl AsRef<str>) -> anyhow::Result<Self> {
        let mut name: String = s.as_ref().trim().into();

        if name == "." || name.is_empty() {
            return Ok(Self::root());
        }

        if name.ends_with('.') {
            name.pop();
        }

        if name.len() > 255 {
            anyhow::bail!("domain name too long: {}", name);
        }

        for label in name.split('.') {
            if label.is_empty() {
                anyhow::bail!("empty label in domain name: {}", name);
            }
            if label.len() > 63 {
                anyhow::bail!("domain label too long: {}", label);
            }
            if !label.is_ascii() {
                anyhow::bail!("non-ascii byte in domain name: {}", name);
            }
        }

        name.make_ascii_lowercase();

        Ok(Self(Arc::from(name)))
    }

    /// Build a name from user input, converting Unicode to ASCII via IDNA first.
    pub fn from_user(s: impl AsRef<str>) -> anyhow::Result<Self> {
        let input = s.as_ref().trim();

        if input == "." || input.is_empty() {
            return Ok(Self::root());
        }

        let name = input.strip_suffix('.').unwrap_or(input);

        let ascii = idna::domain_to_ascii_cow(name.as_bytes(), AsciiDenyList::URL)
            .map_err(|_| anyhow::anyhow!("invalid IDNA domain: {}", input))?;

        Self::from_ascii(&ascii)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        &*self.0 == "."
    }

    /// Iterate the labels, most specific first. The root has no labels.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        let inner = if self.is_root() { "" } else { &*self.0 };
        inner.split('.').filter(|l| !l.is_empty())
    }

    /// The name with its leftmost label removed; `None` at the root.
    pub fn parent(&self) -> Option<DomainName> {
        if self.is_root() {
            return None;
        }
        match self.0.split_once('.') {
            Some((_, rest)) => Some(Self(Arc::from(rest))),
            None => Some(Self::root()),
        }
    }

    /// True when `self` is `other` or sits anywhere below it.
    pub fn is_subdomain_of(&self, other: &DomainName) -> bool {
        if other.is_root() || self == other {
            return true;
        }
        self.0
            .strip_suffix(&*other.0)
            .is_some_and(|head| head.ends_with('.'))
    }
}

impl Deref for DomainName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for DomainName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
