//! Suppression gate: recipients that must never be mailed.

use std::collections::HashSet;

use crate::domain::recipient::{domain_matches, normalize_recipient, recipient_domain};

/// Why a recipient was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocked {
    InvalidRecipient,
    Suppressed,
}

impl Blocked {
    /// Reason stored on the record.
    pub fn reason(self) -> &'static str {
        match self {
            Blocked::InvalidRecipient => "blocked: invalid recipient",
            Blocked::Suppressed => "blocked: suppressed recipient",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Suppression {
    addresses: HashSet<String>,
    domains: Vec<String>,
}

impl Suppression {
    pub fn new<A, D>(addresses: A, domains: D) -> Self
    where
        A: IntoIterator<Item = String>,
        D: IntoIterator<Item = String>,
    {
        Self {
            addresses: addresses
                .into_iter()
                .filter_map(|a| normalize_recipient(&a))
                .collect(),
            domains: domains
                .into_iter()
                .map(|d| d.trim().to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }

    /// Normalized recipient if it may be mailed.
    pub fn check(&self, raw: &str) -> Result<String, Blocked> {
        let addr = normalize_recipient(raw).ok_or(Blocked::InvalidRecipient)?;
        if self.addresses.contains(&addr) {
            return Err(Blocked::Suppressed);
        }
        let domain = recipient_domain(&addr).ok_or(Blocked::InvalidRecipient)?;
        if self.domains.iter().any(|rule| domain_matches(domain, rule)) {
            return Err(Blocked::Suppressed);
        }
        Ok(addr)
    }
}
