//! Identity Resolver
//!
//! - Canonical customer ids: Unicode dash variants folded to ASCII `-`
//! - Account deduplication: one representative source record per canonical id
//! - Actor resolution: source user → target profile id, with a fixed fallback

mod actor;

pub use actor::{
    ActorCache, ActorResolver, ProfileLookup, ProfileRecord, ResolutionStats, ResolvedActor,
    SERVICE_ACCOUNT,
};

use crate::models::SourceCaseRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Code points rewritten to ASCII hyphen-minus
///
/// U+2010 hyphen, U+2011 non-breaking hyphen, U+2012 figure dash, U+2013 en
/// dash, U+2014 em dash, U+2212 minus sign, U+FE58 small em dash, U+FE63 small
/// hyphen-minus, U+FF0D fullwidth hyphen-minus.
const DASH_VARIANTS: &[char] = &[
    '\u{2010}', '\u{2011}', '\u{2012}', '\u{2013}', '\u{2014}', '\u{2212}', '\u{FE58}', '\u{FE63}',
    '\u{FF0D}',
];

/// Normalized customer identifier; the deduplication key for accounts
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalCustomerId(String);

impl CanonicalCustomerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CanonicalCustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalCustomerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonicalize a raw customer identifier
///
/// Idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(raw: &str) -> CanonicalCustomerId {
    let folded: String = raw
        .trim()
        .chars()
        .map(|c| if DASH_VARIANTS.contains(&c) { '-' } else { c })
        .collect();
    CanonicalCustomerId(folded)
}

/// Canonical id of a record, if it has a usable raw identifier
pub fn canonical_id_of(record: &SourceCaseRecord) -> Option<CanonicalCustomerId> {
    record
        .raw_customer_id
        .as_deref()
        .map(normalize)
        .filter(|id| !id.as_str().is_empty())
}

/// Result of grouping source records by canonical customer id
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    /// Representative record per canonical id, ordered by id
    pub accounts: BTreeMap<CanonicalCustomerId, SourceCaseRecord>,
    /// Number of source records folded into each canonical id
    pub group_sizes: BTreeMap<CanonicalCustomerId, usize>,
    /// Source ids of records without a customer identifier
    pub skipped: Vec<String>,
}

/// Group records by canonical id and pick one representative per group
///
/// The representative is the most recently created record. When either of
/// two competing records has no creation time, the one seen first wins.
pub fn dedupe_to_accounts<'a, I>(records: I) -> DedupOutcome
where
    I: IntoIterator<Item = &'a SourceCaseRecord>,
{
    let mut outcome = DedupOutcome::default();

    for record in records {
        let Some(canonical) = canonical_id_of(record) else {
            debug!(source_id = %record.source_id, "No customer identifier, excluded from accounts");
            outcome.skipped.push(record.source_id.clone());
            continue;
        };

        *outcome.group_sizes.entry(canonical.clone()).or_insert(0) += 1;

        match outcome.accounts.get_mut(&canonical) {
            None => {
                outcome.accounts.insert(canonical, record.clone());
            }
            Some(current) => {
                if let (Some(candidate_at), Some(current_at)) = (record.created_at, current.created_at) {
                    if candidate_at > current_at {
                        debug!(
                            customer = %canonical,
                            replaced = %current.source_id,
                            by = %record.source_id,
                            "Newer representative for account"
                        );
                        *current = record.clone();
                    }
                }
            }
        }
    }

    outcome
}
