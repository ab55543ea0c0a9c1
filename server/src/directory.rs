//! Session directory seam: how a match finds or creates other matches.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// Errors from listing or creating matches.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("unknown match module: {0}")]
    UnknownModule(String),

    #[error("match not found: {0}")]
    MatchNotFound(String),

    #[error("directory is draining, no new matches accepted")]
    Draining,

    #[error("directory call timed out")]
    Timeout,

    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Filter for [`SessionDirectory::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchFilter {
    /// Exact label match, empty matches any label
    pub label: String,
    pub min_size: usize,
    pub max_size: usize,
    pub authoritative: bool,
    /// Substring searched in the label, `*` or empty matches any
    pub query: String,
}

impl MatchFilter {
    pub fn matches(&self, listing: &MatchListing) -> bool {
        if self.authoritative && !listing.authoritative {
            return false;
        }
        if !self.label.is_empty() && listing.label != self.label {
            return false;
        }
        if listing.size < self.min_size || listing.size > self.max_size {
            return false;
        }
        self.query.is_empty() || self.query == "*" || listing.label.contains(&self.query)
    }
}

/// A match as seen by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchListing {
    pub match_id: String,
    pub authoritative: bool,
    pub label: String,
    pub size: usize,
}

/// Params handed to a newly created match
pub type MatchParams = HashMap<String, String>;

#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// List at most `limit` open matches satisfying `filter`.
    async fn list(
        &self,
        filter: &MatchFilter,
        limit: usize,
    ) -> Result<Vec<MatchListing>, DirectoryError>;

    /// Create a match of the named module, returning its id.
    async fn create(&self, module: &str, params: MatchParams) -> Result<String, DirectoryError>;
}
