//! Work item identifiers.
//!
//! A work item is one independently processable unit of the pipeline, usually
//! a single video transect such as `TCRMP20241014_3D_BWR_T2`. Identifiers are
//! never renamed once created, so the newtype is immutable.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Site token used when an identifier does not follow the
/// `<survey>_<kind>_<site>_<transect>` convention.
pub const UNKNOWN_SITE: &str = "unknown";

/// Identifier of one work item, unique within a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkItemId(String);

impl WorkItemId {
    /// Create an identifier, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for empty identifiers or identifiers
    /// containing line breaks.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_input("work item identifier is empty"));
        }
        if trimmed.contains(['\n', '\r']) {
            return Err(Error::invalid_input(format!(
                "work item identifier contains a line break: {:?}",
                trimmed
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The site token: the third `_`-separated part of the identifier.
    ///
    /// ```
    /// use meshledger_common::WorkItemId;
    ///
    /// let id = WorkItemId::new("TCRMP20240311_3D_BID_T1").unwrap();
    /// assert_eq!(id.site(), "BID");
    /// assert_eq!(WorkItemId::new("T1").unwrap().site(), "unknown");
    /// ```
    pub fn site(&self) -> &str {
        self.0.split('_').nth(2).unwrap_or(UNKNOWN_SITE)
    }
}

impl TryFrom<String> for WorkItemId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<WorkItemId> for String {
    fn from(id: WorkItemId) -> Self {
        id.0
    }
}

impl std::str::FromStr for WorkItemId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for WorkItemId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trims_whitespace() {
        let id = WorkItemId::new("  T1 \n").unwrap();
        assert_eq!(id.as_str(), "T1");
    }

    #[test]
    fn test_rejects_empty() {
        assert!(WorkItemId::new("").is_err());
        assert!(WorkItemId::new("   ").is_err());
    }

    #[test]
    fn test_rejects_inner_line_break() {
        assert!(WorkItemId::new("T1\nT2").is_err());
    }

    #[test]
    fn test_site_token() {
        let id = WorkItemId::new("TCRMP20241014_3D_BWR_T2").unwrap();
        assert_eq!(id.site(), "BWR");
        assert_eq!(WorkItemId::new("a_b").unwrap().site(), UNKNOWN_SITE);
    }

    #[test]
    fn test_ordering_and_display() {
        let mut ids = vec![
            WorkItemId::new("T3").unwrap(),
            WorkItemId::new("T1").unwrap(),
        ];
        ids.sort();
        assert_eq!(ids[0].to_string(), "T1");
    }
}
