//! A snapshot of one ledger row.

use crate::schema::{COMPLETE, ID_COLUMN, NOTES_COLUMN, STATUS_COLUMN};

/// Column name to value pairs of one work item, in schema order.
///
/// A record for an unknown item is empty rather than an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    pub(crate) fn from_row(columns: &[String], row: &[String]) -> Self {
        Self {
            fields: columns.iter().cloned().zip(row.iter().cloned()).collect(),
        }
    }

    /// The empty record returned for absent items.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Value of a column, `None` if the record is empty or the column unknown.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }

    /// Value of a column, empty string when absent.
    pub fn value(&self, column: &str) -> &str {
        self.get(column).unwrap_or("")
    }

    pub fn id(&self) -> &str {
        self.value(ID_COLUMN)
    }

    pub fn status(&self) -> &str {
        self.value(STATUS_COLUMN)
    }

    pub fn notes(&self) -> &str {
        self.value(NOTES_COLUMN)
    }

    /// Whether a flag column holds the completion sentinel.
    pub fn flag_set(&self, column: &str) -> bool {
        self.value(column).trim().eq_ignore_ascii_case(COMPLETE)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(c, v)| (c.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        let columns = vec![
            ID_COLUMN.to_string(),
            STATUS_COLUMN.to_string(),
            "Step 1 complete".to_string(),
        ];
        let row = vec!["T1".to_string(), "Initialized".to_string(), " true ".to_string()];
        Record::from_row(&columns, &row)
    }

    #[test]
    fn test_lookup() {
        let r = record();
        assert_eq!(r.id(), "T1");
        assert_eq!(r.status(), "Initialized");
        assert_eq!(r.get("Missing"), None);
        assert_eq!(r.value("Missing"), "");
    }

    #[test]
    fn test_flag_is_case_insensitive() {
        assert!(record().flag_set("Step 1 complete"));
        assert!(!record().flag_set("Step 2 complete"));
    }

    #[test]
    fn test_empty_record() {
        let r = Record::empty();
        assert!(r.is_empty());
        assert_eq!(r.id(), "");
        assert_eq!(r.iter().count(), 0);
    }
}
