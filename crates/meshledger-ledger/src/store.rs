//! The durable ledger: one CSV row per work item under a fixed header.
//!
//! Loading is self-healing. Duplicated headers, foreign headers and
//! unreadable rows are repaired on open and every repair is surfaced as an
//! [`Anomaly`] in the [`LoadReport`]. Writes replace the whole file through a
//! temporary file in the same directory, so a reader never observes a
//! half-written ledger. The in-memory copy only changes once the rename has
//! succeeded.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use meshledger_common::time::{format_timestamp, now};
use meshledger_common::{Error, Result, WorkItemId};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::lock::LedgerLock;
use crate::record::Record;
use crate::schema::{Schema, ID_COLUMN, NOTES_COLUMN, STATUS_COLUMN, STATUS_INITIALIZED};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// A problem found while loading the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// The first data row repeated the header; all data rows were discarded.
    DuplicatedHeader { discarded_rows: usize },
    /// The header differed from the schema; rows were salvaged by column name.
    HeaderMismatch { unknown_columns: Vec<String> },
    /// The header has no identifier column, so no row could be salvaged.
    MissingIdColumn { discarded_rows: usize },
    /// A copy of the header appeared later in the data.
    EmbeddedHeader { line: u64 },
    /// A row could not be parsed or had more fields than the header.
    MalformedRow { line: u64, reason: String },
    /// A row with an empty identifier.
    MissingId { line: u64 },
    /// A second row for an identifier already seen.
    DuplicateId { line: u64, id: String },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::DuplicatedHeader { discarded_rows } => write!(
                f,
                "duplicated header row; {} data row(s) discarded",
                discarded_rows
            ),
            Anomaly::HeaderMismatch { unknown_columns } if unknown_columns.is_empty() => {
                write!(f, "header does not match schema; rows salvaged by column name")
            }
            Anomaly::HeaderMismatch { unknown_columns } => write!(
                f,
                "header does not match schema; rows salvaged, unknown columns dropped: {}",
                unknown_columns.join(", ")
            ),
            Anomaly::MissingIdColumn { discarded_rows } => write!(
                f,
                "header has no '{}' column; {} data row(s) discarded",
                ID_COLUMN, discarded_rows
            ),
            Anomaly::EmbeddedHeader { line } => write!(f, "line {}: repeated header dropped", line),
            Anomaly::MalformedRow { line, reason } => {
                write!(f, "line {}: unreadable row dropped ({})", line, reason)
            }
            Anomaly::MissingId { line } => write!(f, "line {}: row without identifier dropped", line),
            Anomaly::DuplicateId { line, id } => {
                write!(f, "line {}: duplicate row for '{}' dropped", line, id)
            }
        }
    }
}

/// Outcome of loading a ledger file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub rows_loaded: usize,
    pub rows_dropped: usize,
    pub header_rewritten: bool,
    pub anomalies: Vec<Anomaly>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }

    fn needs_rewrite(&self) -> bool {
        self.header_rewritten || !self.anomalies.is_empty()
    }
}

/// The ledger for one project.
#[derive(Debug)]
pub struct LedgerStore {
    path: PathBuf,
    schema: Arc<Schema>,
    rows: Vec<Vec<String>>,
    index: HashMap<String, usize>,
    header_on_disk: bool,
    read_only: bool,
    report: LoadReport,
    _lock: Option<LedgerLock>,
}

impl LedgerStore {
    /// Open the ledger for writing.
    ///
    /// Takes the single-writer lock, loads the file and, when the load had to
    /// repair anything, rewrites it immediately.
    pub fn open(path: impl AsRef<Path>, schema: Arc<Schema>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock = LedgerLock::acquire(&path)?;
        let mut store = Self::load(path, schema, false)?;
        store._lock = Some(lock);

        if store.report.needs_rewrite() {
            store.persist()?;
            info!(ledger = %store.path.display(), "Rewrote repaired ledger");
        }
        Ok(store)
    }

    /// Open the ledger without locking. The store refuses every mutation.
    pub fn open_read_only(path: impl AsRef<Path>, schema: Arc<Schema>) -> Result<Self> {
        Self::load(path.as_ref().to_path_buf(), schema, true)
    }

    fn load(path: PathBuf, schema: Arc<Schema>, read_only: bool) -> Result<Self> {
        let mut store = Self {
            path,
            schema,
            rows: Vec::new(),
            index: HashMap::new(),
            header_on_disk: false,
            read_only,
            report: LoadReport::default(),
            _lock: None,
        };

        let bytes = match std::fs::read(&store.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(ledger = %store.path.display(), "No ledger file yet");
                return Ok(store);
            }
            Err(e) => return Err(Error::Io(e)),
        };
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes);

        let mut raw_rows: Vec<(u64, std::result::Result<Vec<String>, String>)> = Vec::new();
        for result in reader.records() {
            match result {
                Ok(record) => {
                    let line = record.position().map(|p| p.line()).unwrap_or(0);
                    raw_rows.push((line, Ok(record.iter().map(|s| s.to_string()).collect())));
                }
                Err(e) if e.is_io_error() => return Err(csv_error(e)),
                Err(e) => {
                    let line = e.position().map(|p| p.line()).unwrap_or(0);
                    raw_rows.push((line, Err(e.to_string())));
                }
            }
        }

        let mut rows = raw_rows.into_iter();
        let header = match rows.next() {
            None => return Ok(store),
            Some((_, Ok(header))) => header
                .into_iter()
                .map(|c| c.trim().to_string())
                .collect::<Vec<_>>(),
            Some((line, Err(reason))) => {
                store.record_anomaly(Anomaly::MalformedRow { line, reason });
                store.report.header_rewritten = true;
                store.report.rows_dropped = rows.count();
                store.log_report();
                return Ok(store);
            }
        };

        let mut data: Vec<(u64, std::result::Result<Vec<String>, String>)> = rows.collect();

        if let Some((_, Ok(first))) = data.first() {
            if same_row(first, &header) {
                let discarded = data.len();
                store.report.rows_dropped = discarded;
                store.report.header_rewritten = true;
                store.record_anomaly(Anomaly::DuplicatedHeader {
                    discarded_rows: discarded,
                });
                store.log_report();
                return Ok(store);
            }
        }

        // Map each on-disk column to its schema position.
        let mapping: Vec<Option<usize>> = header.iter().map(|c| store.schema.index_of(c)).collect();
        let exact = store.schema.matches_header(&header);
        if !exact {
            store.report.header_rewritten = true;
            if !mapping.contains(&Some(store.schema.id_index())) {
                let discarded = data.len();
                store.report.rows_dropped = discarded;
                store.record_anomaly(Anomaly::MissingIdColumn {
                    discarded_rows: discarded,
                });
                store.log_report();
                return Ok(store);
            }
            let unknown_columns = header
                .iter()
                .zip(&mapping)
                .filter(|(_, m)| m.is_none())
                .map(|(c, _)| c.clone())
                .collect();
            store.record_anomaly(Anomaly::HeaderMismatch { unknown_columns });
        }

        let width = store.schema.len();
        let id_index = store.schema.id_index();
        for (line, parsed) in data.drain(..) {
            let fields = match parsed {
                Ok(fields) => fields,
                Err(reason) => {
                    store.drop_row(Anomaly::MalformedRow { line, reason });
                    continue;
                }
            };
            if same_row(&fields, &header) {
                store.drop_row(Anomaly::EmbeddedHeader { line });
                continue;
            }
            if fields.len() > header.len() {
                store.drop_row(Anomaly::MalformedRow {
                    line,
                    reason: format!("{} fields, header has {}", fields.len(), header.len()),
                });
                continue;
            }

            let mut row = vec![String::new(); width];
            for (value, target) in fields.into_iter().zip(&mapping) {
                if let Some(i) = target {
                    row[*i] = value;
                }
            }
            row[id_index] = row[id_index].trim().to_string();

            let id = row[id_index].clone();
            if id.is_empty() {
                store.drop_row(Anomaly::MissingId { line });
                continue;
            }
            if store.index.contains_key(&id) {
                store.drop_row(Anomaly::DuplicateId { line, id });
                continue;
            }
            store.index.insert(id, store.rows.len());
            store.rows.push(row);
        }

        store.header_on_disk = exact;
        store.report.rows_loaded = store.rows.len();
        store.log_report();
        Ok(store)
    }

    fn record_anomaly(&mut self, anomaly: Anomaly) {
        self.report.anomalies.push(anomaly);
    }

    fn drop_row(&mut self, anomaly: Anomaly) {
        self.report.rows_dropped += 1;
        self.record_anomaly(anomaly);
    }

    fn log_report(&self) {
        for anomaly in &self.report.anomalies {
            warn!(ledger = %self.path.display(), "Ledger anomaly: {}", anomaly);
        }
        if self.report.rows_dropped > 0 {
            warn!(
                ledger = %self.path.display(),
                dropped = self.report.rows_dropped,
                "Ledger repaired with data loss"
            );
        }
        debug!(
            ledger = %self.path.display(),
            rows = self.rows.len(),
            "Ledger loaded"
        );
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// What loading found and repaired.
    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Identifiers in ledger order.
    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        let id_index = self.schema.id_index();
        self.rows.iter().map(move |row| row[id_index].as_str())
    }

    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        self.rows
            .iter()
            .map(|row| Record::from_row(self.schema.columns(), row))
    }

    /// All known fields of an item, or an empty record.
    pub fn get(&self, id: &str) -> Record {
        self.index
            .get(id.trim())
            .map(|&i| Record::from_row(self.schema.columns(), &self.rows[i]))
            .unwrap_or_default()
    }

    /// Write the header if the file does not have one yet.
    pub fn ensure_header(&mut self) -> Result<()> {
        self.writable()?;
        if !self.header_on_disk {
            self.persist()?;
        }
        Ok(())
    }

    /// Make sure a record exists for `id`. Returns `true` if one was created.
    pub fn initialize(&mut self, id: &WorkItemId) -> Result<bool> {
        self.writable()?;
        if self.index.contains_key(id.as_str()) {
            self.ensure_header()?;
            return Ok(false);
        }
        let row = self.new_row(id);
        self.commit_row(id.as_str(), row)?;
        debug!(item = %id, "Initialized ledger record");
        Ok(true)
    }

    /// Merge `fields` into the record of `id`, creating it if absent.
    ///
    /// Every column is checked before anything changes: one unknown column
    /// rejects the whole update and leaves the record untouched.
    pub fn update<K, V>(&mut self, id: &WorkItemId, fields: &[(K, V)]) -> Result<()>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.writable()?;
        let mut targets = Vec::with_capacity(fields.len());
        for (column, value) in fields {
            let column = column.as_ref();
            let i = self
                .schema
                .index_of(column)
                .ok_or_else(|| Error::unknown_field(column))?;
            if i == self.schema.id_index() {
                return Err(Error::invalid_input(format!(
                    "the '{}' column cannot be updated",
                    ID_COLUMN
                )));
            }
            targets.push((i, value.as_ref()));
        }

        let mut row = match self.index.get(id.as_str()) {
            Some(&i) => self.rows[i].clone(),
            None => self.new_row(id),
        };
        for (i, value) in targets {
            row[i] = value.to_string();
        }
        self.commit_row(id.as_str(), row)
    }

    /// Clear `columns` on every record, optionally rewriting each status.
    ///
    /// Returns the number of records that changed. One atomic write.
    pub fn clear_columns<C, F>(&mut self, columns: &[C], rewrite_status: F) -> Result<usize>
    where
        C: AsRef<str>,
        F: Fn(&str) -> Option<String>,
    {
        self.writable()?;
        let mut targets = Vec::with_capacity(columns.len());
        for column in columns {
            let column = column.as_ref();
            let i = self
                .schema
                .index_of(column)
                .ok_or_else(|| Error::unknown_field(column))?;
            if i == self.schema.id_index() {
                return Err(Error::invalid_input(format!(
                    "the '{}' column cannot be cleared",
                    ID_COLUMN
                )));
            }
            targets.push(i);
        }
        let status_index = self.schema.index_of(STATUS_COLUMN);

        let previous = self.rows.clone();
        let mut changed = 0;
        for row in &mut self.rows {
            let mut touched = false;
            for &i in &targets {
                if !row[i].is_empty() {
                    row[i].clear();
                    touched = true;
                }
            }
            if let Some(s) = status_index {
                if let Some(status) = rewrite_status(&row[s]) {
                    if status != row[s] {
                        row[s] = status;
                        touched = true;
                    }
                }
            }
            if touched {
                changed += 1;
            }
        }

        if let Err(e) = self.persist() {
            self.rows = previous;
            return Err(e);
        }
        Ok(changed)
    }

    /// Remove the ledger file. The lock is released when the store drops.
    pub fn delete(self) -> Result<()> {
        self.writable()?;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!(ledger = %self.path.display(), "Removed ledger file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn new_row(&self, id: &WorkItemId) -> Vec<String> {
        let mut row = vec![String::new(); self.schema.len()];
        row[self.schema.id_index()] = id.as_str().to_string();
        if let Some(i) = self.schema.index_of(STATUS_COLUMN) {
            row[i] = STATUS_INITIALIZED.to_string();
        }
        if let Some(i) = self.schema.index_of(NOTES_COLUMN) {
            row[i] = format!("Tracking initialized {}", format_timestamp(&now()));
        }
        row
    }

    fn commit_row(&mut self, id: &str, row: Vec<String>) -> Result<()> {
        match self.index.get(id).copied() {
            Some(i) => {
                let previous = std::mem::replace(&mut self.rows[i], row);
                if let Err(e) = self.persist() {
                    self.rows[i] = previous;
                    return Err(e);
                }
            }
            None => {
                self.rows.push(row);
                self.index.insert(id.to_string(), self.rows.len() - 1);
                if let Err(e) = self.persist() {
                    self.rows.pop();
                    self.index.remove(id);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::ledger(format!(
                "{} was opened read-only",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn persist(&mut self) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::<u8>::new());
        writer.write_record(self.schema.columns()).map_err(csv_error)?;
        for row in &self.rows {
            writer.write_record(row).map_err(csv_error)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| Error::ledger(format!("failed to flush ledger buffer: {}", e)))?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        self.header_on_disk = true;
        Ok(())
    }
}

fn same_row(row: &[String], header: &[String]) -> bool {
    row.len() == header.len() && row.iter().zip(header).all(|(a, b)| a.trim() == b)
}

fn csv_error(e: csv::Error) -> Error {
    if e.is_io_error() {
        if let csv::ErrorKind::Io(io) = e.into_kind() {
            return Error::Io(io);
        }
        return Error::ledger("csv I/O error");
    }
    Error::ledger(format!("csv error: {}", e))
}
