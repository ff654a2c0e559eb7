//! Stage gate: decides whether a stage must run and records its lifecycle.
//!
//! Every stage attempt goes `start` then `complete` or `fail`. A process that
//! dies between the two leaves an "in progress" status with no completion
//! flag, which `should_run` treats like any other incomplete stage.

use chrono::{DateTime, Local};
use meshledger_common::time::{format_duration, format_timestamp, now};
use meshledger_common::{Error, Result, Stage, WorkItemId};
use tracing::{debug, info, warn};

use crate::schema::{
    complete_column, complete_time_column, container_column, error_time_column,
    processing_time_column, start_time_column, uses_container, COMPLETE, INCOMPLETE,
    NOTES_COLUMN, STATUS_COLUMN,
};
use crate::store::LedgerStore;

/// Separator between entries of the notes column.
pub const NOTE_SEPARATOR: &str = "; ";

pub fn status_in_progress(stage: Stage) -> String {
    format!("{} in progress", stage.label())
}

pub fn status_complete(stage: Stage) -> String {
    format!("{} complete", stage.label())
}

pub fn status_error(stage: Stage) -> String {
    format!("Error in {}", stage.label())
}

pub fn status_reprocessing(stage: Stage) -> String {
    format!("{} marked for reprocessing", stage.label())
}

/// Join a new entry onto existing notes.
pub fn append_note(existing: &str, note: &str) -> String {
    if existing.trim().is_empty() {
        note.to_string()
    } else {
        format!("{}{}{}", existing, NOTE_SEPARATOR, note)
    }
}

/// Stage lifecycle operations over a [`LedgerStore`].
#[derive(Debug)]
pub struct StageGate {
    ledger: LedgerStore,
}

impl StageGate {
    pub fn new(ledger: LedgerStore) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut LedgerStore {
        &mut self.ledger
    }

    pub fn into_ledger(self) -> LedgerStore {
        self.ledger
    }

    /// True unless the stage's completion flag holds the completion sentinel.
    pub fn should_run(&self, id: &str, stage: Stage) -> bool {
        !self.ledger.get(id).flag_set(&complete_column(stage))
    }

    /// Whether the preceding stage is complete. Always true for the first stage.
    pub fn prerequisite_met(&self, id: &str, stage: Stage) -> bool {
        match stage.previous() {
            Some(previous) => !self.should_run(id, previous),
            None => true,
        }
    }

    /// Ledger items whose prerequisite is met and that still need `stage`.
    pub fn items_needing(&self, stage: Stage) -> Vec<WorkItemId> {
        self.ledger
            .ids()
            .filter(|id| self.should_run(id, stage) && self.prerequisite_met(id, stage))
            .filter_map(|id| WorkItemId::new(id).ok())
            .collect()
    }

    /// Record a start timestamp and an in-progress status.
    pub fn start(&mut self, id: &WorkItemId, stage: Stage) -> Result<DateTime<Local>> {
        let started = now();
        self.ledger.update(
            id,
            &[
                (start_time_column(stage), format_timestamp(&started)),
                (STATUS_COLUMN.to_string(), status_in_progress(stage)),
            ],
        )?;
        debug!(item = %id, stage = stage.number(), "Stage started");
        Ok(started)
    }

    /// Flip the stage to done, with timings and any engine-reported fields.
    ///
    /// All of `extra` is validated against the schema before anything is
    /// written; an unknown column rejects the whole completion.
    pub fn complete<K, V>(
        &mut self,
        id: &WorkItemId,
        stage: Stage,
        started: &DateTime<Local>,
        extra: &[(K, V)],
    ) -> Result<()>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let finished = now();
        let mut fields: Vec<(String, String)> = extra
            .iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
            .collect();
        // Gate fields come last so the engine cannot override them.
        fields.push((complete_column(stage), COMPLETE.to_string()));
        fields.push((complete_time_column(stage), format_timestamp(&finished)));
        fields.push((processing_time_column(stage), format_duration(started, &finished)));
        fields.push((STATUS_COLUMN.to_string(), status_complete(stage)));

        self.ledger.update(id, &fields)?;
        info!(
            item = %id,
            stage = stage.number(),
            duration = %format_duration(started, &finished),
            "Stage complete"
        );
        Ok(())
    }

    /// Record a failed attempt: flag `FALSE`, error time, note appended.
    ///
    /// Only ledger I/O problems are returned; the failure itself is state.
    pub fn fail(&mut self, id: &WorkItemId, stage: Stage, description: &str) -> Result<()> {
        let notes = append_note(
            self.ledger.get(id.as_str()).notes(),
            &format!("{} failed: {}", stage.label(), description),
        );
        self.ledger.update(
            id,
            &[
                (complete_column(stage), INCOMPLETE.to_string()),
                (error_time_column(stage), format_timestamp(&now())),
                (STATUS_COLUMN.to_string(), status_error(stage)),
                (NOTES_COLUMN.to_string(), notes),
            ],
        )?;
        warn!(item = %id, stage = stage.number(), error = %description, "Stage failed");
        Ok(())
    }

    /// Reset one stage's completion flag to `FALSE`; other stages are untouched.
    pub fn mark_for_reprocessing(&mut self, id: &WorkItemId, stage: Stage) -> Result<()> {
        self.ledger.update(
            id,
            &[
                (complete_column(stage), INCOMPLETE.to_string()),
                (STATUS_COLUMN.to_string(), status_reprocessing(stage)),
            ],
        )?;
        debug!(item = %id, stage = stage.number(), "Marked for reprocessing");
        Ok(())
    }

    /// Append an entry to an item's notes.
    pub fn add_note(&mut self, id: &WorkItemId, note: &str) -> Result<()> {
        let notes = append_note(self.ledger.get(id.as_str()).notes(), note);
        self.ledger.update(id, &[(NOTES_COLUMN, notes)])
    }

    pub fn set_status(&mut self, id: &WorkItemId, status: &str) -> Result<()> {
        self.ledger.update(id, &[(STATUS_COLUMN, status)])
    }

    /// Record the container an item is processed in, before the engine runs.
    pub fn assign_container(&mut self, id: &WorkItemId, stage: Stage, container: &str) -> Result<()> {
        if !uses_container(stage) {
            return Err(Error::invalid_input(format!(
                "{} does not use containers",
                stage.label()
            )));
        }
        self.ledger.update(id, &[(container_column(stage), container)])
    }

    /// The recorded container for an item, if any.
    pub fn container_of(&self, id: &str, stage: Stage) -> Option<String> {
        if !uses_container(stage) {
            return None;
        }
        let value = self.ledger.get(id).value(&container_column(stage)).trim().to_string();
        (!value.is_empty()).then_some(value)
    }
}
