//! Selective reset: flip completion flags without touching files.

use std::fmt;

use meshledger_common::time::{format_timestamp, now};
use meshledger_common::{Error, Result, Stage, WorkItemId};
use meshledger_ledger::{schema::complete_column, LedgerStore, StageGate};

use super::ResetReport;

/// One planned flag transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagChange {
    pub item: WorkItemId,
    pub stage: Stage,
    /// Value of the completion flag before the reset.
    pub old: String,
}

#[derive(Debug, Clone)]
pub struct SelectivePlan {
    pub items: Vec<WorkItemId>,
    pub stages: Vec<Stage>,
    /// Requested identifiers that are not in the ledger.
    pub missing: Vec<String>,
    pub changes: Vec<FlagChange>,
}

/// Plan a selective reset of `stages` for `items`.
///
/// Unknown identifiers are warned about and skipped. Fails when no
/// requested item exists or no stage is given.
pub fn plan_selective<S: AsRef<str>>(
    ledger: &LedgerStore,
    items: &[S],
    stages: &[Stage],
) -> Result<SelectivePlan> {
    let mut stages = stages.to_vec();
    stages.sort();
    stages.dedup();
    if stages.is_empty() {
        return Err(Error::invalid_input("no stages given for selective reset"));
    }

    let mut found: Vec<WorkItemId> = Vec::new();
    let mut missing = Vec::new();
    for raw in items {
        let raw = raw.as_ref().trim();
        match WorkItemId::new(raw) {
            Ok(id) if ledger.contains(id.as_str()) => {
                if !found.contains(&id) {
                    found.push(id);
                }
            }
            _ => {
                tracing::warn!("Model {} not found in ledger, skipping", raw);
                missing.push(raw.to_string());
            }
        }
    }
    if found.is_empty() {
        return Err(Error::not_found(
            "none of the requested items exist in the ledger",
        ));
    }

    let changes = found
        .iter()
        .flat_map(|id| {
            let record = ledger.get(id.as_str());
            stages
                .iter()
                .map(|&stage| FlagChange {
                    item: id.clone(),
                    stage,
                    old: record.value(&complete_column(stage)).to_string(),
                })
                .collect::<Vec<_>>()
        })
        .collect();

    Ok(SelectivePlan {
        items: found,
        stages,
        missing,
        changes,
    })
}

impl SelectivePlan {
    /// `Step 2, Step 3`
    fn stage_list(&self) -> String {
        self.stages
            .iter()
            .map(|s| s.label())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Flip the planned flags and leave an audit note on every item.
    ///
    /// Ledger write failures are fatal.
    pub fn execute(&self, gate: &mut StageGate) -> Result<ResetReport> {
        let stage_list = self.stage_list();
        let note = format!(
            "Selective reset on {}: {}",
            format_timestamp(&now()),
            stage_list
        );

        let mut report = ResetReport::default();
        for id in &self.items {
            for &stage in &self.stages {
                gate.mark_for_reprocessing(id, stage)?;
            }
            gate.set_status(id, &format!("Reset for reprocessing: {}", stage_list))?;
            gate.add_note(id, &note)?;
            tracing::info!(item = %id, stages = %stage_list, "Reset for reprocessing");
            report.records_changed += 1;
        }
        Ok(report)
    }
}

impl fmt::Display for SelectivePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Selective reset of {} for {} item(s):",
            self.stage_list(),
            self.items.len()
        )?;
        for change in &self.changes {
            let old = if change.old.is_empty() {
                "(empty)"
            } else {
                change.old.as_str()
            };
            writeln!(
                f,
                "  {} {}: {} → FALSE",
                change.item,
                change.stage.label(),
                old
            )?;
        }
        for raw in &self.missing {
            writeln!(f, "  {} not in ledger, skipped", raw)?;
        }
        Ok(())
    }
}
