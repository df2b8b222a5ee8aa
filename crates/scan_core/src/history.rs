//! Session-only log of completed scans.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use shared::domain::{Mode, ScanOutcome};
use uuid::Uuid;

/// One physical scan and how it ended. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanRecord {
    id: Uuid,
    recorded_at: DateTime<Utc>,
    raw_payload: String,
    outcome: ScanOutcome,
    mode: Mode,
    participant_name: Option<String>,
}

impl ScanRecord {
    pub fn new(
        raw_payload: impl Into<String>,
        outcome: ScanOutcome,
        mode: Mode,
        participant_name: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            raw_payload: raw_payload.into(),
            outcome,
            mode,
            participant_name,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    /// Local wall-clock time of the scan, `HH:MM:SS`.
    pub fn timestamp(&self) -> String {
        self.recorded_at
            .with_timezone(&Local)
            .format("%H:%M:%S")
            .to_string()
    }

    pub fn raw_payload(&self) -> &str {
        &self.raw_payload
    }

    pub fn outcome(&self) -> ScanOutcome {
        self.outcome
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn participant_name(&self) -> Option<&str> {
        self.participant_name.as_deref()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModeTally {
    pub valid: usize,
    pub invalid: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HistorySummary {
    pub total: usize,
    pub entrada: ModeTally,
    pub entrega: ModeTally,
}

impl HistorySummary {
    pub fn for_mode(&self, mode: Mode) -> ModeTally {
        match mode {
            Mode::Entrada => self.entrada,
            Mode::Entrega => self.entrega,
        }
    }

    pub fn valid(&self) -> usize {
        self.entrada.valid + self.entrega.valid
    }

    pub fn invalid(&self) -> usize {
        self.entrada.invalid + self.entrega.invalid
    }
}

/// Append-only, insertion-ordered store. Readers get a snapshot of whole
/// records; an append in progress is never observed half-done.
#[derive(Debug, Default)]
pub struct ScanHistory {
    records: RwLock<Vec<Arc<ScanRecord>>>,
}

impl ScanHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The appended record becomes the newest entry.
    pub fn append(&self, record: ScanRecord) -> Arc<ScanRecord> {
        let record = Arc::new(record);
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::clone(&record));
        record
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn latest(&self) -> Option<Arc<ScanRecord>> {
        self.read().last().cloned()
    }

    pub fn newest_first(&self) -> Vec<Arc<ScanRecord>> {
        self.read().iter().rev().cloned().collect()
    }

    /// Newest-first entries paired with their scan number; the oldest
    /// record is #1.
    pub fn numbered(&self) -> Vec<(usize, Arc<ScanRecord>)> {
        let records = self.read();
        let total = records.len();
        records
            .iter()
            .rev()
            .enumerate()
            .map(|(index, record)| (total - index, Arc::clone(record)))
            .collect()
    }

    pub fn summary(&self) -> HistorySummary {
        let records = self.read();
        let mut summary = HistorySummary {
            total: records.len(),
            ..HistorySummary::default()
        };
        for record in records.iter() {
            let tally = match record.mode() {
                Mode::Entrada => &mut summary.entrada,
                Mode::Entrega => &mut summary.entrega,
            };
            match record.outcome() {
                ScanOutcome::Valid => tally.valid += 1,
                ScanOutcome::Invalid => tally.invalid += 1,
            }
        }
        summary
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<ScanRecord>>> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
#[path = "tests/history_tests.rs"]
mod tests;
