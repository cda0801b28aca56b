//! Content-addressed identity and idempotent save
//!
//! A record's id is the SHA-256 of its canonical form: the record as
//! sorted-key compact JSON without `id` and `inserted_at`. Re-deriving the
//! same business record on a later run therefore yields the same id, and a
//! sink that already holds that id is skipped.
//!
//! The existence check is the only deduplication. Two writers racing on the
//! same sink can both pass it; one writer per sink is assumed.

use crate::domain::{Record, NON_IDENTITY_FIELDS};
use crate::error::Result;
use async_trait::async_trait;
use costflow_common::digest::{canonical_json, sha256_hex};
use tracing::{debug, info, warn};

/// Canonical serialization of `record`'s business attributes
pub fn canonical_form<R: Record>(record: &R) -> Result<String> {
    Ok(canonical_json(record, &NON_IDENTITY_FIELDS)?)
}

/// 64-character lowercase hex id of `record`
pub fn compute_id<R: Record>(record: &R) -> Result<String> {
    Ok(sha256_hex(canonical_form(record)?.as_bytes()))
}

pub fn assign_id<R: Record>(mut record: R) -> Result<R> {
    let id = compute_id(&record)?;
    record.set_id(id);
    Ok(record)
}

pub fn assign_ids<R: Record>(records: Vec<R>) -> Result<Vec<R>> {
    records.into_iter().map(assign_id).collect()
}

/// A sink table that can be probed by id
#[async_trait]
pub trait RecordStore<R: Record>: Send + Sync {
    /// Table name for logs
    fn table(&self) -> &str;

    async fn exists(&self, id: &str) -> Result<bool>;

    async fn save(&self, record: &R) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    Skipped,
}

/// Save `record` unless the store already has its id
pub async fn save_if_absent<R, S>(store: &S, record: &R, suppress_warning: bool) -> Result<SaveOutcome>
where
    R: Record,
    S: RecordStore<R> + ?Sized,
{
    if store.exists(record.id()).await? {
        if !suppress_warning {
            warn!(table = store.table(), id = record.id(), "Record already exists, skipping");
        }
        return Ok(SaveOutcome::Skipped);
    }

    store.save(record).await?;
    debug!(table = store.table(), id = record.id(), "Inserted record");
    Ok(SaveOutcome::Inserted)
}

/// Per-table insert/skip counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub table: String,
    pub inserted: usize,
    pub skipped: usize,
}

impl SaveSummary {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: SaveOutcome) {
        match outcome {
            SaveOutcome::Inserted => self.inserted += 1,
            SaveOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.inserted + self.skipped
    }
}

/// Save every record that is not yet present, sequentially
pub async fn save_all<R, S>(store: &S, records: &[R], suppress_warning: bool) -> Result<SaveSummary>
where
    R: Record,
    S: RecordStore<R> + ?Sized,
{
    let mut summary = SaveSummary::new(store.table());
    for record in records {
        summary.record(save_if_absent(store, record, suppress_warning).await?);
    }

    info!(
        table = %summary.table,
        inserted = summary.inserted,
        skipped = summary.skipped,
        "Saved {} records",
        R::KIND
    );
    Ok(summary)
}
