//! In-process journal for dry runs and tests

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashSet};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    acknowledge_summary, resolve_status, stored_transition_allowed, Journal, JournalOptions,
};
use crate::error::{IngestError, Result};
use crate::types::{Batch, FileHash, ImportEvent, ImportStatus};

#[derive(Debug, Clone)]
struct StoredEvent {
    event: ImportEvent,
    /// Raw status column; `None` for rows that predate status tracking
    status_key: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    batches: Vec<Batch>,
    events: Vec<StoredEvent>,
    /// (batch_id, event_id)
    memberships: BTreeSet<(i64, i64)>,
}

impl State {
    fn latest_batch_of(&self, event_id: i64) -> Option<i64> {
        self.memberships
            .iter()
            .filter(|(_, e)| *e == event_id)
            .map(|(b, _)| *b)
            .max()
    }

    fn position(&self, importer_name: &str, content_hash: &str) -> Result<Option<usize>> {
        let mut matches = self.events.iter().enumerate().filter(|(_, s)| {
            s.event.importer_name == importer_name && s.event.content_hash == content_hash
        });
        let first = matches.next().map(|(i, _)| i);
        if matches.next().is_some() {
            return Err(IngestError::inconsistency(format!(
                "more than one import event for hash {}",
                content_hash
            )));
        }
        Ok(first)
    }

    fn stored_mut(&mut self, event_id: i64) -> Result<&mut StoredEvent> {
        self.events
            .iter_mut()
            .find(|s| s.event.id == event_id)
            .ok_or_else(|| IngestError::inconsistency(format!("import event {} not found", event_id)))
    }

    fn load(&self, index: usize, active_batch: i64) -> ImportEvent {
        let stored = &self.events[index];
        let mut event = stored.event.clone();
        let latest = self.latest_batch_of(event.id);
        event.status = resolve_status(
            stored.status_key.as_deref(),
            latest == Some(active_batch),
            event.record_count,
        );
        if let Some(batch_id) = latest {
            event.batch_id = batch_id;
        }
        event
    }
}

/// Journal kept in memory with the same semantics as [`super::PgJournal`]
#[derive(Debug)]
pub struct MemoryJournal {
    options: JournalOptions,
    state: Mutex<State>,
}

impl MemoryJournal {
    pub fn new(options: JournalOptions) -> Self {
        Self {
            options,
            state: Mutex::new(State::default()),
        }
    }

    /// Load a row as an older importer would have written it. The status is
    /// resolved from `status_key` on the next lookup.
    pub async fn insert_raw(
        &self,
        mut event: ImportEvent,
        status_key: Option<&str>,
        batch_ids: &[i64],
    ) -> ImportEvent {
        let mut state = self.state.lock().await;
        event.id = state.events.len() as i64 + 1;
        for batch_id in batch_ids {
            state.memberships.insert((*batch_id, event.id));
        }
        state.events.push(StoredEvent {
            event: event.clone(),
            status_key: status_key.map(str::to_string),
        });
        event
    }

    /// Every stored event for this importer, in insertion order
    pub async fn events(&self) -> Vec<ImportEvent> {
        let state = self.state.lock().await;
        state
            .events
            .iter()
            .filter(|s| s.event.importer_name == self.options.importer_name)
            .map(|s| s.event.clone())
            .collect()
    }

    async fn store(&self, event: &ImportEvent, status: ImportStatus) -> Result<()> {
        let mut state = self.state.lock().await;
        let stored = state.stored_mut(event.id)?;
        if !stored_transition_allowed(stored.status_key.as_deref(), status) {
            return Err(IngestError::inconsistency(format!(
                "import event {} is {} in the journal and cannot move to {}",
                event.id,
                stored.status_key.as_deref().unwrap_or("unset"),
                status
            )));
        }
        stored.event = event.clone();
        stored.status_key = Some(status.as_str().to_string());
        state.memberships.insert((event.batch_id, event.id));
        Ok(())
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    fn importer_name(&self) -> &str {
        &self.options.importer_name
    }

    async fn new_batch(&self) -> Result<Batch> {
        let mut state = self.state.lock().await;
        let batch = Batch {
            id: state.batches.len() as i64 + 1,
            importer_name: self.options.importer_name.clone(),
            created_moment: Utc::now(),
            total_events: 0,
        };
        state.batches.push(batch.clone());
        info!(batch_id = batch.id, importer = %batch.importer_name, "Created import batch");
        Ok(batch)
    }

    async fn existing_hashes(
        &self,
        exclude_unknowns: bool,
        exclude_failures: bool,
    ) -> Result<HashSet<String>> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .filter(|s| s.event.importer_name == self.options.importer_name)
            .filter(|s| {
                let key = s.status_key.as_deref();
                !(exclude_unknowns && key == Some(ImportStatus::Unknown.as_str()))
                    && !(exclude_failures && key == Some(ImportStatus::Error.as_str()))
            })
            .map(|s| s.event.content_hash.clone())
            .collect())
    }

    async fn new_or_existing_event(
        &self,
        file: &FileHash,
        batch: &Batch,
        reprocess_unknowns: bool,
    ) -> Result<ImportEvent> {
        let mut state = self.state.lock().await;

        let index = match state.position(&self.options.importer_name, &file.hash)? {
            Some(index) => index,
            None => {
                let mut event = self.options.draft_event(file, batch);
                event.id = state.events.len() as i64 + 1;
                state.memberships.insert((batch.id, event.id));
                state.events.push(StoredEvent {
                    event,
                    status_key: Some(ImportStatus::Available.as_str().to_string()),
                });
                debug!(hash = %file.hash, "Journaled new import event");
                state.events.len() - 1
            },
        };

        let mut event = state.load(index, batch.id);
        event.ensure_status(batch, reprocess_unknowns);
        Ok(event)
    }

    async fn pend(&self, mut event: ImportEvent, batch: &Batch) -> Result<ImportEvent> {
        event.transition(ImportStatus::Pending)?;
        event.batch_id = batch.id;
        self.store(&event, ImportStatus::Pending).await?;
        Ok(event)
    }

    async fn close(&self, mut event: ImportEvent, record_count: u64) -> Result<ImportEvent> {
        event.transition(ImportStatus::Complete)?;
        event.record_success(i64::try_from(record_count).unwrap_or(i64::MAX));
        self.store(&event, ImportStatus::Complete).await?;
        Ok(event)
    }

    async fn fail(&self, mut event: ImportEvent, error: &IngestError) -> Result<ImportEvent> {
        event.transition(ImportStatus::Error)?;
        event.record_failure(error);
        self.store(&event, ImportStatus::Error).await?;
        Ok(event)
    }

    async fn last_batch(&self) -> Result<Option<Batch>> {
        let state = self.state.lock().await;
        Ok(state
            .batches
            .iter()
            .filter(|b| b.importer_name == self.options.importer_name)
            .max_by_key(|b| b.id)
            .map(|b| Batch {
                total_events: state.memberships.iter().filter(|(id, _)| *id == b.id).count() as i64,
                ..b.clone()
            }))
    }

    async fn acknowledge(
        &self,
        file: &FileHash,
        batch: &Batch,
        reason: &str,
    ) -> Result<ImportEvent> {
        let mut state = self.state.lock().await;
        if state.position(&self.options.importer_name, &file.hash)?.is_some() {
            return Err(IngestError::AlreadyJournaled {
                content_hash: file.hash.clone(),
            });
        }

        let mut event = self.options.draft_event(file, batch);
        event.id = state.events.len() as i64 + 1;
        event.status = ImportStatus::Complete;
        event.summary = Some(acknowledge_summary(reason));
        event.notes = Some(reason.to_string());
        state.memberships.insert((batch.id, event.id));
        state.events.push(StoredEvent {
            event: event.clone(),
            status_key: Some(ImportStatus::Complete.as_str().to_string()),
        });
        info!(hash = %file.hash, file = %event.original_name, "Acknowledged file without importing");
        Ok(event)
    }
}
