//! In-process durable store for tests and single-node setups.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::DurableStore;
use crate::key::ContentKey;
use crate::types::{AccessHistoryEntry, Category, RequesterId, ResolvedPayload};
use crate::{MimirError, Result, sync};

struct Row {
    payload: ResolvedPayload,
    visits: u64,
}

#[derive(Default)]
struct State {
    rows: Vec<Row>,
    by_key: HashMap<ContentKey, usize>,
    history: Vec<AccessHistoryEntry>,
}

/// Durable store backed by process memory. Row ids start at 1.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visit counter for `key`, if stored.
    pub fn visits(&self, key: &ContentKey) -> Option<u64> {
        let state = sync::lock(&self.state, "store.visits");
        state.by_key.get(key).map(|&idx| state.rows[idx].visits)
    }

    /// Number of history rows recorded.
    pub fn history_len(&self) -> usize {
        sync::lock(&self.state, "store.history_len").history.len()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn find(&self, key: &ContentKey) -> Result<Option<ResolvedPayload>> {
        let state = sync::lock(&self.state, "store.find");
        Ok(state
            .by_key
            .get(key)
            .map(|&idx| state.rows[idx].payload.clone()))
    }

    async fn insert(&self, payload: &ResolvedPayload) -> Result<ResolvedPayload> {
        let mut state = sync::lock(&self.state, "store.insert");
        if let Some(&idx) = state.by_key.get(&payload.key) {
            return Ok(state.rows[idx].payload.clone());
        }
        let idx = state.rows.len();
        let stored = payload.clone().with_owner(idx as i64 + 1);
        state.rows.push(Row {
            payload: stored.clone(),
            visits: 0,
        });
        state.by_key.insert(stored.key.clone(), idx);
        Ok(stored)
    }

    async fn count(&self) -> Result<u64> {
        Ok(sync::lock(&self.state, "store.count").rows.len() as u64)
    }

    async fn keys(&self) -> Result<Vec<ContentKey>> {
        let state = sync::lock(&self.state, "store.keys");
        Ok(state.rows.iter().map(|r| r.payload.key.clone()).collect())
    }

    async fn record_access(&self, entry: &AccessHistoryEntry) -> Result<()> {
        let mut state = sync::lock(&self.state, "store.record_access");
        let idx = row_index(entry.payload_owner_id)
            .filter(|&idx| idx < state.rows.len())
            .ok_or_else(|| {
                MimirError::Store(format!("no payload with id {}", entry.payload_owner_id))
            })?;
        state.rows[idx].visits += 1;
        state.history.push(entry.clone());
        Ok(())
    }

    async fn recent_history(
        &self,
        requester: RequesterId,
        limit: usize,
    ) -> Result<Vec<ResolvedPayload>> {
        let state = sync::lock(&self.state, "store.recent_history");
        // history is appended in time order, so walking it backwards is newest-first
        Ok(state
            .history
            .iter()
            .rev()
            .filter(|e| e.requester_id == requester)
            .filter_map(|e| row_index(e.payload_owner_id).and_then(|idx| state.rows.get(idx)))
            .take(limit)
            .map(|r| r.payload.clone())
            .collect())
    }

    async fn hottest(&self, category: Category, limit: usize) -> Result<Vec<ResolvedPayload>> {
        let state = sync::lock(&self.state, "store.hottest");
        let mut rows: Vec<&Row> = state
            .rows
            .iter()
            .filter(|r| r.payload.category == category)
            .collect();
        rows.sort_by(|a, b| b.visits.cmp(&a.visits));
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|r| r.payload.clone())
            .collect())
    }
}

/// Row position for a 1-based payload id.
fn row_index(id: i64) -> Option<usize> {
    id.checked_sub(1).and_then(|idx| usize::try_from(idx).ok())
}
