//! Where finished song emotions end up.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::user::{SongEmotionRecord, SongEmotionStore};

#[async_trait]
pub trait EmotionSink: Send + Sync {
    /// Inserts or overwrites the row keyed by (user_id, song_id).
    async fn upsert(&self, record: &SongEmotionRecord) -> Result<()>;
}

/// Sink backed by the user database. The store is synchronous, so every upsert runs on
/// the blocking pool.
pub struct StoreEmotionSink {
    store: Arc<dyn SongEmotionStore>,
}

impl StoreEmotionSink {
    pub fn new(store: Arc<dyn SongEmotionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EmotionSink for StoreEmotionSink {
    async fn upsert(&self, record: &SongEmotionRecord) -> Result<()> {
        let store = self.store.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || store.upsert_song_emotion(&record))
            .await
            .context("Song emotion upsert task panicked")?
    }
}

/// What happens to a record whose upsert failed or timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkFailurePolicy {
    /// Log and drop the record.
    #[default]
    Discard,
    /// Keep up to `max_pending` records in memory and retry them later.
    RetryQueue { max_pending: usize },
}

#[derive(Debug, Clone)]
pub(crate) struct PendingRecord {
    pub seq: u64,
    pub record: SongEmotionRecord,
}

/// Bounded queue of failed upserts, at most one per (user, song).
#[derive(Debug)]
pub(crate) struct PendingRecords {
    max_pending: usize,
    next_seq: u64,
    records: VecDeque<PendingRecord>,
}

impl PendingRecords {
    pub fn new(max_pending: usize) -> Self {
        Self {
            max_pending,
            next_seq: 0,
            records: VecDeque::new(),
        }
    }

    /// Queues the record, replacing any older one for the same key. Returns the record
    /// that was evicted to stay within capacity, if any.
    pub fn push(&mut self, record: SongEmotionRecord) -> Option<SongEmotionRecord> {
        self.remove_key(record.user_id, &record.song_id);
        if self.max_pending == 0 {
            return Some(record);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.push_back(PendingRecord { seq, record });
        if self.records.len() > self.max_pending {
            return self.records.pop_front().map(|p| p.record);
        }
        None
    }

    pub fn remove_key(&mut self, user_id: usize, song_id: &str) {
        self.records
            .retain(|p| !(p.record.user_id == user_id && p.record.song_id == song_id));
    }

    pub fn get(&self, seq: u64) -> Option<SongEmotionRecord> {
        self.records
            .iter()
            .find(|p| p.seq == seq)
            .map(|p| p.record.clone())
    }

    pub fn remove_seq(&mut self, seq: u64) {
        self.records.retain(|p| p.seq != seq);
    }

    /// (seq, user_id) of every queued record, oldest first.
    pub fn entries(&self) -> Vec<(u64, usize)> {
        self.records
            .iter()
            .map(|p| (p.seq, p.record.user_id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}
