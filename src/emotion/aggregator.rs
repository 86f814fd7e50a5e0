//! Correlates detected emotions with the track each user is listening to.
//!
//! Every user has at most one [`ActiveState`]: the track currently playing and the
//! histogram of emotions seen while it played. When the track changes the histogram is
//! finalized: its majority label is upserted through the [`EmotionSink`] and the
//! histogram is thrown away. A later replay of the same track starts from scratch and
//! overwrites the stored row.
//!
//! Calls for the same user are serialized by a per-user async lock, which is also held
//! across the sink upsert so that a user's finalizations reach the store in order.
//! Different users never contend on anything but the short map lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::histogram::EmotionHistogram;
use super::sink::{EmotionSink, PendingRecords, SinkFailurePolicy};
use crate::server::metrics;
use crate::tracking::TrackSnapshot;
use crate::user::SongEmotionRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveState {
    pub current_track: TrackSnapshot,
    pub histogram: EmotionHistogram,
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub sink_timeout: Duration,
    pub failure_policy: SinkFailurePolicy,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            sink_timeout: Duration::from_millis(5000),
            failure_policy: SinkFailurePolicy::Discard,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Persisted,
    Failed,
    Queued,
    Empty,
}

impl FinalizeOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            FinalizeOutcome::Persisted => "persisted",
            FinalizeOutcome::Failed => "failed",
            FinalizeOutcome::Queued => "queued",
            FinalizeOutcome::Empty => "empty",
        }
    }
}

type UserSlot = Arc<tokio::sync::Mutex<Option<ActiveState>>>;

pub struct EmotionAggregator {
    sink: Arc<dyn EmotionSink>,
    config: AggregatorConfig,
    users: Mutex<HashMap<usize, UserSlot>>,
    pending: Mutex<PendingRecords>,
}

fn normalize_label(label: Option<&str>) -> Option<&str> {
    label.map(str::trim).filter(|l| !l.is_empty())
}

impl EmotionAggregator {
    pub fn new(sink: Arc<dyn EmotionSink>, config: AggregatorConfig) -> Self {
        let max_pending = match config.failure_policy {
            SinkFailurePolicy::RetryQueue { max_pending } => max_pending,
            SinkFailurePolicy::Discard => 0,
        };
        Self {
            sink,
            config,
            users: Mutex::new(HashMap::new()),
            pending: Mutex::new(PendingRecords::new(max_pending)),
        }
    }

    /// Applies one frame's observation for `user_id`.
    ///
    /// A track id different from the stored one (including to or from nothing playing)
    /// finalizes the previous track. The emotion, if any, is then counted against the
    /// current track.
    pub async fn observe(&self, user_id: usize, snapshot: &TrackSnapshot, emotion: Option<&str>) {
        self.observe_if(user_id, snapshot, emotion, || true).await
    }

    /// Like [`EmotionAggregator::observe`], but drops the observation when `still_valid`
    /// returns false once the user's lock is held. Lets a caller discard frames that a
    /// concurrent [`EmotionAggregator::flush_all`] already accounted for.
    pub async fn observe_if<F>(
        &self,
        user_id: usize,
        snapshot: &TrackSnapshot,
        emotion: Option<&str>,
        still_valid: F,
    ) where
        F: Fn() -> bool,
    {
        let snapshot = snapshot.clone().normalized();
        let emotion = normalize_label(emotion);

        let slot = if snapshot.is_playing() {
            self.slot_or_create(user_id)
        } else {
            match self.slot(user_id) {
                Some(slot) => slot,
                None => return,
            }
        };

        'observe: {
            let mut state = slot.lock().await;
            if !still_valid() {
                debug!("Dropping stale observation for user {}", user_id);
                break 'observe;
            }
            let current_track_id = state
                .as_ref()
                .and_then(|s| s.current_track.track_id.as_deref());

            if current_track_id != snapshot.track_id.as_deref() {
                if let Some(previous) = state.take() {
                    debug!(
                        "User {} track changed from {:?} to {:?}",
                        user_id, previous.current_track.track_id, snapshot.track_id
                    );
                    self.finalize_state(user_id, previous).await;
                }
                if snapshot.is_playing() {
                    *state = Some(ActiveState {
                        current_track: snapshot,
                        histogram: EmotionHistogram::new(),
                    });
                }
            }

            if let (Some(emotion), Some(active)) = (emotion, state.as_mut()) {
                active.histogram.record(emotion);
            }
        }

        self.prune(user_id, slot);
    }

    /// Persists the majority emotion of the user's current track and starts a fresh
    /// histogram for it. Does nothing without an active track or observations.
    pub async fn finalize(&self, user_id: usize) -> FinalizeOutcome {
        let Some(slot) = self.slot(user_id) else {
            return FinalizeOutcome::Empty;
        };
        let outcome = {
            let mut state = slot.lock().await;
            match state.as_mut() {
                Some(active) if !active.histogram.is_empty() => {
                    let finished = ActiveState {
                        current_track: active.current_track.clone(),
                        histogram: std::mem::take(&mut active.histogram),
                    };
                    self.finalize_state(user_id, finished).await
                }
                _ => FinalizeOutcome::Empty,
            }
        };
        self.prune(user_id, slot);
        outcome
    }

    /// Finalizes the user's current track and forgets the user. Used when the user's
    /// stream goes away.
    pub async fn release(&self, user_id: usize) -> FinalizeOutcome {
        let Some(slot) = self.slot(user_id) else {
            return FinalizeOutcome::Empty;
        };
        let outcome = {
            let mut state = slot.lock().await;
            match state.take() {
                Some(previous) => self.finalize_state(user_id, previous).await,
                None => FinalizeOutcome::Empty,
            }
        };
        self.prune(user_id, slot);
        outcome
    }

    /// Finalizes every user's active track, then clears all active state.
    pub async fn flush_all(&self) {
        let slots: Vec<(usize, UserSlot)> = {
            let users = self.users.lock().unwrap();
            users.iter().map(|(id, slot)| (*id, slot.clone())).collect()
        };
        if slots.is_empty() {
            return;
        }
        info!("Flushing active song emotions of {} users", slots.len());

        for (user_id, slot) in slots {
            {
                let mut state = slot.lock().await;
                if let Some(previous) = state.take() {
                    self.finalize_state(user_id, previous).await;
                }
            }
            self.prune(user_id, slot);
        }
    }

    /// Drops the user's active state without persisting anything.
    pub async fn reset(&self, user_id: usize) {
        let Some(slot) = self.slot(user_id) else {
            return;
        };
        {
            let mut state = slot.lock().await;
            if let Some(dropped) = state.take() {
                let counts: Vec<String> = dropped
                    .histogram
                    .iter()
                    .map(|(label, count)| format!("{}={}", label, count))
                    .collect();
                warn!(
                    "Discarding {} observations ({}) of track {:?} for user {}",
                    dropped.histogram.total(),
                    counts.join(", "),
                    dropped.current_track.track_id,
                    user_id
                );
            }
        }
        self.prune(user_id, slot);
    }

    /// Copy of the user's active state, if any.
    pub async fn active_state(&self, user_id: usize) -> Option<ActiveState> {
        let slot = self.slot(user_id)?;
        let state = slot.lock().await;
        state.clone()
    }

    pub fn has_active_state(&self, user_id: usize) -> bool {
        self.users.lock().unwrap().contains_key(&user_id)
    }

    pub fn active_user_count(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Retries every queued record under its user's lock. Returns how many were
    /// persisted.
    pub async fn retry_pending(&self) -> usize {
        let entries = self.pending.lock().unwrap().entries();
        let mut persisted = 0;

        for (seq, user_id) in entries {
            let slot = self.slot_or_create(user_id);
            {
                let _state = slot.lock().await;
                // A newer finalization of the same song may have replaced it meanwhile.
                let record = self.pending.lock().unwrap().get(seq);
                if let Some(record) = record {
                    if self.retry_record(seq, &record).await {
                        persisted += 1;
                    }
                }
            }
            self.prune(user_id, slot);
        }

        metrics::set_sink_pending_records(self.pending_count());
        persisted
    }

    async fn retry_record(&self, seq: u64, record: &SongEmotionRecord) -> bool {
        match tokio::time::timeout(self.config.sink_timeout, self.sink.upsert(record)).await {
            Ok(Ok(())) => {
                self.pending.lock().unwrap().remove_seq(seq);
                metrics::record_song_finalization(FinalizeOutcome::Persisted.as_str());
                true
            }
            Ok(Err(err)) => {
                debug!(
                    "Retry of song {} for user {} failed: {:#}",
                    record.song_id, record.user_id, err
                );
                false
            }
            Err(_) => {
                debug!(
                    "Retry of song {} for user {} timed out",
                    record.song_id, record.user_id
                );
                false
            }
        }
    }

    /// Periodically retries queued records until `shutdown` is cancelled. Returns None
    /// when failed upserts are discarded.
    pub fn spawn_retry_task(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if self.config.failure_policy == SinkFailurePolicy::Discard {
            return None;
        }
        let aggregator = self.clone();
        Some(tokio::spawn(async move {
            info!(
                "Song emotion retry task starting (interval={}s)",
                interval.as_secs()
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if aggregator.pending_count() > 0 {
                            let persisted = aggregator.retry_pending().await;
                            info!(
                                "Retried pending song emotions: {} persisted, {} still pending",
                                persisted,
                                aggregator.pending_count()
                            );
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("Song emotion retry task shutting down");
                        break;
                    }
                }
            }
        }))
    }

    /// Must be called with the user's lock held.
    async fn finalize_state(&self, user_id: usize, state: ActiveState) -> FinalizeOutcome {
        let outcome = self.persist(user_id, state).await;
        metrics::record_song_finalization(outcome.as_str());
        outcome
    }

    async fn persist(&self, user_id: usize, state: ActiveState) -> FinalizeOutcome {
        let ActiveState {
            current_track,
            histogram,
        } = state;
        let (Some(song_id), Some(majority)) = (current_track.track_id, histogram.majority())
        else {
            return FinalizeOutcome::Empty;
        };

        let record = SongEmotionRecord {
            user_id,
            song_id,
            song_name: current_track.name,
            artist_name: current_track.artist,
            emotion: majority.to_string(),
        };

        let error = match tokio::time::timeout(self.config.sink_timeout, self.sink.upsert(&record))
            .await
        {
            Ok(Ok(())) => {
                debug!(
                    "Stored emotion {} for song {} of user {}",
                    record.emotion, record.song_id, user_id
                );
                let mut pending = self.pending.lock().unwrap();
                pending.remove_key(user_id, &record.song_id);
                metrics::set_sink_pending_records(pending.len());
                return FinalizeOutcome::Persisted;
            }
            Ok(Err(err)) => format!("{:#}", err),
            Err(_) => format!("timed out after {}ms", self.config.sink_timeout.as_millis()),
        };

        match self.config.failure_policy {
            SinkFailurePolicy::Discard => {
                warn!(
                    "Dropping emotion {} for song {} of user {}: {}",
                    record.emotion, record.song_id, user_id, error
                );
                FinalizeOutcome::Failed
            }
            SinkFailurePolicy::RetryQueue { .. } => {
                warn!(
                    "Queueing emotion {} for song {} of user {} for retry: {}",
                    record.emotion, record.song_id, user_id, error
                );
                let mut pending = self.pending.lock().unwrap();
                if let Some(evicted) = pending.push(record) {
                    warn!(
                        "Pending queue full, dropped emotion for song {} of user {}",
                        evicted.song_id, evicted.user_id
                    );
                }
                metrics::set_sink_pending_records(pending.len());
                FinalizeOutcome::Queued
            }
        }
    }

    fn slot(&self, user_id: usize) -> Option<UserSlot> {
        self.users.lock().unwrap().get(&user_id).cloned()
    }

    fn slot_or_create(&self, user_id: usize) -> UserSlot {
        self.users
            .lock()
            .unwrap()
            .entry(user_id)
            .or_default()
            .clone()
    }

    /// Forgets the user's slot once it is empty and nobody else holds it.
    fn prune(&self, user_id: usize, slot: UserSlot) {
        let mut users = self.users.lock().unwrap();
        let Some(current) = users.get(&user_id) else {
            return;
        };
        if !Arc::ptr_eq(current, &slot) || Arc::strong_count(&slot) != 2 {
            return;
        }
        let is_empty = match slot.try_lock() {
            Ok(state) => state.is_none(),
            Err(_) => false,
        };
        if is_empty {
            users.remove(&user_id);
        }
    }
}
