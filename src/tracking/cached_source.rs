use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{TrackSnapshot, TrackSource};

/// Wraps a [`TrackSource`] so that it is polled at most once per `poll_interval` for
/// each user. In between, the last snapshot is returned.
pub struct CachedTrackSource {
    inner: Arc<dyn TrackSource>,
    poll_interval: Duration,
    cache: Mutex<HashMap<usize, (Instant, TrackSnapshot)>>,
}

impl CachedTrackSource {
    pub fn new(inner: Arc<dyn TrackSource>, poll_interval: Duration) -> Self {
        Self {
            inner,
            poll_interval,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TrackSource for CachedTrackSource {
    async fn poll(&self, user_id: usize) -> TrackSnapshot {
        if let Some((polled_at, snapshot)) = self.cache.lock().await.get(&user_id) {
            if polled_at.elapsed() < self.poll_interval {
                return snapshot.clone();
            }
        }

        let snapshot = self.inner.poll(user_id).await;
        self.cache
            .lock()
            .await
            .insert(user_id, (Instant::now(), snapshot.clone()));
        snapshot
    }
}
