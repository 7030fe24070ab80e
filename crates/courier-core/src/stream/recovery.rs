//! Time-bounded recovery checkpoints for interrupted streams.
//!
//! A checkpoint records how far a stream got (last chunk index and the
//! content so far). It can be loaded to resume the stream until the recovery
//! window elapses; after that it is treated as absent and purged.

use std::time::Duration;

use chrono::Utc;
use courier_types::stream::RecoveryCheckpoint;
use dashmap::DashMap;
use tracing::debug;

pub struct RecoveryStore {
    checkpoints: DashMap<String, RecoveryCheckpoint>,
    window: Duration,
}

impl RecoveryStore {
    pub fn new(window: Duration) -> Self {
        Self {
            checkpoints: DashMap::new(),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn is_expired(&self, checkpoint: &RecoveryCheckpoint) -> bool {
        Utc::now()
            .signed_duration_since(checkpoint.created_at)
            .to_std()
            .is_ok_and(|age| age > self.window)
    }

    /// Save (or overwrite) the checkpoint for its stream.
    pub fn save(&self, checkpoint: RecoveryCheckpoint) {
        debug!(
            stream_id = %checkpoint.stream_id,
            last_chunk_index = checkpoint.last_chunk_index,
            "checkpoint saved"
        );
        self.checkpoints
            .insert(checkpoint.stream_id.clone(), checkpoint);
    }

    /// The checkpoint for `stream_id` if it is still inside the window.
    /// An expired checkpoint is dropped.
    pub fn load(&self, stream_id: &str) -> Option<RecoveryCheckpoint> {
        if self
            .checkpoints
            .remove_if(stream_id, |_, cp| self.is_expired(cp))
            .is_some()
        {
            debug!(stream_id, "checkpoint expired");
            return None;
        }
        self.checkpoints.get(stream_id).map(|cp| cp.clone())
    }

    pub fn remove(&self, stream_id: &str) -> bool {
        self.checkpoints.remove(stream_id).is_some()
    }

    /// Drop every expired checkpoint. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let before = self.checkpoints.len();
        self.checkpoints.retain(|_, cp| !self.is_expired(cp));
        let purged = before.saturating_sub(self.checkpoints.len());
        if purged > 0 {
            debug!(purged, "expired checkpoints purged");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn checkpoint(id: &str, age_secs: i64) -> RecoveryCheckpoint {
        RecoveryCheckpoint {
            stream_id: id.into(),
            session_id: "s1".into(),
            agent_id: None,
            last_chunk_index: 10,
            content: "ten words so far".into(),
            created_at: Utc::now() - ChronoDuration::seconds(age_secs),
        }
    }

    #[test]
    fn test_load_within_window() {
        let store = RecoveryStore::new(Duration::from_secs(30));
        store.save(checkpoint("stream_a", 5));
        let cp = store.load("stream_a").unwrap();
        assert_eq!(cp.last_chunk_index, 10);
        assert!(store.load("missing").is_none());
    }

    #[test]
    fn test_expired_checkpoint_is_absent_and_dropped() {
        let store = RecoveryStore::new(Duration::from_secs(30));
        store.save(checkpoint("stream_old", 60));
        assert!(store.load("stream_old").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_save_overwrites() {
        let store = RecoveryStore::new(Duration::from_secs(30));
        store.save(checkpoint("stream_a", 0));
        let mut newer = checkpoint("stream_a", 0);
        newer.last_chunk_index = 20;
        store.save(newer);
        assert_eq!(store.len(), 1);
        assert_eq!(store.load("stream_a").unwrap().last_chunk_index, 20);
    }

    #[test]
    fn test_purge_expired() {
        let store = RecoveryStore::new(Duration::from_secs(30));
        store.save(checkpoint("fresh", 1));
        store.save(checkpoint("stale_1", 45));
        store.save(checkpoint("stale_2", 90));
        assert_eq!(store.purge_expired(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.remove("fresh"));
        assert!(!store.remove("fresh"));
    }
}
