use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-conversation write lock
///
/// Holding the guard across commit and fan-out makes `created_at` strictly increasing in
/// commit order and keeps delivery order equal to commit order. Different conversations
/// never contend.
#[derive(Clone, Default)]
pub struct ConversationLocks {
    inner: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, conversation_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self.inner.entry(conversation_id).or_default().value().clone();
        lock.lock_owned().await
    }

    /// Drop locks nobody holds or waits on; returns how many were removed
    pub fn prune(&self) -> usize {
        let before = self.inner.len();
        self.inner.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.inner.len())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
