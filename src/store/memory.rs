use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ChatStore, ConversationQuery, MessageWindow, StoreError};
use crate::models::{
    Conversation, ConversationSummary, Message, MessagePosition, NewMessage, NewReport, ReadState,
    Report,
};

struct KeyClaim {
    message_id: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    conversations: HashMap<Uuid, Conversation>,
    /// canonical pair -> conversation id
    pairs: HashMap<(Uuid, Uuid), Uuid>,
    /// user -> conversation ids
    by_user: HashMap<Uuid, HashSet<Uuid>>,
    messages: HashMap<Uuid, Message>,
    /// conversation -> ordered message log
    logs: HashMap<Uuid, BTreeMap<MessagePosition, Uuid>>,
    keys: HashMap<(Uuid, Uuid, String), KeyClaim>,
    read_states: HashMap<(Uuid, Uuid), ReadState>,
    blocks: HashMap<(Uuid, Uuid), DateTime<Utc>>,
    reports: Vec<Report>,
}

impl Inner {
    fn pair_blocked(&self, a: Uuid, b: Uuid) -> bool {
        self.blocks.contains_key(&(a, b)) || self.blocks.contains_key(&(b, a))
    }

    fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> i64 {
        let Some(log) = self.logs.get(&conversation_id) else {
            return 0;
        };
        let lower = match self.read_states.get(&(conversation_id, user_id)) {
            Some(state) => Bound::Excluded(state.position()),
            None => Bound::Unbounded,
        };

        log.range((lower, Bound::Unbounded))
            .filter_map(|(_, id)| self.messages.get(id))
            .filter(|m| m.sender_id != user_id)
            .count() as i64
    }

    fn collect(&self, ids: impl Iterator<Item = Uuid>) -> Vec<Message> {
        ids.filter_map(|id| self.messages.get(&id).cloned()).collect()
    }
}

/// Where an injected [`StoreError::Unavailable`] fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// `insert_message` fails before writing anything
    InsertMessage,
    /// `insert_message` commits, then reports failure (lost acknowledgment)
    InsertMessageAck,
    /// `refresh_blocked_flag` fails before touching the flag
    RefreshBlockedFlag,
}

/// In-process store with the same semantics as the Postgres schema
#[derive(Default)]
pub struct MemoryChatStore {
    inner: RwLock<Inner>,
    failures: DashMap<FailPoint, usize>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls through `point` fail with [`StoreError::Unavailable`]
    pub fn fail_next(&self, point: FailPoint, n: usize) {
        self.failures.insert(point, n);
    }

    /// Shorthand for failing the next `n` message inserts before they write
    pub fn inject_transient_failures(&self, n: usize) {
        self.fail_next(FailPoint::InsertMessage, n);
    }

    fn take_failure(&self, point: FailPoint) -> Result<(), StoreError> {
        let Some(mut remaining) = self.failures.get_mut(&point) else {
            return Ok(());
        };
        if *remaining == 0 {
            return Ok(());
        }
        *remaining -= 1;
        Err(StoreError::Unavailable(format!("injected failure at {point:?}")))
    }

    pub async fn message_count(&self, conversation_id: Uuid) -> usize {
        let inner = self.inner.read().await;
        inner.logs.get(&conversation_id).map_or(0, |log| log.len())
    }

    pub async fn reports(&self) -> Vec<Report> {
        self.inner.read().await.reports.clone()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn open_conversation(
        &self,
        a: Uuid,
        b: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(Conversation, bool), StoreError> {
        let pair = Conversation::canonical_pair(a, b);
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner
            .pairs
            .get(&pair)
            .and_then(|id| inner.conversations.get(id))
        {
            return Ok((existing.clone(), false));
        }

        let conversation = Conversation {
            id: Uuid::new_v4(),
            participant_low: pair.0,
            participant_high: pair.1,
            blocked: inner.pair_blocked(a, b),
            created_at: now,
            last_message_at: None,
        };

        inner.pairs.insert(pair, conversation.id);
        for user in conversation.participants() {
            inner.by_user.entry(user).or_default().insert(conversation.id);
        }
        inner
            .conversations
            .insert(conversation.id, conversation.clone());

        Ok((conversation, true))
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError> {
        Ok(self.inner.read().await.conversations.get(&id).cloned())
    }

    async fn find_conversation_by_pair(
        &self,
        a: Uuid,
        b: Uuid,
    ) -> Result<Option<Conversation>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .pairs
            .get(&Conversation::canonical_pair(a, b))
            .and_then(|id| inner.conversations.get(id))
            .cloned())
    }

    async fn list_conversations(
        &self,
        user_id: Uuid,
        query: &ConversationQuery,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let inner = self.inner.read().await;
        let Some(ids) = inner.by_user.get(&user_id) else {
            return Ok(Vec::new());
        };

        let mut page: Vec<ConversationSummary> = ids
            .iter()
            .filter_map(|id| inner.conversations.get(id))
            .filter(|c| query.before.map_or(true, |before| c.position() < before))
            .map(|c| ConversationSummary {
                conversation: c.clone(),
                unread_count: inner.unread_count(c.id, user_id),
            })
            .filter(|s| !query.unread_only || s.unread_count > 0)
            .collect();

        page.sort_by(|a, b| b.conversation.position().cmp(&a.conversation.position()));
        page.truncate(query.limit);
        Ok(page)
    }

    async fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> Result<i64, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .unread_count(conversation_id, user_id))
    }

    async fn find_message_by_key(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Message>, StoreError> {
        let inner = self.inner.read().await;
        let key = (conversation_id, sender_id, idempotency_key.to_string());

        Ok(inner
            .keys
            .get(&key)
            .filter(|claim| claim.expires_at > now)
            .and_then(|claim| inner.messages.get(&claim.message_id))
            .cloned())
    }

    async fn insert_message(
        &self,
        message: &NewMessage,
        key_expires_at: Option<DateTime<Utc>>,
    ) -> Result<Message, StoreError> {
        self.take_failure(FailPoint::InsertMessage)?;

        let mut inner = self.inner.write().await;

        if !inner.conversations.contains_key(&message.conversation_id) {
            return Err(StoreError::Backend(format!(
                "conversation {} does not exist",
                message.conversation_id
            )));
        }

        if let (Some(key), Some(expires_at)) = (&message.idempotency_key, key_expires_at) {
            let claim_key = (message.conversation_id, message.sender_id, key.clone());
            let live = inner
                .keys
                .get(&claim_key)
                .is_some_and(|claim| claim.expires_at > message.created_at);
            if live {
                return Err(StoreError::UniqueViolation);
            }
            inner.keys.insert(
                claim_key,
                KeyClaim {
                    message_id: message.id,
                    expires_at,
                },
            );
        }

        let stored = message.clone().into_message();
        inner
            .logs
            .entry(stored.conversation_id)
            .or_default()
            .insert(stored.position(), stored.id);
        inner.messages.insert(stored.id, stored.clone());

        if let Some(conversation) = inner.conversations.get_mut(&stored.conversation_id) {
            let latest = conversation.last_message_at.map_or(stored.created_at, |at| {
                at.max(stored.created_at)
            });
            conversation.last_message_at = Some(latest);
        }
        drop(inner);

        self.take_failure(FailPoint::InsertMessageAck)?;
        Ok(stored)
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        Ok(self.inner.read().await.messages.get(&id).cloned())
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        window: MessageWindow,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        let Some(log) = inner.logs.get(&conversation_id) else {
            return Ok(Vec::new());
        };

        let messages = match window {
            MessageWindow::After(position) => inner.collect(
                log.range((Bound::Excluded(position), Bound::Unbounded))
                    .take(limit)
                    .map(|(_, id)| *id),
            ),
            MessageWindow::Before(position) => {
                let mut page =
                    inner.collect(log.range(..position).rev().take(limit).map(|(_, id)| *id));
                page.reverse();
                page
            }
            MessageWindow::Latest => {
                let mut page = inner.collect(log.iter().rev().take(limit).map(|(_, id)| *id));
                page.reverse();
                page
            }
        };

        Ok(messages)
    }

    async fn get_read_state(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ReadState>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .read_states
            .get(&(conversation_id, user_id))
            .cloned())
    }

    async fn list_read_states(&self, conversation_id: Uuid) -> Result<Vec<ReadState>, StoreError> {
        let inner = self.inner.read().await;
        let mut states: Vec<ReadState> = inner
            .read_states
            .values()
            .filter(|s| s.conversation_id == conversation_id)
            .cloned()
            .collect();
        states.sort_by_key(|s| s.user_id);
        Ok(states)
    }

    async fn advance_read_state(
        &self,
        user_id: Uuid,
        up_to: &Message,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let key = (up_to.conversation_id, user_id);

        if let Some(current) = inner.read_states.get(&key) {
            if current.position() >= up_to.position() {
                return Ok(false);
            }
        }

        inner.read_states.insert(
            key,
            ReadState {
                conversation_id: up_to.conversation_id,
                user_id,
                last_read_message_id: up_to.id,
                last_read_message_created_at: up_to.created_at,
                last_read_at: now,
            },
        );

        let newly_read: Vec<Uuid> = inner
            .logs
            .get(&up_to.conversation_id)
            .map(|log| log.range(..=up_to.position()).map(|(_, id)| *id).collect())
            .unwrap_or_default();

        for id in newly_read {
            if let Some(message) = inner.messages.get_mut(&id) {
                if message.sender_id != user_id && message.read_at.is_none() {
                    message.read_at = Some(now);
                }
            }
        }

        Ok(true)
    }

    async fn insert_block(
        &self,
        blocker_id: Uuid,
        target_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.blocks.contains_key(&(blocker_id, target_id)) {
            return Ok(false);
        }
        inner.blocks.insert((blocker_id, target_id), now);
        Ok(true)
    }

    async fn delete_block(&self, blocker_id: Uuid, target_id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .write()
            .await
            .blocks
            .remove(&(blocker_id, target_id))
            .is_some())
    }

    async fn refresh_blocked_flag(
        &self,
        a: Uuid,
        b: Uuid,
    ) -> Result<Option<Conversation>, StoreError> {
        self.take_failure(FailPoint::RefreshBlockedFlag)?;

        let mut inner = self.inner.write().await;
        let blocked = inner.pair_blocked(a, b);
        let Some(id) = inner.pairs.get(&Conversation::canonical_pair(a, b)).copied() else {
            return Ok(None);
        };

        Ok(inner.conversations.get_mut(&id).map(|conversation| {
            conversation.blocked = blocked;
            conversation.clone()
        }))
    }

    async fn insert_report(&self, report: &NewReport) -> Result<Report, StoreError> {
        let stored = report.clone().into_report();
        self.inner.write().await.reports.push(stored.clone());
        Ok(stored)
    }

    async fn purge_expired_idempotency_keys(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.keys.len();
        inner.keys.retain(|_, claim| claim.expires_at > now);
        Ok((before - inner.keys.len()) as u64)
    }
}
