use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::ConversationParticipant;
use crate::models::{NewReport, Report, ReportReason};
use crate::services::now_micros;
use crate::services::ordering::ConversationLocks;
use crate::services::rate_limiter::{Bucket, RateLimiter};
use crate::store::ChatStore;
use crate::websocket::{ConnectionRegistry, OutboundEvent};

pub const MAX_REPORT_COMMENT_CHARS: usize = 1000;

#[derive(Debug, Clone)]
pub struct FileReport {
    pub conversation_id: Uuid,
    pub message_id: Option<Uuid>,
    pub reason: ReportReason,
    pub comment: Option<String>,
}

/// Directed block edges and the append-only report log
#[derive(Clone)]
pub struct SafetyLedger {
    store: Arc<dyn ChatStore>,
    limiter: Arc<RateLimiter>,
    locks: ConversationLocks,
    registry: ConnectionRegistry,
}

impl SafetyLedger {
    pub fn new(
        store: Arc<dyn ChatStore>,
        limiter: Arc<RateLimiter>,
        locks: ConversationLocks,
        registry: ConnectionRegistry,
    ) -> Self {
        Self {
            store,
            limiter,
            locks,
            registry,
        }
    }

    /// `true` when a new edge was created; blocking again is a no-op
    pub async fn block(&self, blocker_id: Uuid, target_id: Uuid) -> AppResult<bool> {
        self.limiter.enforce(blocker_id, Bucket::Block)?;
        if blocker_id == target_id {
            return Err(AppError::Validation("cannot block yourself".into()));
        }

        let created = self.store.insert_block(blocker_id, target_id, now_micros()).await?;
        if created {
            tracing::info!(blocker_id = %blocker_id, target_id = %target_id, "user blocked");
        }
        // a repeat call also repairs a flag left stale by an earlier failed refresh
        self.refresh_conversation(blocker_id, target_id).await?;
        Ok(created)
    }

    /// Removes only the caller's own edge; `true` when one existed
    pub async fn unblock(&self, blocker_id: Uuid, target_id: Uuid) -> AppResult<bool> {
        if blocker_id == target_id {
            return Err(AppError::Validation("cannot unblock yourself".into()));
        }

        let removed = self.store.delete_block(blocker_id, target_id).await?;
        if removed {
            tracing::info!(blocker_id = %blocker_id, target_id = %target_id, "user unblocked");
        }
        self.refresh_conversation(blocker_id, target_id).await?;
        Ok(removed)
    }

    /// Recompute the pair's flag from the edges; notify only when it flips
    async fn refresh_conversation(&self, a: Uuid, b: Uuid) -> AppResult<()> {
        let Some(conversation) = self.store.find_conversation_by_pair(a, b).await? else {
            return Ok(());
        };

        let _lock = self.locks.acquire(conversation.id).await;
        let previous = self
            .store
            .get_conversation(conversation.id)
            .await?
            .map_or(conversation.blocked, |c| c.blocked);

        let Some(updated) = self.store.refresh_blocked_flag(a, b).await? else {
            return Ok(());
        };
        if updated.blocked != previous {
            tracing::debug!(conversation_id = %updated.id, blocked = updated.blocked, "blocked flag changed");
            self.registry.publish(
                &updated.participants(),
                updated.id,
                &OutboundEvent::ConversationBlocked {
                    conversation_id: updated.id,
                    blocked: updated.blocked,
                },
            );
        }
        Ok(())
    }

    pub async fn report(&self, reporter_id: Uuid, req: FileReport) -> AppResult<Report> {
        self.limiter.enforce(reporter_id, Bucket::Report)?;

        let comment = req
            .comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if comment
            .as_ref()
            .is_some_and(|c| c.chars().count() > MAX_REPORT_COMMENT_CHARS)
        {
            return Err(AppError::Validation(format!(
                "comment exceeds {MAX_REPORT_COMMENT_CHARS} characters"
            )));
        }

        ConversationParticipant::verify(self.store.as_ref(), reporter_id, req.conversation_id).await?;

        if let Some(message_id) = req.message_id {
            let message = self
                .store
                .get_message(message_id)
                .await?
                .ok_or(AppError::NotFound("message"))?;
            if message.conversation_id != req.conversation_id {
                return Err(AppError::Validation(
                    "message belongs to another conversation".into(),
                ));
            }
        }

        let report = self
            .store
            .insert_report(&NewReport {
                id: Uuid::new_v4(),
                reporter_id,
                conversation_id: req.conversation_id,
                message_id: req.message_id,
                reason: req.reason,
                comment,
                created_at: now_micros(),
            })
            .await?;

        tracing::info!(
            report_id = %report.id,
            conversation_id = %report.conversation_id,
            reason = report.reason.as_str(),
            "report filed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReportStatus;
    use crate::services::rate_limiter::RateLimitConfig;
    use crate::store::{FailPoint, MemoryChatStore};
    use crate::websocket::Scope;

    fn ledger(store: Arc<MemoryChatStore>, registry: ConnectionRegistry) -> SafetyLedger {
        SafetyLedger::new(
            store,
            Arc::new(RateLimiter::new(RateLimitConfig::default())),
            ConversationLocks::new(),
            registry,
        )
    }

    #[tokio::test]
    async fn block_is_idempotent_and_notifies_both_sides() {
        let store = Arc::new(MemoryChatStore::new());
        let registry = ConnectionRegistry::new(16);
        let ledger = ledger(store.clone(), registry.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.open_conversation(a, b, now_micros()).await.unwrap();

        let (conn_a, mut rx_a) = registry.register(a);
        registry.subscribe(a, conn_a, Scope::All);
        let (conn_b, mut rx_b) = registry.register(b);
        registry.subscribe(b, conn_b, Scope::All);

        assert!(ledger.block(a, b).await.unwrap());
        assert!(!ledger.block(a, b).await.unwrap());

        for rx in [&mut rx_a, &mut rx_b] {
            assert!(matches!(
                rx.try_recv(),
                Ok(OutboundEvent::ConversationBlocked { blocked: true, .. })
            ));
            assert!(rx.try_recv().is_err(), "repeat block emits nothing");
        }
    }

    #[tokio::test]
    async fn repeat_block_repairs_a_failed_refresh() {
        let store = Arc::new(MemoryChatStore::new());
        let registry = ConnectionRegistry::new(16);
        let ledger = ledger(store.clone(), registry.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (conversation, _) = store.open_conversation(a, b, now_micros()).await.unwrap();
        let (conn_b, mut rx_b) = registry.register(b);
        registry.subscribe(b, conn_b, Scope::All);

        store.fail_next(FailPoint::RefreshBlockedFlag, 1);
        let err = ledger.block(a, b).await.unwrap_err();
        assert_eq!(err.status_code(), 503);
        let current = store.get_conversation(conversation.id).await.unwrap().unwrap();
        assert!(!current.blocked, "edge written, flag still stale");
        assert!(rx_b.try_recv().is_err());

        // edge already exists, but the retry still brings the flag in line
        assert!(!ledger.block(a, b).await.unwrap());
        let current = store.get_conversation(conversation.id).await.unwrap().unwrap();
        assert!(current.blocked);
        assert!(matches!(
            rx_b.try_recv(),
            Ok(OutboundEvent::ConversationBlocked { blocked: true, .. })
        ));
    }

    #[tokio::test]
    async fn repeat_unblock_repairs_a_failed_refresh() {
        let store = Arc::new(MemoryChatStore::new());
        let ledger = ledger(store.clone(), ConnectionRegistry::new(4));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (conversation, _) = store.open_conversation(a, b, now_micros()).await.unwrap();
        ledger.block(a, b).await.unwrap();

        store.fail_next(FailPoint::RefreshBlockedFlag, 1);
        assert!(ledger.unblock(a, b).await.is_err());
        assert!(!ledger.unblock(a, b).await.unwrap());

        let current = store.get_conversation(conversation.id).await.unwrap().unwrap();
        assert!(!current.blocked);
    }

    #[tokio::test]
    async fn self_block_is_rejected() {
        let ledger = ledger(Arc::new(MemoryChatStore::new()), ConnectionRegistry::new(4));
        let me = Uuid::new_v4();
        assert_eq!(ledger.block(me, me).await.unwrap_err().status_code(), 422);
    }

    #[tokio::test]
    async fn unblock_keeps_the_other_edge() {
        let store = Arc::new(MemoryChatStore::new());
        let ledger = ledger(store.clone(), ConnectionRegistry::new(4));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (conversation, _) = store.open_conversation(a, b, now_micros()).await.unwrap();

        ledger.block(a, b).await.unwrap();
        ledger.block(b, a).await.unwrap();
        assert!(ledger.unblock(a, b).await.unwrap());

        let current = store.get_conversation(conversation.id).await.unwrap().unwrap();
        assert!(current.blocked);

        ledger.unblock(b, a).await.unwrap();
        let current = store.get_conversation(conversation.id).await.unwrap().unwrap();
        assert!(!current.blocked);
    }

    #[tokio::test]
    async fn report_requires_participation() {
        let store = Arc::new(MemoryChatStore::new());
        let ledger = ledger(store.clone(), ConnectionRegistry::new(4));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (conversation, _) = store.open_conversation(a, b, now_micros()).await.unwrap();

        let req = FileReport {
            conversation_id: conversation.id,
            message_id: None,
            reason: ReportReason::Spam,
            comment: Some("  repeated links  ".into()),
        };

        let err = ledger.report(Uuid::new_v4(), req.clone()).await.unwrap_err();
        assert_eq!(err.status_code(), 404);

        let report = ledger.report(a, req).await.unwrap();
        assert_eq!(report.status, ReportStatus::Pending);
        assert_eq!(report.comment.as_deref(), Some("repeated links"));
        assert_eq!(store.reports().await.len(), 1);

        let current = store.get_conversation(conversation.id).await.unwrap().unwrap();
        assert!(!current.blocked, "reporting never blocks");
    }

    #[tokio::test]
    async fn report_rejects_long_comment() {
        let store = Arc::new(MemoryChatStore::new());
        let ledger = ledger(store.clone(), ConnectionRegistry::new(4));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (conversation, _) = store.open_conversation(a, b, now_micros()).await.unwrap();

        let err = ledger
            .report(
                a,
                FileReport {
                    conversation_id: conversation.id,
                    message_id: None,
                    reason: ReportReason::Other,
                    comment: Some("x".repeat(MAX_REPORT_COMMENT_CHARS + 1)),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 422);
    }
}
