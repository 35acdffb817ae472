use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Object, Pool, PoolError};
use tokio_postgres::error::SqlState;
use tokio_postgres::Row;
use uuid::Uuid;

use super::{ChatStore, ConversationQuery, MessageWindow, StoreError};
use crate::models::{
    Conversation, ConversationSummary, Message, NewMessage, NewReport, ReadState, Report,
};

const CONVERSATION_COLUMNS: &str =
    "id, participant_low, participant_high, blocked, created_at, last_message_at";

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, content, content_type, created_at, idempotency_key, read_at";

const READ_STATE_COLUMNS: &str =
    "conversation_id, user_id, last_read_message_id, last_read_message_created_at, last_read_at";

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
            return StoreError::UniqueViolation;
        }
        // no SQLSTATE means the failure happened below the protocol (io, closed socket, timeout)
        if e.is_closed() || e.code().is_none() {
            return StoreError::Unavailable(e.to_string());
        }
        StoreError::Backend(e.to_string())
    }
}

impl From<PoolError> for StoreError {
    fn from(e: PoolError) -> Self {
        StoreError::Unavailable(format!("get connection: {e}"))
    }
}

fn conversation_from_row(row: &Row) -> Conversation {
    Conversation {
        id: row.get("id"),
        participant_low: row.get("participant_low"),
        participant_high: row.get("participant_high"),
        blocked: row.get("blocked"),
        created_at: row.get("created_at"),
        last_message_at: row.get("last_message_at"),
    }
}

fn message_from_row(row: &Row) -> Result<Message, StoreError> {
    let content_type: String = row.get("content_type");
    Ok(Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        sender_id: row.get("sender_id"),
        content: row.get("content"),
        content_type: content_type.parse().map_err(StoreError::Backend)?,
        created_at: row.get("created_at"),
        idempotency_key: row.get("idempotency_key"),
        read_at: row.get("read_at"),
    })
}

fn read_state_from_row(row: &Row) -> ReadState {
    ReadState {
        conversation_id: row.get("conversation_id"),
        user_id: row.get("user_id"),
        last_read_message_id: row.get("last_read_message_id"),
        last_read_message_created_at: row.get("last_read_message_created_at"),
        last_read_at: row.get("last_read_at"),
    }
}

/// Postgres-backed store on a deadpool connection pool
#[derive(Clone)]
pub struct PgChatStore {
    pool: Pool,
}

impl PgChatStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn client(&self) -> Result<Object, StoreError> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn open_conversation(
        &self,
        a: Uuid,
        b: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(Conversation, bool), StoreError> {
        let (low, high) = Conversation::canonical_pair(a, b);
        let client = self.client().await?;

        let inserted = client
            .query_opt(
                &format!(
                    "INSERT INTO conversations (id, participant_low, participant_high, blocked, created_at)
                     VALUES ($1, $2, $3,
                             EXISTS (SELECT 1 FROM blocks
                                     WHERE (blocker_id = $2 AND target_id = $3)
                                        OR (blocker_id = $3 AND target_id = $2)),
                             $4)
                     ON CONFLICT (participant_low, participant_high) DO NOTHING
                     RETURNING {CONVERSATION_COLUMNS}"
                ),
                &[&Uuid::new_v4(), &low, &high, &now],
            )
            .await?;

        if let Some(row) = inserted {
            return Ok((conversation_from_row(&row), true));
        }

        let row = client
            .query_one(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations
                     WHERE participant_low = $1 AND participant_high = $2"
                ),
                &[&low, &high],
            )
            .await?;
        Ok((conversation_from_row(&row), false))
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError> {
        let row = self
            .client()
            .await?
            .query_opt(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"),
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(conversation_from_row))
    }

    async fn find_conversation_by_pair(
        &self,
        a: Uuid,
        b: Uuid,
    ) -> Result<Option<Conversation>, StoreError> {
        let (low, high) = Conversation::canonical_pair(a, b);
        let row = self
            .client()
            .await?
            .query_opt(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations
                     WHERE participant_low = $1 AND participant_high = $2"
                ),
                &[&low, &high],
            )
            .await?;
        Ok(row.as_ref().map(conversation_from_row))
    }

    async fn list_conversations(
        &self,
        user_id: Uuid,
        query: &ConversationQuery,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let before_at = query.before.map(|p| p.sort_at);
        let before_id = query.before.map(|p| p.id);
        let limit = query.limit as i64;

        let rows = self
            .client()
            .await?
            .query(
                "SELECT * FROM (
                     SELECT c.id, c.participant_low, c.participant_high, c.blocked,
                            c.created_at, c.last_message_at,
                            COALESCE(c.last_message_at, c.created_at) AS sort_at,
                            (SELECT COUNT(*) FROM messages m
                             LEFT JOIN read_states rs
                                    ON rs.conversation_id = m.conversation_id AND rs.user_id = $1
                             WHERE m.conversation_id = c.id
                               AND m.sender_id <> $1
                               AND (rs.user_id IS NULL
                                    OR (m.created_at, m.id)
                                       > (rs.last_read_message_created_at, rs.last_read_message_id))
                            ) AS unread_count
                     FROM conversations c
                     WHERE (c.participant_low = $1 OR c.participant_high = $1)
                       AND ($2::timestamptz IS NULL
                            OR (COALESCE(c.last_message_at, c.created_at), c.id) < ($2, $3::uuid))
                 ) s
                 WHERE NOT $4 OR s.unread_count > 0
                 ORDER BY s.sort_at DESC, s.id DESC
                 LIMIT $5",
                &[&user_id, &before_at, &before_id, &query.unread_only, &limit],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| ConversationSummary {
                conversation: conversation_from_row(row),
                unread_count: row.get("unread_count"),
            })
            .collect())
    }

    async fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> Result<i64, StoreError> {
        let row = self
            .client()
            .await?
            .query_one(
                "SELECT COUNT(*) FROM messages m
                 LEFT JOIN read_states rs
                        ON rs.conversation_id = m.conversation_id AND rs.user_id = $2
                 WHERE m.conversation_id = $1
                   AND m.sender_id <> $2
                   AND (rs.user_id IS NULL
                        OR (m.created_at, m.id)
                           > (rs.last_read_message_created_at, rs.last_read_message_id))",
                &[&conversation_id, &user_id],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn find_message_by_key(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Message>, StoreError> {
        let row = self
            .client()
            .await?
            .query_opt(
                "SELECT m.id, m.conversation_id, m.sender_id, m.content, m.content_type,
                        m.created_at, m.idempotency_key, m.read_at
                 FROM message_idempotency_keys k
                 JOIN messages m ON m.id = k.message_id
                 WHERE k.conversation_id = $1 AND k.sender_id = $2
                   AND k.idempotency_key = $3 AND k.expires_at > $4",
                &[&conversation_id, &sender_id, &idempotency_key, &now],
            )
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn insert_message(
        &self,
        message: &NewMessage,
        key_expires_at: Option<DateTime<Utc>>,
    ) -> Result<Message, StoreError> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_one(
                &format!(
                    "INSERT INTO messages
                         (id, conversation_id, sender_id, content, content_type, created_at, idempotency_key)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)
                     RETURNING {MESSAGE_COLUMNS}"
                ),
                &[
                    &message.id,
                    &message.conversation_id,
                    &message.sender_id,
                    &message.content,
                    &message.content_type.as_str(),
                    &message.created_at,
                    &message.idempotency_key,
                ],
            )
            .await?;
        let stored = message_from_row(&row)?;

        if let (Some(key), Some(expires_at)) = (&message.idempotency_key, key_expires_at) {
            // an expired claim is overwritten; a live one leaves zero rows and the insert is rolled back
            let claimed = tx
                .query_opt(
                    "INSERT INTO message_idempotency_keys
                         (conversation_id, sender_id, idempotency_key, message_id, expires_at)
                     VALUES ($1, $2, $3, $4, $5)
                     ON CONFLICT (conversation_id, sender_id, idempotency_key)
                     DO UPDATE SET message_id = EXCLUDED.message_id,
                                   expires_at = EXCLUDED.expires_at
                     WHERE message_idempotency_keys.expires_at <= $6
                     RETURNING message_id",
                    &[
                        &message.conversation_id,
                        &message.sender_id,
                        key,
                        &message.id,
                        &expires_at,
                        &message.created_at,
                    ],
                )
                .await?;

            if claimed.is_none() {
                tx.rollback().await?;
                return Err(StoreError::UniqueViolation);
            }
        }

        tx.execute(
            "UPDATE conversations
             SET last_message_at = GREATEST(COALESCE(last_message_at, $2), $2)
             WHERE id = $1",
            &[&message.conversation_id, &message.created_at],
        )
        .await?;

        tx.commit().await?;
        Ok(stored)
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        let row = self
            .client()
            .await?
            .query_opt(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        window: MessageWindow,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let client = self.client().await?;
        let limit = limit as i64;

        let rows = match window {
            MessageWindow::Latest => {
                client
                    .query(
                        &format!(
                            "SELECT {MESSAGE_COLUMNS} FROM messages
                             WHERE conversation_id = $1
                             ORDER BY created_at DESC, id DESC
                             LIMIT $2"
                        ),
                        &[&conversation_id, &limit],
                    )
                    .await?
            }
            MessageWindow::Before(pos) => {
                client
                    .query(
                        &format!(
                            "SELECT {MESSAGE_COLUMNS} FROM messages
                             WHERE conversation_id = $1 AND (created_at, id) < ($2, $3)
                             ORDER BY created_at DESC, id DESC
                             LIMIT $4"
                        ),
                        &[&conversation_id, &pos.created_at, &pos.id, &limit],
                    )
                    .await?
            }
            MessageWindow::After(pos) => {
                client
                    .query(
                        &format!(
                            "SELECT {MESSAGE_COLUMNS} FROM messages
                             WHERE conversation_id = $1 AND (created_at, id) > ($2, $3)
                             ORDER BY created_at ASC, id ASC
                             LIMIT $4"
                        ),
                        &[&conversation_id, &pos.created_at, &pos.id, &limit],
                    )
                    .await?
            }
        };

        let mut messages = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        if !matches!(window, MessageWindow::After(_)) {
            messages.reverse();
        }
        Ok(messages)
    }

    async fn get_read_state(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ReadState>, StoreError> {
        let row = self
            .client()
            .await?
            .query_opt(
                &format!(
                    "SELECT {READ_STATE_COLUMNS} FROM read_states
                     WHERE conversation_id = $1 AND user_id = $2"
                ),
                &[&conversation_id, &user_id],
            )
            .await?;
        Ok(row.as_ref().map(read_state_from_row))
    }

    async fn list_read_states(&self, conversation_id: Uuid) -> Result<Vec<ReadState>, StoreError> {
        let rows = self
            .client()
            .await?
            .query(
                &format!(
                    "SELECT {READ_STATE_COLUMNS} FROM read_states
                     WHERE conversation_id = $1 ORDER BY user_id"
                ),
                &[&conversation_id],
            )
            .await?;
        Ok(rows.iter().map(read_state_from_row).collect())
    }

    async fn advance_read_state(
        &self,
        user_id: Uuid,
        up_to: &Message,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let advanced = tx
            .query_opt(
                "INSERT INTO read_states
                     (conversation_id, user_id, last_read_message_id,
                      last_read_message_created_at, last_read_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (conversation_id, user_id) DO UPDATE
                 SET last_read_message_id = EXCLUDED.last_read_message_id,
                     last_read_message_created_at = EXCLUDED.last_read_message_created_at,
                     last_read_at = EXCLUDED.last_read_at
                 WHERE (read_states.last_read_message_created_at, read_states.last_read_message_id)
                     < (EXCLUDED.last_read_message_created_at, EXCLUDED.last_read_message_id)
                 RETURNING user_id",
                &[
                    &up_to.conversation_id,
                    &user_id,
                    &up_to.id,
                    &up_to.created_at,
                    &now,
                ],
            )
            .await?
            .is_some();

        if advanced {
            tx.execute(
                "UPDATE messages SET read_at = $5
                 WHERE conversation_id = $1
                   AND sender_id <> $2
                   AND read_at IS NULL
                   AND (created_at, id) <= ($3, $4)",
                &[
                    &up_to.conversation_id,
                    &user_id,
                    &up_to.created_at,
                    &up_to.id,
                    &now,
                ],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(advanced)
    }

    async fn insert_block(
        &self,
        blocker_id: Uuid,
        target_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let inserted = self
            .client()
            .await?
            .execute(
                "INSERT INTO blocks (blocker_id, target_id, created_at)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (blocker_id, target_id) DO NOTHING",
                &[&blocker_id, &target_id, &now],
            )
            .await?;
        Ok(inserted > 0)
    }

    async fn delete_block(&self, blocker_id: Uuid, target_id: Uuid) -> Result<bool, StoreError> {
        let deleted = self
            .client()
            .await?
            .execute(
                "DELETE FROM blocks WHERE blocker_id = $1 AND target_id = $2",
                &[&blocker_id, &target_id],
            )
            .await?;
        Ok(deleted > 0)
    }

    async fn refresh_blocked_flag(
        &self,
        a: Uuid,
        b: Uuid,
    ) -> Result<Option<Conversation>, StoreError> {
        let (low, high) = Conversation::canonical_pair(a, b);
        let row = self
            .client()
            .await?
            .query_opt(
                &format!(
                    "UPDATE conversations
                     SET blocked = EXISTS (SELECT 1 FROM blocks
                                           WHERE (blocker_id = $1 AND target_id = $2)
                                              OR (blocker_id = $2 AND target_id = $1))
                     WHERE participant_low = $1 AND participant_high = $2
                     RETURNING {CONVERSATION_COLUMNS}"
                ),
                &[&low, &high],
            )
            .await?;
        Ok(row.as_ref().map(conversation_from_row))
    }

    async fn insert_report(&self, report: &NewReport) -> Result<Report, StoreError> {
        let stored = report.clone().into_report();
        self.client()
            .await?
            .execute(
                "INSERT INTO reports
                     (id, reporter_id, conversation_id, message_id, reason, comment, status, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &stored.id,
                    &stored.reporter_id,
                    &stored.conversation_id,
                    &stored.message_id,
                    &stored.reason.as_str(),
                    &stored.comment,
                    &stored.status.as_str(),
                    &stored.created_at,
                ],
            )
            .await?;
        Ok(stored)
    }

    async fn purge_expired_idempotency_keys(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self
            .client()
            .await?
            .execute(
                "DELETE FROM message_idempotency_keys WHERE expires_at <= $1",
                &[&now],
            )
            .await?)
    }
}
