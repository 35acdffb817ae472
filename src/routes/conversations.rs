use crate::error::AppError;
use crate::middleware::guards::User;
use crate::models::{Conversation, ReadState};
use crate::routes::pagination_headers;
use crate::services::conversation_service::ListConversations;
use crate::state::AppState;
use actix_web::{get, http::header, post, web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

const SORT_LAST_MESSAGE_DESC: &str = "last_message_at.desc";

#[derive(Debug, Deserialize)]
pub struct OpenConversationRequest {
    pub participant_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ListConversationsQuery {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
    #[serde(default)]
    pub with_unread_only: bool,
    pub sort: Option<String>,
}

/// Conversation as seen by the caller
#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub participant_ids: [Uuid; 2],
    pub other_participant_id: Option<Uuid>,
    pub blocked: bool,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_states: Option<Vec<ReadState>>,
}

impl ConversationResponse {
    fn new(conversation: Conversation, viewer: Uuid) -> Self {
        Self {
            id: conversation.id,
            participant_ids: conversation.participants(),
            other_participant_id: conversation.other_participant(viewer),
            blocked: conversation.blocked,
            created_at: conversation.created_at,
            last_message_at: conversation.last_message_at,
            unread_count: None,
            read_states: None,
        }
    }
}

/// Open a conversation with another user, or return the existing one
/// POST /conversations
#[post("/conversations")]
pub async fn open_conversation(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<OpenConversationRequest>,
) -> Result<HttpResponse, AppError> {
    let (conversation, created) = state
        .conversations
        .open(user.id, body.participant_id)
        .await?;

    let id = conversation.id;
    let response = ConversationResponse::new(conversation, user.id);
    if created {
        Ok(HttpResponse::Created()
            .insert_header((header::LOCATION, format!("/conversations/{id}")))
            .json(response))
    } else {
        Ok(HttpResponse::Ok().json(response))
    }
}

/// GET /conversations
#[get("/conversations")]
pub async fn list_conversations(
    state: web::Data<AppState>,
    user: User,
    query: web::Query<ListConversationsQuery>,
) -> Result<HttpResponse, AppError> {
    let query = query.into_inner();
    if let Some(sort) = query.sort.as_deref() {
        if sort != SORT_LAST_MESSAGE_DESC {
            return Err(AppError::Validation(format!(
                "unsupported sort {sort:?}; only {SORT_LAST_MESSAGE_DESC} is supported"
            )));
        }
    }

    let page = state
        .conversations
        .list(
            user.id,
            ListConversations {
                cursor: query.cursor,
                limit: query.limit,
                unread_only: query.with_unread_only,
            },
        )
        .await?;

    let items: Vec<ConversationResponse> = page
        .items
        .into_iter()
        .map(|summary| ConversationResponse {
            unread_count: Some(summary.unread_count),
            ..ConversationResponse::new(summary.conversation, user.id)
        })
        .collect();

    let mut response = HttpResponse::Ok();
    pagination_headers(
        &mut response,
        "/conversations",
        page.next_cursor.as_deref(),
        page.limit,
        page.has_more,
    );

    Ok(response.json(json!({
        "conversations": items,
        "has_more": page.has_more,
        "next_cursor": page.next_cursor,
    })))
}

/// GET /conversations/{id}
#[get("/conversations/{id}")]
pub async fn get_conversation(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let detail = state
        .conversations
        .detail(user.id, path.into_inner())
        .await?;

    Ok(HttpResponse::Ok().json(ConversationResponse {
        unread_count: Some(detail.unread_count),
        read_states: Some(detail.read_states),
        ..ConversationResponse::new(detail.conversation, user.id)
    }))
}
