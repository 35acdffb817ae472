use crate::error::AppError;
use crate::middleware::guards::User;
use crate::state::AppState;
use actix_web::{put, web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SetReadStateRequest {
    pub up_to_message_id: Uuid,
}

/// Move the caller's read watermark; moving backwards succeeds without effect
/// PUT /conversations/{id}/read-state
#[put("/conversations/{id}/read-state")]
pub async fn set_read_state(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<Uuid>,
    body: web::Json<SetReadStateRequest>,
) -> Result<HttpResponse, AppError> {
    state
        .read_states
        .set_read(user.id, path.into_inner(), body.up_to_message_id)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}
