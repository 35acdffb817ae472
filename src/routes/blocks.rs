use crate::error::AppError;
use crate::middleware::guards::User;
use crate::state::AppState;
use actix_web::{delete, http::header, post, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct BlockUserRequest {
    pub target_user_id: Uuid,
}

/// Block a user
/// POST /blocks
#[post("/blocks")]
pub async fn block_user(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<BlockUserRequest>,
) -> Result<HttpResponse, AppError> {
    let target = body.target_user_id;
    let created = state.safety.block(user.id, target).await?;

    let body = json!({ "target_user_id": target, "blocked": true });
    if created {
        Ok(HttpResponse::Created()
            .insert_header((header::LOCATION, format!("/blocks/{target}")))
            .json(body))
    } else {
        Ok(HttpResponse::Ok().json(body))
    }
}

/// Unblock a user; only the caller's own edge is removed
/// DELETE /blocks/{target_user_id}
#[delete("/blocks/{target_user_id}")]
pub async fn unblock_user(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    state.safety.unblock(user.id, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}
