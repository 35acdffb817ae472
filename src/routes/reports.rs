use crate::error::AppError;
use crate::middleware::guards::User;
use crate::models::ReportReason;
use crate::services::safety::FileReport;
use crate::state::AppState;
use actix_web::{post, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub conversation_id: Uuid,
    pub message_id: Option<Uuid>,
    pub reason: String,
    pub comment: Option<String>,
}

/// File a moderation report; never blocks
/// POST /reports
#[post("/reports")]
pub async fn file_report(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<ReportRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let reason: ReportReason = body.reason.parse().map_err(AppError::Validation)?;

    let report = state
        .safety
        .report(
            user.id,
            FileReport {
                conversation_id: body.conversation_id,
                message_id: body.message_id,
                reason,
                comment: body.comment,
            },
        )
        .await?;

    Ok(HttpResponse::Accepted().json(json!({
        "report_id": report.id,
        "status": report.status,
    })))
}
