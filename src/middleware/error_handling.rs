use crate::error::AppError;
use actix_middleware::RequestId;
use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::{header, StatusCode},
    Error, HttpMessage, HttpResponse,
};
use error_types::{ErrorBody, ErrorEnvelope};
use futures::future::LocalBoxFuture;
use serde_json::json;
use std::future::{ready, Ready};

/// Error body for a domain error; internal details never leave the process
pub fn error_body(err: &AppError) -> ErrorBody {
    let message = match err {
        AppError::Config(_) | AppError::StartServer(_) | AppError::Database(_) | AppError::Internal => {
            "internal server error".to_string()
        }
        AppError::ServiceUnavailable(_) => {
            "store temporarily unavailable; retry with the same idempotency key".to_string()
        }
        other => other.to_string(),
    };

    let body = ErrorBody::new(err.code(), &message);
    match err {
        AppError::RateLimited {
            bucket,
            retry_after_secs,
        } => body.with_details(json!({
            "bucket": bucket,
            "retry_after_seconds": retry_after_secs,
        })),
        _ => body,
    }
}

// map domain errors to HTTP responses
pub fn map_error(err: &AppError) -> (StatusCode, ErrorEnvelope) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if status.is_server_error() && !err.is_retryable() {
        tracing::error!(error = %err, "request failed");
    }

    (status, ErrorEnvelope::from(error_body(err)))
}

pub fn into_response(err: &AppError, request_id: Option<String>) -> HttpResponse {
    let (status, mut envelope) = map_error(err);
    if let Some(id) = request_id {
        envelope = envelope.with_request_id(id);
    }

    let mut builder = HttpResponse::build(status);
    if let AppError::RateLimited {
        retry_after_secs, ..
    } = err
    {
        builder.insert_header((header::RETRY_AFTER, retry_after_secs.to_string()));
    }
    builder.json(envelope)
}

/// Re-renders `AppError` responses so their body carries the request id
///
/// `ResponseError::error_response` has no access to the request, so handlers and
/// extractors produce an envelope without `request_id`; this middleware fills it in.
#[derive(Clone, Default)]
pub struct ErrorEnvelopeMiddleware;

impl<S, B> Transform<S, ServiceRequest> for ErrorEnvelopeMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = ErrorEnvelopeService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ErrorEnvelopeService { service }))
    }
}

pub struct ErrorEnvelopeService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for ErrorEnvelopeService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let fut = self.service.call(req);

        Box::pin(async move {
            let res = fut.await?;

            let rerendered = res
                .response()
                .error()
                .and_then(|e| e.as_error::<AppError>())
                .map(|app_err| {
                    let request_id = res
                        .request()
                        .extensions()
                        .get::<RequestId>()
                        .map(|id| id.0.clone());
                    into_response(app_err, request_id)
                });

            match rerendered {
                Some(response) => Ok(res.into_response(response).map_into_right_body()),
                None => Ok(res.map_into_left_body()),
            }
        })
    }
}
