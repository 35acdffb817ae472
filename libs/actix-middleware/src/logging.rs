//! Access log middleware
//!
//! One event per request carrying the request id and, once `IdentityAuth` has run, the
//! caller. Health and metrics scrapes (`/health`, `/metrics`) log at debug so they do not drown real traffic.

use crate::identity_auth::UserId;
use crate::request_id::RequestId;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::StatusCode,
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::time::Instant;

const QUIET_PATHS: &[&str] = &["/health", "/metrics"];

#[derive(Clone, Default)]
pub struct Logging;

impl<S, B> Transform<S, ServiceRequest> for Logging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = LoggingService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(LoggingService { service }))
    }
}

pub struct LoggingService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for LoggingService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start = Instant::now();
        let method = req.method().clone();
        let path = req.path().to_string();
        let quiet = QUIET_PATHS.contains(&path.as_str());
        let request_id = req
            .extensions()
            .get::<RequestId>()
            .map(|id| id.0.clone())
            .unwrap_or_default();

        let fut = self.service.call(req);

        Box::pin(async move {
            let res = fut.await?;
            let duration_ms = start.elapsed().as_millis() as u64;
            let status = res.status();
            // set by IdentityAuth further down the stack
            let user_id = res
                .request()
                .extensions()
                .get::<UserId>()
                .map(|u| u.0.to_string())
                .unwrap_or_else(|| "-".into());

            match classify(status, quiet) {
                Level::Error => tracing::error!(
                    %method, %path, %request_id, %user_id,
                    status = status.as_u16(), duration_ms, "request failed"
                ),
                Level::Warn => tracing::warn!(
                    %method, %path, %request_id, %user_id,
                    status = status.as_u16(), duration_ms, "request rejected"
                ),
                Level::Info => tracing::info!(
                    %method, %path, %request_id, %user_id,
                    status = status.as_u16(), duration_ms, "request completed"
                ),
                Level::Debug => tracing::debug!(
                    %method, %path, %request_id,
                    status = status.as_u16(), duration_ms, "scrape"
                ),
            }

            Ok(res)
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Level {
    Error,
    Warn,
    Info,
    Debug,
}

fn classify(status: StatusCode, quiet: bool) -> Level {
    if status.is_server_error() {
        Level::Error
    } else if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::UNAUTHORIZED {
        Level::Warn
    } else if quiet {
        Level::Debug
    } else {
        Level::Info
    }
}
