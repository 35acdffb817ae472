//! # Actix Middleware Library
//!
//! Middleware components shared by the chat service
//!
//! ## Modules
//! - `identity`: identity verification collaborator (`IdentityVerifier`) and its JWT implementation
//! - `identity_auth`: bearer credential middleware that resolves the caller's `UserId`
//! - `request_id`: `X-Request-ID` propagation
//! - `logging`: request/response logging

pub mod identity;
pub mod identity_auth;
pub mod logging;
pub mod request_id;

pub use identity::{IdentityError, IdentityVerifier, JwtIdentityVerifier};
pub use identity_auth::{unauthorized_response, IdentityAuth, UserId};
pub use logging::Logging;
pub use request_id::{RequestId, RequestIdMiddleware, REQUEST_ID_HEADER};
