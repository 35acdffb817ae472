use crate::identity::IdentityVerifier;
use crate::request_id::RequestId;
use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::InternalError,
    http::header,
    Error, HttpMessage, HttpRequest, HttpResponse,
};
use error_types::{error_codes, ErrorEnvelope};
use futures::future::{ready, Ready};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

/// User ID resolved by the identity collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub Uuid);

/// `401` response in the shared error envelope
pub fn unauthorized_response(message: &str, request_id: Option<String>) -> HttpResponse {
    let mut envelope = ErrorEnvelope::new(error_codes::UNAUTHORIZED, message);
    if let Some(id) = request_id {
        envelope = envelope.with_request_id(id);
    }
    HttpResponse::Unauthorized()
        .insert_header((header::WWW_AUTHENTICATE, "Bearer"))
        .json(envelope)
}

/// Bearer credential authentication middleware
///
/// Paths registered with [`IdentityAuth::skip_path`] pass through untouched; the live
/// channel authenticates in-band and health checks carry no credential.
#[derive(Clone)]
pub struct IdentityAuth {
    verifier: Arc<dyn IdentityVerifier>,
    skip_paths: Rc<Vec<String>>,
}

impl IdentityAuth {
    pub fn new(verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self {
            verifier,
            skip_paths: Rc::new(Vec::new()),
        }
    }

    pub fn skip_path(mut self, path: &str) -> Self {
        Rc::make_mut(&mut self.skip_paths).push(path.to_string());
        self
    }
}

impl<S, B> Transform<S, ServiceRequest> for IdentityAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = IdentityAuthService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(IdentityAuthService {
            service: Rc::new(service),
            verifier: self.verifier.clone(),
            skip_paths: self.skip_paths.clone(),
        }))
    }
}

pub struct IdentityAuthService<S> {
    service: Rc<S>,
    verifier: Arc<dyn IdentityVerifier>,
    skip_paths: Rc<Vec<String>>,
}

fn bearer_token(req: &ServiceRequest) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl<S, B> Service<ServiceRequest> for IdentityAuthService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        if self.skip_paths.iter().any(|p| p == req.path()) {
            return Box::pin(async move {
                service.call(req).await.map(|res| res.map_into_left_body())
            });
        }

        let verifier = self.verifier.clone();

        Box::pin(async move {
            let request_id = req.extensions().get::<RequestId>().map(|id| id.0.clone());

            let Some(token) = bearer_token(&req).map(str::to_owned) else {
                let res = unauthorized_response("missing bearer credential", request_id);
                return Ok(req.into_response(res).map_into_right_body());
            };

            match verifier.verify(&token).await {
                Ok(user_id) => {
                    req.extensions_mut().insert(UserId(user_id));
                    service.call(req).await.map(|res| res.map_into_left_body())
                }
                Err(e) => {
                    tracing::warn!(error = %e, path = %req.path(), "credential rejected");
                    let res = unauthorized_response("invalid credential", request_id);
                    Ok(req.into_response(res).map_into_right_body())
                }
            }
        })
    }
}

/// FromRequest implementation for UserId
impl actix_web::FromRequest for UserId {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        match req.extensions().get::<UserId>() {
            Some(user_id) => ready(Ok(*user_id)),
            None => {
                let res = unauthorized_response("user not authenticated", RequestId::of(req));
                ready(Err(InternalError::from_response("user not authenticated", res).into()))
            }
        }
    }
}
