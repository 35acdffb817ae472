pub mod blocks;
pub mod conversations;
pub mod messages;
pub mod read_state;
pub mod reports;
pub mod wsroute;

use crate::error::AppError;
use crate::metrics;
use crate::middleware::ErrorEnvelopeMiddleware;
use crate::state::AppState;
use actix_cors::Cors;
use actix_middleware::{IdentityAuth, Logging, RequestIdMiddleware};
use actix_web::{
    body::MessageBody,
    dev::{ServiceFactory, ServiceRequest, ServiceResponse},
    http::header,
    web, App, HttpResponse, HttpResponseBuilder,
};

pub const HAS_MORE_HEADER: &str = "x-has-more";

/// `X-Has-More` always; `Link: rel="next"` only when another page exists
pub fn pagination_headers(
    builder: &mut HttpResponseBuilder,
    path: &str,
    next_cursor: Option<&str>,
    limit: usize,
    has_more: bool,
) {
    builder.insert_header((HAS_MORE_HEADER, if has_more { "true" } else { "false" }));
    if let Some(cursor) = next_cursor.filter(|_| has_more) {
        builder.insert_header((
            header::LINK,
            format!("<{path}?cursor={cursor}&limit={limit}>; rel=\"next\""),
        ));
    }
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

async fn route_not_found() -> Result<HttpResponse, AppError> {
    Err(AppError::NotFound("route"))
}

/// Full application: routes, extractor error mapping and the middleware stack
pub fn build_app(
    state: web::Data<AppState>,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    let identity = IdentityAuth::new(state.identity.clone())
        .skip_path("/health")
        .skip_path("/metrics")
        .skip_path("/ws");

    let json_config = web::JsonConfig::default().error_handler(|err, _req| {
        AppError::Validation(format!("invalid request body: {err}")).into()
    });
    let query_config = web::QueryConfig::default().error_handler(|err, _req| {
        AppError::Validation(format!("invalid query string: {err}")).into()
    });
    let path_config = web::PathConfig::default().error_handler(|err, _req| {
        AppError::Validation(format!("invalid path parameter: {err}")).into()
    });

    App::new()
        .app_data(state)
        .app_data(json_config)
        .app_data(query_config)
        .app_data(path_config)
        .route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics::metrics_handler))
        .service(wsroute::ws_handler)
        .service(conversations::open_conversation)
        .service(conversations::list_conversations)
        .service(conversations::get_conversation)
        .service(messages::send_message)
        .service(messages::list_messages)
        .service(messages::get_message)
        .service(read_state::set_read_state)
        .service(blocks::block_user)
        .service(blocks::unblock_user)
        .service(reports::file_report)
        .default_service(web::to(route_not_found))
        .wrap(ErrorEnvelopeMiddleware)
        .wrap(identity)
        .wrap(Logging)
        .wrap(RequestIdMiddleware::new())
        .wrap(Cors::permissive())
}
