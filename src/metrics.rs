use actix_web::{http::header, HttpResponse};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};

static MESSAGES_CREATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "chat_service_messages_created_total",
        "Messages persisted by chat-service",
    )
    .expect("failed to create chat_service_messages_created_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register chat_service_messages_created_total");
    counter
});

static IDEMPOTENT_REPLAYS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "chat_service_idempotent_replays_total",
        "Message writes answered from an existing idempotency key",
    )
    .expect("failed to create chat_service_idempotent_replays_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register chat_service_idempotent_replays_total");
    counter
});

static RATE_LIMITED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "chat_service_rate_limited_total",
            "Requests denied by the per-user rate limiter",
        ),
        &["bucket"],
    )
    .expect("failed to create chat_service_rate_limited_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register chat_service_rate_limited_total");
    counter
});

static LIVE_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "chat_service_live_connections",
        "Realtime channel connections currently registered",
    )
    .expect("failed to create chat_service_live_connections");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register chat_service_live_connections");
    gauge
});

static BACKPRESSURE_DROPS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "chat_service_backpressure_drops_total",
        "Connections closed because their outbound buffer was full",
    )
    .expect("failed to create chat_service_backpressure_drops_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register chat_service_backpressure_drops_total");
    counter
});

pub fn record_message_created() {
    MESSAGES_CREATED_TOTAL.inc();
}

pub fn record_idempotent_replay() {
    IDEMPOTENT_REPLAYS_TOTAL.inc();
}

pub fn record_rate_limited(bucket: &str) {
    RATE_LIMITED_TOTAL.with_label_values(&[bucket]).inc();
}

pub fn connection_opened() {
    LIVE_CONNECTIONS.inc();
}

pub fn connection_closed() {
    LIVE_CONNECTIONS.dec();
}

pub fn record_backpressure_drop() {
    BACKPRESSURE_DROPS_TOTAL.inc();
}

pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, encoder.format_type()))
        .body(buffer)
}
