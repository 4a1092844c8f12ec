use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static REQUESTS_STARTED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "scene_worker_requests_started_total",
            "asset fetches started by method",
        ),
        &["method"],
    )
    .expect("valid metric");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static REQUESTS_FAILED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "scene_worker_requests_failed_total",
            "asset operations reported to the host as failed, by error kind",
        ),
        &["kind"],
    )
    .expect("valid metric");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static COMMANDS_FORWARDED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "scene_worker_commands_forwarded_total",
            "scene commands forwarded to the host by name",
        ),
        &["name"],
    )
    .expect("valid metric");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static ACTIVE_REQUESTS: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::with_opts(Opts::new(
        "scene_worker_active_requests",
        "asset fetches currently in flight",
    ))
    .expect("valid metric");
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

pub fn gather() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %err, "metrics encode failed");
    }
    buffer
}
