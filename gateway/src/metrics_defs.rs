use shared::metrics_defs::{MetricDef, MetricType};

pub const ADMISSION_REJECTED: MetricDef = MetricDef {
    name: "gateway.admission.rejected",
    metric_type: MetricType::Counter,
    description: "Requests rejected because the in-flight bound was reached",
};

pub const RESULT_CACHE_HIT: MetricDef = MetricDef {
    name: "gateway.result_cache.hit",
    metric_type: MetricType::Counter,
    description: "Read responses served from the result cache",
};

pub const RESULT_CACHE_MISS: MetricDef = MetricDef {
    name: "gateway.result_cache.miss",
    metric_type: MetricType::Counter,
    description: "Read requests that fell through to the backend",
};

pub const BUNDLE_BUILT: MetricDef = MetricDef {
    name: "gateway.registry.bundle_built",
    metric_type: MetricType::Counter,
    description: "Backend client bundles constructed",
};

pub const BUNDLE_EVICTED: MetricDef = MetricDef {
    name: "gateway.registry.bundle_evicted",
    metric_type: MetricType::Counter,
    description: "Backend client bundles evicted from the registry",
};

pub const AUDIT_DROPPED: MetricDef = MetricDef {
    name: "gateway.audit.dropped",
    metric_type: MetricType::Counter,
    description: "Audit or detached tasks dropped because the queue was full",
};

pub const EVENT_INVOCATIONS: MetricDef = MetricDef {
    name: "gateway.events.invocations",
    metric_type: MetricType::Counter,
    description: "Custom-event function invocations issued",
};

pub const EVENT_DURATION_MS: MetricDef = MetricDef {
    name: "gateway.events.duration_ms",
    metric_type: MetricType::Histogram,
    description: "Wall time of awaited custom-event invocations",
};

pub const METRICS: &[MetricDef] = &[
    ADMISSION_REJECTED,
    RESULT_CACHE_HIT,
    RESULT_CACHE_MISS,
    BUNDLE_BUILT,
    BUNDLE_EVICTED,
    AUDIT_DROPPED,
    EVENT_INVOCATIONS,
    EVENT_DURATION_MS,
];
