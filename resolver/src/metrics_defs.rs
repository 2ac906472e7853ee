use shared::metrics_defs::{MetricDef, MetricType};

pub const BINDING_CACHE_HIT: MetricDef = MetricDef {
    name: "resolver.binding_cache.hit",
    metric_type: MetricType::Counter,
    description: "Resource binding resolved from the local cache",
};

pub const BINDING_CACHE_MISS: MetricDef = MetricDef {
    name: "resolver.binding_cache.miss",
    metric_type: MetricType::Counter,
    description: "Resource binding fetched from the project service",
};

pub const METRICS: &[MetricDef] = &[BINDING_CACHE_HIT, BINDING_CACHE_MISS];
