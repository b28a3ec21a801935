use tracing::trace;

// Counters are emitted as trace events; the Prometheus recorder only renders
// what the exporter itself collects.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "bicimarket.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn backend_elapsed(table: &'static str, elapsed_ms: u128) {
    trace!(
        target = "bicimarket.metrics",
        table = table,
        elapsed_ms = elapsed_ms as u64,
        "backend_query_elapsed"
    );
}

pub fn publish_stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "bicimarket.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "publish_stage_elapsed"
    );
}
