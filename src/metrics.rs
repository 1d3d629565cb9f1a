use tracing::trace;

// Counters are emitted as trace events under `catalog.metrics`.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "catalog.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "catalog.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn run_outcome(run: &'static str, success: bool) {
    trace!(
        target = "catalog.metrics",
        run = run,
        success = success,
        "run_outcome"
    );
}
