use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus exporter and register all application metrics.
/// Returns a `PrometheusHandle` whose `render()` method produces the
/// text/plain Prometheus scrape payload.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    register_metrics();
    handle
}

/// Pre-register so every series appears before its first increment.
fn register_metrics() {
    // ingestion
    counter!("signals_emitted_total", "listener" => "mempool").absolute(0);
    counter!("signals_emitted_total", "listener" => "settlement").absolute(0);
    counter!("signals_dropped_total", "listener" => "mempool").absolute(0);
    counter!("signals_dropped_total", "listener" => "settlement").absolute(0);
    counter!("signals_unpriced_total").absolute(0);
    counter!("listener_reconnects_total", "listener" => "mempool").absolute(0);
    counter!("listener_reconnects_total", "listener" => "settlement").absolute(0);
    counter!("listener_backfill_blocks_total", "transport" => "http").absolute(0);
    counter!("listener_backfill_logs_total", "transport" => "http").absolute(0);
    counter!("listener_backfill_logs_total", "transport" => "ws").absolute(0);
    counter!("listener_read_timeouts_total", "listener" => "mempool").absolute(0);

    // pipeline
    counter!("intents_created_total").absolute(0);
    counter!("intents_rejected_total").absolute(0);
    counter!("intents_dropped_total").absolute(0);
    counter!("intents_expired_total").absolute(0);
    counter!("intents_reopened_total").absolute(0);

    // queue
    counter!("queue_enqueued_total").absolute(0);
    counter!("queue_rejected_total").absolute(0);
    counter!("queue_claimed_total").absolute(0);
    counter!("queue_acked_total").absolute(0);
    counter!("queue_retried_total").absolute(0);
    counter!("queue_dead_lettered_total", "source" => "nack").absolute(0);
    counter!("queue_dead_lettered_total", "source" => "reclaim").absolute(0);

    // execution
    counter!("executions_total").absolute(0);
    counter!("jobs_processed_total").absolute(0);
    counter!("unreturned_usdc_total").absolute(0);

    gauge!("monitored_traders").set(0.0);
    gauge!("queue_pending").set(0.0);
    gauge!("queue_in_flight").set(0.0);
    gauge!("queue_delayed").set(0.0);
    gauge!("queue_dlq").set(0.0);
    gauge!("paused").set(0.0);
    gauge!("settlement_listener_resume_block").set(0.0);

    // Histograms are lazily created on first record; force creation.
    histogram!("pipeline_latency_seconds").record(0.0);
    histogram!("execution_duration_seconds").record(0.0);
}
