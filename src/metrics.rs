use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, IntCounter, IntCounterVec, TextEncoder, opts, register_histogram,
    register_int_counter, register_int_counter_vec,
};

pub static MESSAGES_PUBLISHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "relay_messages_published_total",
            "Total number of envelopes published to the bus"
        ),
        &["direction"]
    )
    .unwrap()
});

pub static MESSAGES_ENQUEUED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "relay_messages_enqueued_total",
        "Total number of envelopes buffered in the delivery queue"
    ))
    .unwrap()
});

pub static DELIVERIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "relay_deliveries_total",
        "Total number of successful outbound deliveries"
    ))
    .unwrap()
});

pub static DELIVERY_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "relay_delivery_failures_total",
        "Total number of failed delivery attempts"
    ))
    .unwrap()
});

pub static DEAD_LETTERED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "relay_dead_lettered_total",
        "Total number of entries moved to the dead letter sink"
    ))
    .unwrap()
});

pub static DELIVERY_TIME: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "relay_delivery_time_seconds",
        "Histogram of outbound delivery times"
    )
    .unwrap()
});

pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
