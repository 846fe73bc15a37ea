//! Metric names and recording helpers.
//!
//! Recording goes through the `metrics` facade and is a no-op until the
//! binary installs an exporter.

use metrics::{counter, histogram};

/// Metric names.
pub mod names {
    pub const FANOUT_TOTAL: &str = "feed_fanout_total";
    pub const FANOUT_ENTRIES_TOTAL: &str = "feed_fanout_entries_total";
    pub const FANOUT_SECONDS: &str = "feed_fanout_seconds";
    pub const PAGES_TOTAL: &str = "feed_pages_total";
    pub const EVENTS_TOTAL: &str = "feed_events_total";
    pub const DEAD_LETTERS_TOTAL: &str = "feed_dead_letters_total";
}

/// Register descriptions for every metric above.
pub fn describe() {
    metrics::describe_counter!(names::FANOUT_TOTAL, "Fan-out operations by outcome");
    metrics::describe_counter!(
        names::FANOUT_ENTRIES_TOTAL,
        "Timeline entries inserted by fan-out"
    );
    metrics::describe_histogram!(names::FANOUT_SECONDS, "Fan-out transaction latency in seconds");
    metrics::describe_counter!(names::PAGES_TOTAL, "Feed pages served by pagination mode");
    metrics::describe_counter!(names::EVENTS_TOTAL, "Inbound notifications by outcome");
    metrics::describe_counter!(
        names::DEAD_LETTERS_TOTAL,
        "Notifications routed to the dead-letter sink"
    );
}

/// Record a finished fan-out.
pub fn record_fanout(outcome: &'static str, inserted: u64, seconds: f64) {
    counter!(names::FANOUT_TOTAL, "outcome" => outcome).increment(1);
    counter!(names::FANOUT_ENTRIES_TOTAL).increment(inserted);
    histogram!(names::FANOUT_SECONDS).record(seconds);
}

/// Record a served page.
pub fn record_page(mode: &'static str) {
    counter!(names::PAGES_TOTAL, "mode" => mode).increment(1);
}

/// Record the outcome of one inbound notification.
pub fn record_event(outcome: &'static str) {
    counter!(names::EVENTS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a dead-lettered notification.
pub fn record_dead_letter() {
    counter!(names::DEAD_LETTERS_TOTAL).increment(1);
}
