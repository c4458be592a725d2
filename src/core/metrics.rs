use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters shared by the REST client and the WebSocket session.
#[derive(Debug)]
pub struct ClientMetrics {
    requests_sent: AtomicU64,
    requests_succeeded: AtomicU64,
    failed_attempts: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    total_latency_ms: AtomicU64,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    reconnects: AtomicU64,
    start_time: Instant,
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self {
            requests_sent: AtomicU64::new(0),
            requests_succeeded: AtomicU64::new(0),
            failed_attempts: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn increment_requests_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, latency: Duration) {
        self.requests_succeeded.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn increment_failed_attempts(&self) {
        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_frames_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_frames_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    pub fn get_requests_succeeded(&self) -> u64 {
        self.requests_succeeded.load(Ordering::Relaxed)
    }

    pub fn get_failed_attempts(&self) -> u64 {
        self.failed_attempts.load(Ordering::Relaxed)
    }

    pub fn get_retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn get_timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn get_frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn get_frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn get_reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn get_average_latency_ms(&self) -> f64 {
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        let samples = self.get_requests_succeeded();

        if samples == 0 {
            0.0
        } else {
            total as f64 / samples as f64
        }
    }

    pub fn get_error_rate(&self) -> f64 {
        let sent = self.get_requests_sent();
        if sent == 0 {
            0.0
        } else {
            self.get_failed_attempts() as f64 / sent as f64
        }
    }

    pub fn get_uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn get_snapshot(&self) -> HashMap<String, serde_json::Value> {
        let mut snapshot = HashMap::new();

        snapshot.insert("requests_sent".to_string(), serde_json::json!(self.get_requests_sent()));
        snapshot.insert(
            "requests_succeeded".to_string(),
            serde_json::json!(self.get_requests_succeeded()),
        );
        snapshot.insert(
            "failed_attempts".to_string(),
            serde_json::json!(self.get_failed_attempts()),
        );
        snapshot.insert("retries".to_string(), serde_json::json!(self.get_retries()));
        snapshot.insert("timeouts".to_string(), serde_json::json!(self.get_timeouts()));
        snapshot.insert(
            "average_latency_ms".to_string(),
            serde_json::json!(self.get_average_latency_ms()),
        );
        snapshot.insert("error_rate".to_string(), serde_json::json!(self.get_error_rate()));
        snapshot.insert("frames_sent".to_string(), serde_json::json!(self.get_frames_sent()));
        snapshot.insert(
            "frames_received".to_string(),
            serde_json::json!(self.get_frames_received()),
        );
        snapshot.insert("reconnects".to_string(), serde_json::json!(self.get_reconnects()));
        snapshot.insert("uptime_secs".to_string(), serde_json::json!(self.get_uptime_secs()));

        snapshot
    }
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}
