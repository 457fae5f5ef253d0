//! Cash-out reaction latency: snapshot capture to the platform acknowledging
//! the cash-out. Engine records, API reads.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Microsecond histogram, 1us to 60s at 3 significant figures.
pub struct LatencyStats {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct LatencySummary {
    pub samples: u64,
    pub p50_us: Option<u64>,
    pub p95_us: Option<u64>,
    pub p99_us: Option<u64>,
    pub max_us: Option<u64>,
}

impl LatencyStats {
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 60_000_000, 3)
            .expect("static histogram bounds are valid");
        Self { inner: Mutex::new(histogram) }
    }

    pub fn record(&self, d: Duration) {
        let us = d.as_micros().clamp(1, 60_000_000) as u64;
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.record(us);
        }
    }

    pub fn summary(&self) -> LatencySummary {
        let Ok(h) = self.inner.lock() else {
            return LatencySummary { samples: 0, p50_us: None, p95_us: None, p99_us: None, max_us: None };
        };
        let q = |quantile: f64| Some(h.value_at_quantile(quantile)).filter(|_| !h.is_empty());
        LatencySummary {
            samples: h.len(),
            p50_us: q(0.5),
            p95_us: q(0.95),
            p99_us: q(0.99),
            max_us: Some(h.max()).filter(|_| !h.is_empty()),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}
