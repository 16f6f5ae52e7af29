use metrics::{counter, histogram};

/// How a detect request ended, used as the `outcome` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectOutcome {
    Success,
    ClientError,
    Unavailable,
    Timeout,
    InternalError,
}

impl DetectOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectOutcome::Success => "success",
            DetectOutcome::ClientError => "client_error",
            DetectOutcome::Unavailable => "unavailable",
            DetectOutcome::Timeout => "timeout",
            DetectOutcome::InternalError => "internal_error",
        }
    }
}

/// Record a finished detect request.
pub fn record_detect(outcome: DetectOutcome, duration_ms: f64) {
    counter!("vigil_detect_requests_total", "outcome" => outcome.as_str()).increment(1);
    histogram!("vigil_detect_duration_ms").record(duration_ms);
}

pub fn record_detections(count: usize) {
    counter!("vigil_detections_total").increment(count as u64);
}
