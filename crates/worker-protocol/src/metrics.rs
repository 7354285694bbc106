//! Per-service metrics accumulation and side-channel emission.
//!
//! A [`MetricsStore`] is an append-only buffer bound to a single loaded
//! service. `add_time`/`add_size`/`add_counter`/`add_gauge` push a typed
//! [`Sample`]; `emit` serializes the whole buffer as line-delimited JSON and
//! clears it. Emission never fails a prediction: errors are logged through
//! `tracing` and otherwise swallowed.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;

/// The unit a sample's value is measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    /// Milliseconds.
    Ms,
    /// Bytes.
    Bytes,
    /// A monotonically increasing count.
    Counter,
    /// An instantaneous value.
    Gauge,
}

/// One recorded measurement.
#[derive(Debug, Clone, Serialize)]
pub struct Sample {
    /// Metric name, e.g. `PreprocessTime`.
    pub name: String,
    /// Measured value, in `unit`.
    pub value: f64,
    /// Unit of `value`.
    pub unit: Unit,
    /// Free-form dimensions attached to the sample (model name, host, ...).
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub dimensions: HashMap<String, String>,
    /// The request this sample is scoped to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Name of the built-in preprocess timer.
pub const PREPROCESS_METRIC: &str = "PreprocessTime";
/// Name of the built-in inference timer.
pub const INFERENCE_METRIC: &str = "InferenceTime";
/// Name of the built-in postprocess timer.
pub const POSTPROCESS_METRIC: &str = "PostprocessTime";

/// Append-only sample buffer for a single loaded service.
#[derive(Debug)]
pub struct MetricsStore {
    model_name: String,
    samples: Vec<Sample>,
}

impl MetricsStore {
    /// Create an empty store bound to `model_name`.
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            samples: Vec::new(),
        }
    }

    /// The service this store is bound to.
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Record a timer sample, in milliseconds.
    pub fn add_time(&mut self, name: &str, ms: f64) {
        self.push(name, ms, Unit::Ms, None)
    }

    /// Record a size sample, in bytes.
    pub fn add_size(&mut self, name: &str, bytes: f64) {
        self.push(name, bytes, Unit::Bytes, None)
    }

    /// Record a monotonic counter sample.
    pub fn add_counter(&mut self, name: &str, n: f64) {
        self.push(name, n, Unit::Counter, None)
    }

    /// Record an instantaneous gauge sample.
    pub fn add_gauge(&mut self, name: &str, v: f64) {
        self.push(name, v, Unit::Gauge, None)
    }

    fn push(&mut self, name: &str, value: f64, unit: Unit, request_id: Option<String>) {
        self.samples.push(Sample {
            name: name.to_string(),
            value,
            unit,
            dimensions: HashMap::from([("modelName".to_string(), self.model_name.clone())]),
            request_id,
        });
    }

    /// Number of buffered, not-yet-emitted samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Serialize every buffered sample as one line of JSON to `out`, then
    /// clear the buffer. Best-effort: a write or serialize failure is logged
    /// and otherwise ignored, since metrics must never fail a prediction.
    pub fn emit<W: std::io::Write>(&mut self, out: &mut W) {
        for sample in &self.samples {
            match serde_json::to_string(sample) {
                Ok(line) => {
                    if let Err(e) = writeln!(out, "{}", line) {
                        tracing::warn!(error = %e, "failed to write metric sample");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to serialize metric sample"),
            }
        }
        self.samples.clear();
    }
}

/// Run `f`, returning its result alongside the elapsed wall time in
/// milliseconds. Used to time preprocess/inference/postprocess stages
/// without duplicating `Instant` bookkeeping at each call site.
pub fn timed<T>(f: impl FnOnce() -> T) -> (T, f64) {
    let start = Instant::now();
    let result = f();
    (result, start.elapsed().as_secs_f64() * 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_clears_buffer_and_produces_one_line_per_sample() {
        let mut store = MetricsStore::new("my-model");
        store.add_time(PREPROCESS_METRIC, 1.5);
        store.add_time(INFERENCE_METRIC, 12.0);
        assert_eq!(store.len(), 2);

        let mut out = Vec::new();
        store.emit(&mut out);
        assert!(store.is_empty());

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(parsed.get("name").is_some());
            assert!(parsed.get("value").is_some());
        }
    }

    #[test]
    fn samples_carry_model_name_dimension() {
        let mut store = MetricsStore::new("my-model");
        store.add_gauge("queueDepth", 3.0);
        let mut out = Vec::new();
        store.emit(&mut out);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("my-model"));
    }
}
