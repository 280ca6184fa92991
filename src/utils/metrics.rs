use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pipeline stages that get a latency series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extraction,
    Translation,
    Inpainting,
    Compositing,
}

impl Stage {
    fn label(&self) -> &'static str {
        match self {
            Stage::Extraction => "extraction",
            Stage::Translation => "translation",
            Stage::Inpainting => "inpainting",
            Stage::Compositing => "compositing",
        }
    }
}

/// Process-wide metrics, cheap to clone and share between handlers.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct CallCounters {
    success: AtomicUsize,
    failed: AtomicUsize,
}

struct MetricsInner {
    // Remote capability calls keyed by capability name
    remote_calls: DashMap<&'static str, CallCounters>,
    remote_latency_ms: RwLock<Vec<u64>>,

    // Fallbacks keyed by reason label
    fallbacks: DashMap<&'static str, AtomicUsize>,

    extraction_ms: RwLock<Vec<u64>>,
    translation_ms: RwLock<Vec<u64>>,
    inpainting_ms: RwLock<Vec<u64>>,
    compositing_ms: RwLock<Vec<u64>>,

    images_processed: AtomicUsize,
    languages_done: AtomicUsize,
    languages_failed: AtomicUsize,
    schedules_created: AtomicUsize,
    admission_rejections: AtomicUsize,

    endpoint_counters: DashMap<String, AtomicUsize>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                remote_calls: DashMap::new(),
                remote_latency_ms: RwLock::new(Vec::new()),
                fallbacks: DashMap::new(),
                extraction_ms: RwLock::new(Vec::new()),
                translation_ms: RwLock::new(Vec::new()),
                inpainting_ms: RwLock::new(Vec::new()),
                compositing_ms: RwLock::new(Vec::new()),
                images_processed: AtomicUsize::new(0),
                languages_done: AtomicUsize::new(0),
                languages_failed: AtomicUsize::new(0),
                schedules_created: AtomicUsize::new(0),
                admission_rejections: AtomicUsize::new(0),
                endpoint_counters: DashMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    pub fn record_remote_call(&self, capability: &'static str, success: bool, duration: Duration) {
        let counters = self.inner.remote_calls.entry(capability).or_default();
        if success {
            counters.success.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        drop(counters);
        self.inner
            .remote_latency_ms
            .write()
            .push(duration.as_millis() as u64);
    }

    pub fn record_fallback(&self, label: &'static str) {
        self.inner
            .fallbacks
            .entry(label)
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stage(&self, stage: Stage, duration: Duration) {
        let series = match stage {
            Stage::Extraction => &self.inner.extraction_ms,
            Stage::Translation => &self.inner.translation_ms,
            Stage::Inpainting => &self.inner.inpainting_ms,
            Stage::Compositing => &self.inner.compositing_ms,
        };
        series.write().push(duration.as_millis() as u64);
    }

    pub fn record_image_processed(&self) {
        self.inner.images_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_language_outcome(&self, success: bool) {
        if success {
            self.inner.languages_done.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.languages_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_schedules_created(&self, count: usize) {
        self.inner.schedules_created.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_admission_rejection(&self) {
        self.inner.admission_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_endpoint_request(&self, endpoint: &str) {
        self.inner
            .endpoint_counters
            .entry(endpoint.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency = self.inner.remote_latency_ms.read();
        let remote_latency_avg_ms = avg(&latency);
        let remote_latency_p95_ms = percentile(&latency, 0.95);
        drop(latency);

        let remote_calls = self
            .inner
            .remote_calls
            .iter()
            .map(|e| {
                (
                    e.key().to_string(),
                    CallSnapshot {
                        success: e.success.load(Ordering::Relaxed),
                        failed: e.failed.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();

        let fallbacks = self
            .inner
            .fallbacks
            .iter()
            .map(|e| (e.key().to_string(), e.value().load(Ordering::Relaxed)))
            .collect();

        let endpoints = self
            .inner
            .endpoint_counters
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();

        let mut stage_avg_ms = BTreeMap::new();
        for stage in [
            Stage::Extraction,
            Stage::Translation,
            Stage::Inpainting,
            Stage::Compositing,
        ] {
            let series = match stage {
                Stage::Extraction => self.inner.extraction_ms.read(),
                Stage::Translation => self.inner.translation_ms.read(),
                Stage::Inpainting => self.inner.inpainting_ms.read(),
                Stage::Compositing => self.inner.compositing_ms.read(),
            };
            stage_avg_ms.insert(stage.label().to_string(), avg(&series));
        }

        MetricsSnapshot {
            remote_calls,
            remote_latency_avg_ms,
            remote_latency_p95_ms,
            fallbacks,
            stage_avg_ms,
            images_processed: self.inner.images_processed.load(Ordering::Relaxed),
            languages_done: self.inner.languages_done.load(Ordering::Relaxed),
            languages_failed: self.inner.languages_failed.load(Ordering::Relaxed),
            schedules_created: self.inner.schedules_created.load(Ordering::Relaxed),
            admission_rejections: self.inner.admission_rejections.load(Ordering::Relaxed),
            endpoints,
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Prometheus text exposition
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut out = String::new();

        let _ = writeln!(out, "# HELP remote_calls_total Calls to remote capabilities");
        let _ = writeln!(out, "# TYPE remote_calls_total counter");
        for (capability, calls) in &s.remote_calls {
            let _ = writeln!(
                out,
                "remote_calls_total{{capability=\"{}\",outcome=\"success\"}} {}",
                capability, calls.success
            );
            let _ = writeln!(
                out,
                "remote_calls_total{{capability=\"{}\",outcome=\"failed\"}} {}",
                capability, calls.failed
            );
        }
        let _ = writeln!(out, "# TYPE remote_latency_avg_ms gauge");
        let _ = writeln!(out, "remote_latency_avg_ms {}", s.remote_latency_avg_ms);

        let _ = writeln!(out, "# HELP fallbacks_total Stage fallbacks by reason");
        let _ = writeln!(out, "# TYPE fallbacks_total counter");
        for (reason, count) in &s.fallbacks {
            let _ = writeln!(out, "fallbacks_total{{reason=\"{}\"}} {}", reason, count);
        }

        let _ = writeln!(out, "# TYPE stage_avg_duration_ms gauge");
        for (stage, ms) in &s.stage_avg_ms {
            let _ = writeln!(out, "stage_avg_duration_ms{{stage=\"{}\"}} {}", stage, ms);
        }

        let _ = writeln!(out, "# TYPE images_processed_total counter");
        let _ = writeln!(out, "images_processed_total {}", s.images_processed);
        let _ = writeln!(out, "# TYPE language_outcomes_total counter");
        let _ = writeln!(out, "language_outcomes_total{{outcome=\"done\"}} {}", s.languages_done);
        let _ = writeln!(out, "language_outcomes_total{{outcome=\"failed\"}} {}", s.languages_failed);
        let _ = writeln!(out, "# TYPE schedules_created_total counter");
        let _ = writeln!(out, "schedules_created_total {}", s.schedules_created);
        let _ = writeln!(out, "# TYPE admission_rejections_total counter");
        let _ = writeln!(out, "admission_rejections_total {}", s.admission_rejections);

        let _ = writeln!(out, "# TYPE http_requests_total counter");
        for (endpoint, count) in &s.endpoints {
            let _ = writeln!(out, "http_requests_total{{endpoint=\"{}\"}} {}", endpoint, count);
        }

        let _ = writeln!(out, "# TYPE uptime_seconds counter");
        let _ = writeln!(out, "uptime_seconds {}", s.uptime_seconds);
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CallSnapshot {
    pub success: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub remote_calls: BTreeMap<String, CallSnapshot>,
    pub remote_latency_avg_ms: u64,
    pub remote_latency_p95_ms: u64,
    pub fallbacks: BTreeMap<String, usize>,
    pub stage_avg_ms: BTreeMap<String, u64>,
    pub images_processed: usize,
    pub languages_done: usize,
    pub languages_failed: usize,
    pub schedules_created: usize,
    pub admission_rejections: usize,
    pub endpoints: BTreeMap<String, usize>,
    pub uptime_seconds: u64,
}

fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = Metrics::new();

        metrics.record_remote_call("translation", true, Duration::from_millis(100));
        metrics.record_remote_call("translation", false, Duration::from_millis(300));
        metrics.record_fallback("translation_failed");
        metrics.record_fallback("translation_failed");
        metrics.record_language_outcome(true);
        metrics.record_language_outcome(false);
        metrics.record_stage(Stage::Compositing, Duration::from_millis(40));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.remote_calls["translation"].success, 1);
        assert_eq!(snapshot.remote_calls["translation"].failed, 1);
        assert_eq!(snapshot.remote_latency_avg_ms, 200);
        assert_eq!(snapshot.fallbacks["translation_failed"], 2);
        assert_eq!(snapshot.languages_done, 1);
        assert_eq!(snapshot.languages_failed, 1);
        assert_eq!(snapshot.stage_avg_ms["compositing"], 40);
        assert_eq!(snapshot.stage_avg_ms["extraction"], 0);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.record_remote_call("inpainting", true, Duration::from_millis(10));
        metrics.record_admission_rejection();

        let prometheus = metrics.to_prometheus();
        assert!(prometheus.contains("remote_calls_total{capability=\"inpainting\",outcome=\"success\"} 1"));
        assert!(prometheus.contains("admission_rejections_total 1"));
    }

    #[test]
    fn test_percentile() {
        assert_eq!(percentile(&[], 0.95), 0);
        assert_eq!(percentile(&[5, 1, 3], 0.5), 3);
    }
}
