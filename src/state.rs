//! # Application State Management
//!
//! State shared by every HTTP handler: the loaded configuration, the transcription
//! pipeline, the job slots that bound concurrent pipeline runs, and the metrics the
//! middleware and handlers keep up to date.
//!
//! ## Sharing pattern:
//! - **Arc<T>** for things that never change after startup (config, pipeline)
//! - **Arc<RwLock<T>>** for metrics, written by every request
//! - **Arc<Semaphore>** for job slots; permits are owned so they can travel into
//!   blocking jobs

use crate::config::AppConfig;
use crate::pipeline::TranscriptionPipeline;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Instant;
use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,

    /// The pipeline run for every upload (stateless across requests)
    pub pipeline: Arc<TranscriptionPipeline>,

    /// One permit per pipeline allowed to run at the same time
    pub job_slots: Arc<Semaphore>,

    pub metrics: Arc<RwLock<AppMetrics>>,

    pub start_time: Instant,
}

/// Counters collected across all requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of HTTP requests that ended in a 4xx/5xx
    pub error_count: u64,

    /// Pipelines currently holding a job slot
    pub active_jobs: u32,

    pub jobs_completed: u64,

    /// Failed pipelines, keyed by error kind (`format_error`, `no_output`, ...)
    pub jobs_failed: HashMap<String, u64>,

    /// Key: endpoint name (e.g., "POST /transcribe")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Metrics for one endpoint.
///
/// ## Derived values:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, pipeline: TranscriptionPipeline) -> Self {
        let slots = config.performance.max_concurrent_jobs.max(1);
        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            job_slots: Arc::new(Semaphore::new(slots)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Build the pipeline from `config` and wrap both.
    pub fn from_config(config: AppConfig) -> Self {
        let pipeline = TranscriptionPipeline::from_config(&config);
        Self::new(config, pipeline)
    }

    pub fn get_config(&self) -> AppConfig {
        self.config.as_ref().clone()
    }

    /// A poisoned lock only means a panic mid-update; counters stay usable.
    fn metrics_mut(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn increment_request_count(&self) {
        self.metrics_mut().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_mut().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_mut();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Count a job as active until the returned tracker is finished or dropped.
    pub fn start_job(&self) -> JobTracker<'_> {
        self.metrics_mut().active_jobs += 1;
        JobTracker {
            state: self,
            finished: false,
        }
    }

    fn job_finished(&self, failure: Option<&str>) {
        let mut metrics = self.metrics_mut();
        metrics.active_jobs = metrics.active_jobs.saturating_sub(1);
        match failure {
            None => metrics.jobs_completed += 1,
            Some(kind) => *metrics.jobs_failed.entry(kind.to_string()).or_default() += 1,
        }
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Accounting for one running job.
///
/// Dropping it unfinished (the job panicked) records a `panic` failure.
pub struct JobTracker<'a> {
    state: &'a AppState,
    finished: bool,
}

/// Failure kind recorded for a job that never reported an outcome.
pub const PANIC_FAILURE: &str = "panic";

impl JobTracker<'_> {
    /// Record the outcome; `failure` is the error kind when the job failed.
    pub fn finish(mut self, failure: Option<&str>) {
        self.finished = true;
        self.state.job_finished(failure);
    }
}

impl Drop for JobTracker<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.state.job_finished(Some(PANIC_FAILURE));
        }
    }
}

impl AppMetrics {
    pub fn jobs_failed_total(&self) -> u64 {
        self.jobs_failed.values().sum()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        AppState::from_config(AppConfig::default())
    }

    #[test]
    fn test_job_slots_follow_config() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_jobs = 3;
        let state = AppState::from_config(config);
        assert_eq!(state.job_slots.available_permits(), 3);
    }

    #[test]
    fn test_job_counters() {
        let state = state();
        let first = state.start_job();
        let second = state.start_job();
        assert_eq!(state.get_metrics_snapshot().active_jobs, 2);
        first.finish(None);
        second.finish(Some("format_error"));
        state.start_job().finish(Some("format_error"));

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.active_jobs, 0);
        assert_eq!(metrics.jobs_completed, 1);
        assert_eq!(metrics.jobs_failed.get("format_error"), Some(&2));
        assert_eq!(metrics.jobs_failed_total(), 2);
    }

    #[test]
    fn test_panicking_job_is_still_accounted() {
        let state = state();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _job = state.start_job();
            panic!("inference blew up");
        }));

        assert!(outcome.is_err());
        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.active_jobs, 0);
        assert_eq!(metrics.jobs_completed, 0);
        assert_eq!(metrics.jobs_failed.get(PANIC_FAILURE), Some(&1));
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = state();
        state.record_endpoint_request("POST /transcribe", 100, false);
        state.record_endpoint_request("POST /transcribe", 300, true);

        let metrics = state.get_metrics_snapshot();
        let endpoint = &metrics.endpoint_metrics["POST /transcribe"];
        assert_eq!(endpoint.request_count, 2);
        assert_eq!(endpoint.average_duration_ms(), 200.0);
        assert_eq!(endpoint.error_rate(), 0.5);
    }
}
