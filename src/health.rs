//! # Health and Metrics Endpoints
//!
//! - `GET /health`: liveness plus dependency status (transcoder, inference backend,
//!   compute device)
//! - `GET /api/v1/metrics`: per-endpoint latencies and job counters
//!
//! A missing transcoder does not make the service unhealthy: WAV and anything the
//! in-process decoder handles still work, so the status drops to `degraded`.

use crate::audio::TranscoderStatus;
use crate::device::DeviceManager;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    let pipeline = state.pipeline.clone();
    let transcoder_status = web::block(move || pipeline.transcoder().probe())
        .await
        .unwrap_or_else(|e| TranscoderStatus::Broken(format!("probe did not run: {}", e)));

    let transcoder = match &transcoder_status {
        TranscoderStatus::Available { version } => json!({
            "program": config.transcoder.program,
            "status": "available",
            "version": version
        }),
        TranscoderStatus::Missing => json!({
            "program": config.transcoder.program,
            "status": "missing"
        }),
        TranscoderStatus::Broken(reason) => json!({
            "program": config.transcoder.program,
            "status": "broken",
            "reason": reason
        }),
    };

    HttpResponse::Ok().json(json!({
        "status": if transcoder_status.is_available() { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": overall_error_rate(&metrics),
            "active_jobs": metrics.active_jobs
        },
        "dependencies": {
            "transcoder": transcoder,
            "inference": {
                "backend": state.pipeline.engine().backend_name(),
                "model": state.pipeline.engine().options().model,
                "device": DeviceManager::get_device_summary(&config.engine.device)
            }
        },
        "memory": get_memory_info(),
        "system": get_system_status(state.config.performance.max_concurrent_jobs, &metrics)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": overall_error_rate(&metrics),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "jobs": {
            "active": metrics.active_jobs,
            "completed": metrics.jobs_completed,
            "failed_total": metrics.jobs_failed_total(),
            "failed_by_kind": metrics.jobs_failed
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
        "performance": {
            "max_concurrent_jobs": state.config.performance.max_concurrent_jobs,
            "available_job_slots": state.job_slots.available_permits(),
            "max_upload_bytes": state.config.performance.max_upload_bytes
        }
    }))
}

fn overall_error_rate(metrics: &AppMetrics) -> f64 {
    if metrics.request_count > 0 {
        metrics.error_count as f64 / metrics.request_count as f64
    } else {
        0.0
    }
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let pid = process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                let bytes = || {
                    line.split_whitespace()
                        .nth(1)
                        .and_then(|kb| kb.parse::<u64>().ok())
                        .unwrap_or(0)
                        * 1024
                };
                if line.starts_with("VmRSS:") {
                    vm_rss = bytes();
                } else if line.starts_with("VmSize:") {
                    vm_size = bytes();
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": format!("Memory info not available for pid {}", process::id())
    })
}

fn get_system_status(max_jobs: usize, metrics: &AppMetrics) -> serde_json::Value {
    let job_usage = if max_jobs > 0 {
        metrics.active_jobs as f64 / max_jobs as f64
    } else {
        0.0
    };

    let status = if job_usage >= 1.0 {
        "saturated"
    } else if job_usage > 0.5 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "job_usage_percent": (job_usage * 100.0).round(),
        "max_jobs": max_jobs,
        "current_jobs": metrics.active_jobs,
        "load_warnings": if job_usage >= 1.0 {
            vec!["All job slots busy - new uploads wait for a free slot"]
        } else {
            vec![]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test, App};

    fn state_without_transcoder() -> AppState {
        let mut config = AppConfig::default();
        config.transcoder.program = "no-such-transcoder-7c1e".to_string();
        AppState::from_config(config)
    }

    #[actix_web::test]
    async fn test_health_reports_missing_transcoder() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state_without_transcoder()))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "degraded");
        assert_eq!(body["dependencies"]["transcoder"]["status"], "missing");
        assert_eq!(body["dependencies"]["inference"]["backend"], "builtin");
        assert_eq!(body["metrics"]["active_jobs"], 0);
    }

    #[actix_web::test]
    async fn test_metrics_include_job_counters() {
        let state = state_without_transcoder();
        state.start_job().finish(Some("format_error"));

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["jobs"]["failed_total"], 1);
        assert_eq!(body["jobs"]["failed_by_kind"]["format_error"], 1);
        assert_eq!(body["performance"]["available_job_slots"], 2);
    }

    #[actix_web::test]
    async fn test_system_status_saturation() {
        let metrics = AppMetrics { active_jobs: 2, ..Default::default() };
        assert_eq!(get_system_status(2, &metrics)["status"], "saturated");
        assert_eq!(get_system_status(8, &metrics)["status"], "normal");
    }
}
