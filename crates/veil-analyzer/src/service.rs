//! Traffic analyzer HTTP service
//!
//! Endpoints:
//! - `POST /analyze`        — classify one mirrored request, publish on hit
//! - `GET  /stats`          — detection statistics
//! - `GET  /recent-attacks` — last 100 attacks, newest first
//! - `GET  /health`         — health check

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use tracing::info;

use veil_bus::{channels, publish_event, EventBus};
use veil_core::{http::service_node, utc_now, AnalyzerConfig, ApiError, AttackEvent, Finding};

use crate::detector::{AttackDetector, RequestDescriptor, STALE_MAX_AGE};
use crate::patterns;

pub const SERVICE_NAME: &str = "traffic-analyzer";

/// Capacity of the recent-attacks ring
const MAX_RECENT_ATTACKS: usize = 100;

/// Cadence of the stale-state sweeper
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Default)]
pub struct AnalyzerStats {
    pub total_analyzed: u64,
    pub total_attacks_detected: u64,
    pub attacks_by_type: HashMap<String, u64>,
}

pub struct AnalyzerState {
    pub config: AnalyzerConfig,
    pub detector: AttackDetector,
    pub bus: Arc<dyn EventBus>,
    stats: Mutex<AnalyzerStats>,
    recent: Mutex<VecDeque<AttackEvent>>,
    started_at: DateTime<Utc>,
}

pub type SharedState = Arc<AnalyzerState>;

impl AnalyzerState {
    pub fn new(config: AnalyzerConfig, bus: Arc<dyn EventBus>) -> Self {
        Self {
            config,
            detector: AttackDetector::new(),
            bus,
            stats: Mutex::new(AnalyzerStats::default()),
            recent: Mutex::new(VecDeque::with_capacity(MAX_RECENT_ATTACKS)),
            started_at: Utc::now(),
        }
    }

    /// Recorded attacks, newest first.
    pub fn recent_attacks(&self) -> Vec<AttackEvent> {
        let recent = self.recent.lock().unwrap();
        recent.iter().rev().cloned().collect()
    }

    fn record_attack(&self, event: &AttackEvent) {
        {
            let mut stats = self.stats.lock().unwrap();
            stats.total_attacks_detected += 1;
            for finding in &event.all_findings {
                *stats
                    .attacks_by_type
                    .entry(finding.attack_type.to_string())
                    .or_default() += 1;
            }
        }
        let mut recent = self.recent.lock().unwrap();
        recent.push_back(event.clone());
        while recent.len() > MAX_RECENT_ATTACKS {
            recent.pop_front();
        }
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/analyze", post(analyze))
        .route("/stats", get(stats))
        .route("/recent-attacks", get(recent_attacks))
        .route("/health", get(health))
        .with_state(state)
        .layer(axum::middleware::from_fn_with_state(
            SERVICE_NAME,
            service_node,
        ))
}

async fn analyze(
    State(state): State<SharedState>,
    body: Option<Json<serde_json::Value>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(Json(body)) = body else {
        return Err(ApiError::bad_request("Request body must be valid JSON"));
    };
    analyze_payload(&state, body).await.map(Json)
}

/// The `/analyze` flow behind the extractor layer: validate, detect, filter
/// by threshold, publish, record.
pub async fn analyze_payload(
    state: &AnalyzerState,
    body: serde_json::Value,
) -> Result<serde_json::Value, ApiError> {
    let Some(fields) = body.as_object() else {
        return Err(ApiError::bad_request("Request body must be valid JSON"));
    };
    if !fields.contains_key("method") || !fields.contains_key("path") {
        return Err(ApiError::bad_request(
            "Missing required fields: method, path",
        ));
    }

    let request: RequestDescriptor = serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid request descriptor: {e}")))?;

    let findings = state.detector.analyze(&request);
    {
        state.stats.lock().unwrap().total_analyzed += 1;
    }

    let threshold = state.config.confidence_threshold;
    let mut strong: Vec<Finding> = findings
        .into_iter()
        .filter(|f| f.confidence > threshold)
        .collect();

    if strong.is_empty() {
        return Ok(serde_json::json!({
            "attack": false,
            "type": null,
            "confidence": null,
            "action": "allow",
            "findings_count": 0,
            "top_finding": null,
        }));
    }

    // The highest-confidence finding drives the verdict and the event.
    strong.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    let top = strong[0].clone();

    let event = AttackEvent {
        timestamp: utc_now(),
        kind: "attack_detected".to_string(),
        attack_type: top.attack_type,
        confidence: top.confidence,
        source_ip: top.source_ip.clone(),
        evidence: top.evidence.clone(),
        findings_count: strong.len(),
        all_findings: strong.clone(),
        request: request.summary(),
        attack_id: None,
    };

    publish_event(state.bus.as_ref(), channels::ATTACK_DETECTED, &event).await;
    state.record_attack(&event);

    Ok(serde_json::json!({
        "attack": true,
        "type": top.attack_type,
        "confidence": top.confidence,
        "action": "redirect_to_decoy",
        "findings_count": event.findings_count,
        "top_finding": top,
    }))
}

async fn stats(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let (total_analyzed, total_attacks_detected, attacks_by_type) = {
        let stats = state.stats.lock().unwrap();
        (
            stats.total_analyzed,
            stats.total_attacks_detected,
            stats.attacks_by_type.clone(),
        )
    };
    let (tracked_auth_ips, tracked_scan_ips) = state.detector.tracking_stats();

    let detection_rate = if total_analyzed > 0 {
        (total_attacks_detected as f64 / total_analyzed as f64 * 10_000.0).round() / 10_000.0
    } else {
        0.0
    };

    Json(serde_json::json!({
        "total_analyzed": total_analyzed,
        "total_attacks_detected": total_attacks_detected,
        "attacks_by_type": attacks_by_type,
        "detection_rate": detection_rate,
        "confidence_threshold": state.config.confidence_threshold,
        "started_at": state.started_at.to_rfc3339(),
        "uptime_seconds": (Utc::now() - state.started_at).num_seconds(),
        "tracking_state": {
            "tracked_auth_ips": tracked_auth_ips,
            "tracked_scan_ips": tracked_scan_ips,
        },
    }))
}

async fn recent_attacks(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let attacks = state.recent_attacks();

    Json(serde_json::json!({
        "count": attacks.len(),
        "max_stored": MAX_RECENT_ATTACKS,
        "attacks": attacks,
    }))
}

async fn health(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let redis_connected = state.bus.healthy().await;
    let total_analyzed = state.stats.lock().unwrap().total_analyzed;

    Json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "redis_connected": redis_connected,
        "total_analyzed": total_analyzed,
    }))
}

/// Run the analyzer: sweeper task plus the HTTP server.
pub async fn run(config: AnalyzerConfig, bus: Arc<dyn EventBus>) -> anyhow::Result<()> {
    patterns::warm();

    let state = Arc::new(AnalyzerState::new(config.clone(), bus));

    let sweeper = state.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SWEEP_INTERVAL).await;
            sweeper.detector.purge_stale(Instant::now(), STALE_MAX_AGE);
        }
    });

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!("traffic analyzer listening on 0.0.0.0:{}", config.port);
    axum::serve(listener, app).await?;

    Ok(())
}
