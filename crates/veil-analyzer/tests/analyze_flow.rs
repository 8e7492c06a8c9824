//! End-to-end analyzer flow: payload in, verdict out, event on the bus.

use std::sync::Arc;

use veil_analyzer::{analyze_payload, AnalyzerState};
use veil_bus::{channels, MemoryBus};
use veil_core::AnalyzerConfig;

fn test_state(bus: Arc<MemoryBus>) -> AnalyzerState {
    let config = AnalyzerConfig {
        port: 0,
        confidence_threshold: 0.6,
        bus: veil_core::BusConfig {
            url: "redis://unused".to_string(),
        },
    };
    AnalyzerState::new(config, bus)
}

#[tokio::test]
async fn sqli_request_is_flagged_and_published() {
    let bus = Arc::new(MemoryBus::new());
    let state = test_state(bus.clone());

    let verdict = analyze_payload(
        &state,
        serde_json::json!({
            "method": "GET",
            "path": "/api/products?id=1'%20OR%201=1--",
            "source_ip": "1.2.3.4",
            "query_params": {"id": "1' OR 1=1--"},
        }),
    )
    .await
    .unwrap();

    assert_eq!(verdict["attack"], true);
    assert_eq!(verdict["type"], "sqli");
    assert_eq!(verdict["action"], "redirect_to_decoy");
    assert!(verdict["confidence"].as_f64().unwrap() >= 0.95);

    let published = bus.events_on(channels::ATTACK_DETECTED);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["type"], "attack_detected");
    assert_eq!(published[0]["attack_type"], "sqli");
    assert_eq!(published[0]["source_ip"], "1.2.3.4");
    assert_eq!(published[0]["request"]["path"], "/api/products?id=1'%20OR%201=1--");
    assert!(published[0]["findings_count"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn benign_request_is_allowed_and_unpublished() {
    let bus = Arc::new(MemoryBus::new());
    let state = test_state(bus.clone());

    let verdict = analyze_payload(
        &state,
        serde_json::json!({
            "method": "GET",
            "path": "/api/products",
            "source_ip": "10.0.0.1",
        }),
    )
    .await
    .unwrap();

    assert_eq!(verdict["attack"], false);
    assert_eq!(verdict["action"], "allow");
    assert!(verdict["type"].is_null());
    assert!(bus.events().is_empty());
    assert!(state.recent_attacks().is_empty());
}

#[tokio::test]
async fn missing_required_fields_is_rejected() {
    let bus = Arc::new(MemoryBus::new());
    let state = test_state(bus);

    let err = analyze_payload(&state, serde_json::json!({"path": "/x"}))
        .await
        .unwrap_err();
    assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);

    let err = analyze_payload(&state, serde_json::json!("just a string"))
        .await
        .unwrap_err();
    assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn brute_force_at_exact_threshold_is_excluded() {
    let bus = Arc::new(MemoryBus::new());
    let state = test_state(bus.clone());

    let login = serde_json::json!({
        "method": "POST",
        "path": "/login",
        "source_ip": "9.9.9.9",
        "body": {"username": "admin", "password": "guess"},
    });

    // First four attempts stay under the rate threshold entirely.
    for _ in 0..4 {
        let verdict = analyze_payload(&state, login.clone()).await.unwrap();
        assert_eq!(verdict["attack"], false);
    }

    // The fifth attempt produces a 0.60 finding, which the strict
    // greater-than filter excludes at the default 0.6 threshold.
    let fifth = analyze_payload(&state, login.clone()).await.unwrap();
    assert_eq!(fifth["attack"], false);
    assert!(bus.events().is_empty());

    // The sixth climbs to 0.68 and is reported.
    let sixth = analyze_payload(&state, login).await.unwrap();
    assert_eq!(sixth["attack"], true);
    assert_eq!(sixth["type"], "brute_force");
    assert_eq!(sixth["confidence"], 0.68);
    assert_eq!(bus.events_on(channels::ATTACK_DETECTED).len(), 1);
}

#[tokio::test]
async fn recent_attacks_newest_first() {
    let bus = Arc::new(MemoryBus::new());
    let state = test_state(bus);

    for ip in ["1.1.1.1", "2.2.2.2"] {
        analyze_payload(
            &state,
            serde_json::json!({
                "method": "GET",
                "path": "/search",
                "source_ip": ip,
                "query_params": {"q": "<script>alert(1)</script>"},
            }),
        )
        .await
        .unwrap();
    }

    let recent = state.recent_attacks();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].source_ip, "2.2.2.2");
    assert_eq!(recent[1].source_ip, "1.1.1.1");
}

#[tokio::test]
async fn bus_outage_does_not_break_analysis() {
    let bus = Arc::new(MemoryBus::new());
    bus.set_down(true);
    let state = test_state(bus.clone());

    let verdict = analyze_payload(
        &state,
        serde_json::json!({
            "method": "GET",
            "path": "/etc/passwd",
            "source_ip": "6.6.6.6",
            "query_params": {"file": "../../etc/passwd"},
        }),
    )
    .await
    .unwrap();

    // Verdict still reaches the caller even though the publish was dropped.
    assert_eq!(verdict["attack"], true);
    assert_eq!(verdict["type"], "path_traversal");
    assert!(bus.events().is_empty());
}
