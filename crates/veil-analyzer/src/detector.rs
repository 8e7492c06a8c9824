//! Attack detection engine
//!
//! Runs the signature detectors over every scannable request field and the
//! two rate detectors over per-IP sliding windows. Window state lives in
//! one mutex per map, held only for the O(window) purge-and-append, never
//! across I/O.
//!
//! The current instant is a parameter throughout so tests control the clock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;

use veil_core::{round_confidence, utc_now, AttackType, Finding, RequestSummary};

use crate::patterns::{
    is_auth_endpoint, Signature, DIR_ENUM_SIGNATURES, SCANNER_UA_SIGNATURES, SQLI_SIGNATURES,
    TRAVERSAL_SIGNATURES, XSS_SIGNATURES,
};

/// Auth attempts within the window needed to flag brute force
pub const BRUTE_FORCE_THRESHOLD: usize = 5;
pub const BRUTE_FORCE_WINDOW: Duration = Duration::from_secs(30);

/// Unique paths within the window needed to flag scanning
pub const SCAN_THRESHOLD: usize = 10;
pub const SCAN_WINDOW: Duration = Duration::from_secs(15);

/// Rate-tracking entries older than this are dropped by the periodic sweep
pub const STALE_MAX_AGE: Duration = Duration::from_secs(120);

/// Mirrored request metadata posted to `/analyze`
#[derive(Debug, Clone, Deserialize)]
pub struct RequestDescriptor {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub source_ip: Option<String>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub query_params: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl RequestDescriptor {
    pub fn source_ip(&self) -> &str {
        self.source_ip.as_deref().unwrap_or("unknown")
    }

    /// Header lookup, case-insensitive per HTTP semantics.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.as_ref().and_then(|headers| {
            headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str())
        })
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }

    pub fn summary(&self) -> RequestSummary {
        RequestSummary {
            method: self.method.clone(),
            path: self.path.clone(),
            source_ip: self.source_ip().to_string(),
            user_agent: self.user_agent().to_string(),
        }
    }

    /// Everything the signature detectors scan: the path, every query
    /// value, every body value, every header value, coerced to strings.
    pub fn scan_fields(&self) -> Vec<String> {
        let mut fields = vec![self.path.clone()];

        if let Some(params) = &self.query_params {
            for value in params.values() {
                flatten_value(value, &mut fields);
            }
        }
        if let Some(body) = &self.body {
            flatten_value(body, &mut fields);
        }
        if let Some(headers) = &self.headers {
            fields.extend(headers.values().cloned());
        }

        fields
    }
}

fn flatten_value(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => out.push(s.clone()),
        serde_json::Value::Number(n) => out.push(n.to_string()),
        serde_json::Value::Bool(b) => out.push(b.to_string()),
        serde_json::Value::Array(items) => {
            for item in items {
                flatten_value(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                flatten_value(item, out);
            }
        }
        serde_json::Value::Null => {}
    }
}

/// Stateful detector: signature matching plus per-IP rate windows.
#[derive(Default)]
pub struct AttackDetector {
    auth_attempts: Mutex<HashMap<String, VecDeque<Instant>>>,
    path_history: Mutex<HashMap<String, VecDeque<(Instant, String)>>>,
}

impl AttackDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every detection method against one request.
    pub fn analyze(&self, request: &RequestDescriptor) -> Vec<Finding> {
        self.analyze_at(request, Instant::now())
    }

    pub fn analyze_at(&self, request: &RequestDescriptor, now: Instant) -> Vec<Finding> {
        let summary = request.summary();
        let source_ip = request.source_ip().to_string();
        let fields = request.scan_fields();

        let mut findings = Vec::new();

        findings.extend(match_signatures(
            &SQLI_SIGNATURES,
            AttackType::Sqli,
            &fields,
            &source_ip,
            &summary,
        ));
        findings.extend(match_signatures(
            &XSS_SIGNATURES,
            AttackType::Xss,
            &fields,
            &source_ip,
            &summary,
        ));
        findings.extend(match_signatures(
            &TRAVERSAL_SIGNATURES,
            AttackType::PathTraversal,
            &fields,
            &source_ip,
            &summary,
        ));

        // Directory enumeration looks at the path only; one match is enough.
        if let Some(signature) = DIR_ENUM_SIGNATURES
            .iter()
            .find(|s| s.pattern.is_match(&request.path))
        {
            findings.push(finding(
                AttackType::DirEnum,
                signature.confidence,
                &source_ip,
                signature.evidence.to_string(),
                &summary,
            ));
        }

        // Scanner tools advertise themselves; stop at the first UA match.
        let user_agent = request.user_agent();
        if !user_agent.is_empty() {
            if let Some(signature) = SCANNER_UA_SIGNATURES
                .iter()
                .find(|s| s.pattern.is_match(user_agent))
            {
                findings.push(finding(
                    AttackType::ReconScanner,
                    signature.confidence,
                    &source_ip,
                    signature.evidence.to_string(),
                    &summary,
                ));
            }
        }

        if let Some(f) = self.detect_brute_force(request, &source_ip, &summary, now) {
            findings.push(f);
        }
        if let Some(f) = self.detect_scanning(request, &source_ip, &summary, now) {
            findings.push(f);
        }

        findings
    }

    /// POSTs against auth endpoints feed a 30 s window; five or more inside
    /// it flag brute force, confidence growing with volume.
    fn detect_brute_force(
        &self,
        request: &RequestDescriptor,
        source_ip: &str,
        summary: &RequestSummary,
        now: Instant,
    ) -> Option<Finding> {
        if !request.method.eq_ignore_ascii_case("POST") || !is_auth_endpoint(&request.path) {
            return None;
        }

        let count = {
            let mut attempts = self.auth_attempts.lock().unwrap();
            let window = attempts.entry(source_ip.to_string()).or_default();
            window.push_back(now);
            while window
                .front()
                .is_some_and(|t| now.duration_since(*t) >= BRUTE_FORCE_WINDOW)
            {
                window.pop_front();
            }
            window.len()
        };

        if count < BRUTE_FORCE_THRESHOLD {
            return None;
        }

        let confidence =
            (0.60 + 0.08 * (count - BRUTE_FORCE_THRESHOLD) as f64).min(0.98);
        Some(finding(
            AttackType::BruteForce,
            confidence,
            source_ip,
            format!(
                "{count} auth attempts within {}s",
                BRUTE_FORCE_WINDOW.as_secs()
            ),
            summary,
        ))
    }

    /// Every request feeds a 15 s `(time, path)` window; ten or more unique
    /// paths inside it flag scanning.
    fn detect_scanning(
        &self,
        request: &RequestDescriptor,
        source_ip: &str,
        summary: &RequestSummary,
        now: Instant,
    ) -> Option<Finding> {
        let unique = {
            let mut history = self.path_history.lock().unwrap();
            let window = history.entry(source_ip.to_string()).or_default();
            window.push_back((now, request.path.clone()));
            while window
                .front()
                .is_some_and(|(t, _)| now.duration_since(*t) >= SCAN_WINDOW)
            {
                window.pop_front();
            }
            window
                .iter()
                .map(|(_, path)| path.as_str())
                .collect::<HashSet<_>>()
                .len()
        };

        if unique < SCAN_THRESHOLD {
            return None;
        }

        let confidence = (0.65 + 0.05 * (unique - SCAN_THRESHOLD) as f64).min(0.98);
        Some(finding(
            AttackType::ReconScanning,
            confidence,
            source_ip,
            format!("{unique} unique paths within {}s", SCAN_WINDOW.as_secs()),
            summary,
        ))
    }

    /// Drop rate-tracking entries older than `max_age` and forget IPs whose
    /// windows become empty. Called by the periodic sweeper.
    pub fn purge_stale(&self, now: Instant, max_age: Duration) {
        {
            let mut attempts = self.auth_attempts.lock().unwrap();
            for window in attempts.values_mut() {
                while window
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= max_age)
                {
                    window.pop_front();
                }
            }
            attempts.retain(|_, window| !window.is_empty());
        }
        {
            let mut history = self.path_history.lock().unwrap();
            for window in history.values_mut() {
                while window
                    .front()
                    .is_some_and(|(t, _)| now.duration_since(*t) >= max_age)
                {
                    window.pop_front();
                }
            }
            history.retain(|_, window| !window.is_empty());
        }
    }

    /// Number of IPs currently tracked by each rate detector, for `/stats`.
    pub fn tracking_stats(&self) -> (usize, usize) {
        let auth = self.auth_attempts.lock().unwrap().len();
        let scan = self.path_history.lock().unwrap().len();
        (auth, scan)
    }
}

fn match_signatures(
    signatures: &[Signature],
    attack_type: AttackType,
    fields: &[String],
    source_ip: &str,
    summary: &RequestSummary,
) -> Vec<Finding> {
    let mut seen: HashSet<&'static str> = HashSet::new();
    let mut findings = Vec::new();

    for field in fields {
        for signature in signatures {
            if signature.pattern.is_match(field) && seen.insert(signature.evidence) {
                findings.push(finding(
                    attack_type,
                    signature.confidence,
                    source_ip,
                    signature.evidence.to_string(),
                    summary,
                ));
            }
        }
    }

    findings
}

fn finding(
    attack_type: AttackType,
    confidence: f64,
    source_ip: &str,
    evidence: String,
    summary: &RequestSummary,
) -> Finding {
    Finding {
        attack_type,
        confidence: round_confidence(confidence),
        source_ip: source_ip.to_string(),
        evidence,
        timestamp: utc_now(),
        raw_request_summary: summary.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, path: &str, ip: &str) -> RequestDescriptor {
        RequestDescriptor {
            method: method.to_string(),
            path: path.to_string(),
            source_ip: Some(ip.to_string()),
            headers: None,
            body: None,
            query_params: None,
            timestamp: None,
        }
    }

    #[test]
    fn sqli_in_query_param_is_found() {
        let mut req = request("GET", "/api/products", "1.2.3.4");
        req.query_params = Some(
            [("id".to_string(), serde_json::json!("1' OR 1=1--"))]
                .into_iter()
                .collect(),
        );

        let detector = AttackDetector::new();
        let findings = detector.analyze_at(&req, Instant::now());
        assert!(findings
            .iter()
            .any(|f| f.attack_type == AttackType::Sqli && f.confidence >= 0.95));
    }

    #[test]
    fn duplicate_evidence_reported_once() {
        let mut req = request("GET", "/api/products", "1.2.3.4");
        req.query_params = Some(
            [
                ("a".to_string(), serde_json::json!("1 OR 1=1")),
                ("b".to_string(), serde_json::json!("2 OR 2=2")),
            ]
            .into_iter()
            .collect(),
        );

        let detector = AttackDetector::new();
        let findings = detector.analyze_at(&req, Instant::now());
        let tautologies = findings
            .iter()
            .filter(|f| f.evidence == "sql boolean tautology")
            .count();
        assert_eq!(tautologies, 1);
    }

    #[test]
    fn brute_force_fires_at_exactly_five() {
        let detector = AttackDetector::new();
        let start = Instant::now();
        let req = request("POST", "/login", "9.9.9.9");

        for i in 0..4 {
            let findings = detector.analyze_at(&req, start + Duration::from_secs(i));
            assert!(
                !findings.iter().any(|f| f.attack_type == AttackType::BruteForce),
                "should not fire at attempt {}",
                i + 1
            );
        }

        let fifth = detector.analyze_at(&req, start + Duration::from_secs(4));
        let finding = fifth
            .iter()
            .find(|f| f.attack_type == AttackType::BruteForce)
            .expect("fifth attempt fires");
        assert_eq!(finding.confidence, 0.60);

        let sixth = detector.analyze_at(&req, start + Duration::from_secs(5));
        let finding = sixth
            .iter()
            .find(|f| f.attack_type == AttackType::BruteForce)
            .expect("sixth attempt fires");
        assert_eq!(finding.confidence, 0.68);
    }

    #[test]
    fn brute_force_window_evicts_at_exact_cutoff() {
        let detector = AttackDetector::new();
        let start = Instant::now();
        let req = request("POST", "/login", "9.9.9.9");

        for _ in 0..4 {
            detector.analyze_at(&req, start);
        }
        // Exactly 30 s later the first four are out of the window.
        let findings = detector.analyze_at(&req, start + BRUTE_FORCE_WINDOW);
        assert!(!findings.iter().any(|f| f.attack_type == AttackType::BruteForce));
    }

    #[test]
    fn brute_force_ignores_get_and_non_auth_paths() {
        let detector = AttackDetector::new();
        let now = Instant::now();
        for _ in 0..10 {
            let findings = detector.analyze_at(&request("GET", "/login", "9.9.9.9"), now);
            assert!(!findings.iter().any(|f| f.attack_type == AttackType::BruteForce));
            let findings = detector.analyze_at(&request("POST", "/api/products", "9.9.9.9"), now);
            assert!(!findings.iter().any(|f| f.attack_type == AttackType::BruteForce));
        }
    }

    #[test]
    fn scanning_fires_on_ten_unique_paths() {
        let detector = AttackDetector::new();
        let start = Instant::now();

        for i in 0..9 {
            let findings = detector.analyze_at(
                &request("GET", &format!("/probe/{i}"), "8.8.8.8"),
                start + Duration::from_millis(i * 100),
            );
            assert!(!findings.iter().any(|f| f.attack_type == AttackType::ReconScanning));
        }

        let findings = detector.analyze_at(
            &request("GET", "/probe/9", "8.8.8.8"),
            start + Duration::from_secs(1),
        );
        let finding = findings
            .iter()
            .find(|f| f.attack_type == AttackType::ReconScanning)
            .expect("tenth unique path fires");
        assert_eq!(finding.confidence, 0.65);
    }

    #[test]
    fn repeated_path_does_not_count_as_unique() {
        let detector = AttackDetector::new();
        let now = Instant::now();
        for _ in 0..20 {
            let findings = detector.analyze_at(&request("GET", "/same", "8.8.8.8"), now);
            assert!(!findings.iter().any(|f| f.attack_type == AttackType::ReconScanning));
        }
    }

    #[test]
    fn scanner_user_agent_stops_at_first_match() {
        let mut req = request("GET", "/", "7.7.7.7");
        req.headers = Some(
            [("User-Agent".to_string(), "sqlmap/1.7 nikto".to_string())]
                .into_iter()
                .collect(),
        );

        let detector = AttackDetector::new();
        let findings = detector.analyze_at(&req, Instant::now());
        let scanners: Vec<_> = findings
            .iter()
            .filter(|f| f.attack_type == AttackType::ReconScanner)
            .collect();
        assert_eq!(scanners.len(), 1);
        assert_eq!(scanners[0].evidence, "sqlmap user-agent");
    }

    #[test]
    fn purge_drops_stale_ips() {
        let detector = AttackDetector::new();
        let start = Instant::now();
        detector.analyze_at(&request("POST", "/login", "9.9.9.9"), start);
        detector.analyze_at(&request("GET", "/a", "8.8.8.8"), start);

        let (auth, scan) = detector.tracking_stats();
        assert_eq!((auth, scan), (1, 2));

        detector.purge_stale(start + STALE_MAX_AGE, STALE_MAX_AGE);
        let (auth, scan) = detector.tracking_stats();
        assert_eq!((auth, scan), (0, 0));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut req = request("GET", "/", "1.1.1.1");
        req.headers = Some(
            [("USER-AGENT".to_string(), "gobuster/3.5".to_string())]
                .into_iter()
                .collect(),
        );
        assert_eq!(req.user_agent(), "gobuster/3.5");
    }
}
