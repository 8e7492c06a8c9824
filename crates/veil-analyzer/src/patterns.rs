//! Attack signature library
//!
//! Signature sets compiled once at startup. Each entry pairs a regex with a
//! stable evidence label and an authored confidence in [0.30, 0.98].
//! Confidence reflects how often the pattern appears in benign traffic:
//! `robots.txt` fetches are nearly always harmless, a sqlmap user-agent
//! never is.

use lazy_static::lazy_static;
use regex::Regex;

/// A compiled signature
pub struct Signature {
    pub pattern: Regex,
    /// Evidence label reported in findings; detectors deduplicate on it
    pub evidence: &'static str,
    pub confidence: f64,
}

fn sig(pattern: &str, evidence: &'static str, confidence: f64) -> Signature {
    Signature {
        // Authored patterns; a failure here is a programming error caught by
        // the pattern tests.
        pattern: Regex::new(pattern).expect("invalid authored signature"),
        evidence,
        confidence,
    }
}

lazy_static! {
    /// SQL injection signatures
    pub static ref SQLI_SIGNATURES: Vec<Signature> = vec![
        sig(r"(?i)\b(or|and)\s+\d+\s*=\s*\d+", "sql boolean tautology", 0.95),
        sig(r"(?i)('|%27)\s*(or|and)\s*('|%27)?[\w\s]*('|%27)?\s*=\s*", "sql quoted tautology", 0.95),
        sig(r"(?i)\bunion\b\s+(all\s+)?select\b", "union-select probe", 0.95),
        sig(r"(?i)\b(drop|truncate|alter)\s+(table|database)\b", "destructive sql statement", 0.97),
        sig(r"(?i)\bdelete\s+from\s+\w+", "sql delete statement", 0.85),
        sig(r"(?i)\binsert\s+into\s+\w+", "sql insert statement", 0.82),
        sig(r"(?i)\b(sleep|benchmark|pg_sleep)\s*\(", "time-based blind probe", 0.92),
        sig(r"(?i)\bwaitfor\s+delay\b", "time-based blind probe (mssql)", 0.92),
        sig(r"(?i)['\d]\s*(--|#)", "sql comment evasion", 0.78),
        sig(r"(?i)/\*.*\*/", "sql block comment evasion", 0.72),
        sig(r"(?i)\binformation_schema\b", "information-schema probe", 0.90),
        sig(r"(?i)\b0x[0-9a-f]{8,}\b", "hex-encoded sql payload", 0.70),
        sig(r"(?i)\bexec\b.{0,40}\bxp_cmdshell\b", "sql command execution", 0.97),
    ];

    /// Cross-site scripting signatures
    pub static ref XSS_SIGNATURES: Vec<Signature> = vec![
        sig(r"(?i)<\s*script[^>]*>", "script tag", 0.95),
        sig(r"(?i)javascript\s*:", "javascript uri", 0.90),
        sig(r"(?i)\bon(load|error|click|mouseover|focus|submit)\s*=", "event-handler attribute", 0.85),
        sig(r"(?i)<\s*(img|svg|iframe|body|input)[^>]*\bon\w+\s*=", "tag with inline handler", 0.88),
        sig(r"(?i)\b(alert|prompt|confirm|eval)\s*\(", "script function call", 0.80),
        sig(r"(?i)(document\.(cookie|write|location)|window\.location)", "dom sink access", 0.85),
        sig(r"(?i)data:text/html", "data uri payload", 0.80),
        sig(r"(?i)\bexpression\s*\(", "css expression", 0.75),
    ];

    /// Path traversal signatures
    pub static ref TRAVERSAL_SIGNATURES: Vec<Signature> = vec![
        sig(r"\.\./", "dot-dot-slash traversal", 0.85),
        sig(r"\.\.\\", "backslash traversal", 0.85),
        sig(r"(?i)(%2e%2e(%2f|%5c|/)|\.\.%2f|\.\.%5c)", "url-encoded traversal", 0.88),
        sig(r"(?i)%252e%252e(%252f|%255c)", "double-encoded traversal", 0.90),
        sig(r"(?i)/etc/(passwd|shadow|hosts)\b", "sensitive posix path", 0.92),
        sig(r"(?i)(boot\.ini|win\.ini|system32(/|\\)config)", "sensitive windows path", 0.92),
        sig(r"(?i)proc/self/environ", "process environment probe", 0.90),
    ];

    /// Scanner and attack-tool user-agents
    pub static ref SCANNER_UA_SIGNATURES: Vec<Signature> = vec![
        sig(r"(?i)sqlmap", "sqlmap user-agent", 0.98),
        sig(r"(?i)nikto", "nikto user-agent", 0.97),
        sig(r"(?i)\bnmap\b", "nmap user-agent", 0.95),
        sig(r"(?i)masscan", "masscan user-agent", 0.95),
        sig(r"(?i)dirbuster", "dirbuster user-agent", 0.95),
        sig(r"(?i)gobuster", "gobuster user-agent", 0.95),
        sig(r"(?i)feroxbuster", "feroxbuster user-agent", 0.95),
        sig(r"(?i)wfuzz", "wfuzz user-agent", 0.94),
        sig(r"(?i)burp\s*suite", "burpsuite user-agent", 0.92),
        sig(r"(?i)\bhydra\b", "hydra user-agent", 0.95),
        sig(r"(?i)metasploit", "metasploit user-agent", 0.95),
        sig(r"(?i)\bw3af\b", "w3af user-agent", 0.94),
        sig(r"(?i)(owasp[ -]?zap|zaproxy)", "zap user-agent", 0.92),
    ];

    /// Directory enumeration paths. Low-confidence entries (`robots.txt`,
    /// `.well-known`) appear in plenty of benign traffic and stay under the
    /// default reporting threshold on their own.
    pub static ref DIR_ENUM_SIGNATURES: Vec<Signature> = vec![
        sig(r"(?i)/(admin|administrator)(/|$)", "admin console probe", 0.70),
        sig(r"(?i)/wp-(admin|login|content)", "cms path probe", 0.75),
        sig(r"(?i)/phpmyadmin", "db console probe", 0.80),
        sig(r"(?i)/\.git(/|$)", "vcs metadata probe", 0.85),
        sig(r"(?i)/\.env(\.|$)", "environment file probe", 0.85),
        sig(r"(?i)/actuator(/|$)", "actuator probe", 0.75),
        sig(r"(?i)/(swagger|api-docs)", "api docs probe", 0.65),
        sig(r"(?i)/cgi-bin/", "cgi probe", 0.75),
        sig(r"(?i)/server-status$", "server status probe", 0.70),
        sig(r"(?i)/console(/|$)", "web console probe", 0.65),
        sig(r"(?i)/(backup|dump)\.(sql|zip|tar\.gz)$", "backup file probe", 0.80),
        sig(r"(?i)/(config|configuration)\.(php|json|ya?ml)$", "config file probe", 0.78),
        sig(r"(?i)/robots\.txt$", "robots.txt fetch", 0.30),
        sig(r"(?i)/\.well-known/", "well-known path fetch", 0.35),
    ];

    /// Paths treated as authentication endpoints for brute-force tracking
    pub static ref AUTH_ENDPOINTS: Vec<Regex> = vec![
        Regex::new(r"(?i)/(login|signin)(/|$)").unwrap(),
        Regex::new(r"(?i)/auth(/|$)").unwrap(),
        Regex::new(r"(?i)/wp-login").unwrap(),
        Regex::new(r"(?i)/api/token$").unwrap(),
        Regex::new(r"(?i)/api/v\d+/auth(/|$)").unwrap(),
        Regex::new(r"(?i)/api/cart/[^/]+/checkout$").unwrap(),
        Regex::new(r"(?i)/admin/login").unwrap(),
    ];
}

/// Whether a path looks like an authentication endpoint.
pub fn is_auth_endpoint(path: &str) -> bool {
    AUTH_ENDPOINTS.iter().any(|re| re.is_match(path))
}

/// Force-compile every table; called once at startup so a bad pattern fails
/// fast instead of inside a request handler.
pub fn warm() {
    let total = SQLI_SIGNATURES.len()
        + XSS_SIGNATURES.len()
        + TRAVERSAL_SIGNATURES.len()
        + SCANNER_UA_SIGNATURES.len()
        + DIR_ENUM_SIGNATURES.len()
        + AUTH_ENDPOINTS.len();
    tracing::debug!("compiled {total} attack signatures");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_match<'a>(signatures: &'a [Signature], field: &str) -> Option<&'a Signature> {
        signatures.iter().find(|s| s.pattern.is_match(field))
    }

    #[test]
    fn classic_tautology_scores_high() {
        let hit = first_match(&SQLI_SIGNATURES, "1' OR 1=1--").expect("should match");
        assert!(hit.confidence >= 0.95);
    }

    #[test]
    fn union_select_and_ddl_match() {
        assert!(first_match(&SQLI_SIGNATURES, "1 UNION SELECT username,password FROM users").is_some());
        assert!(first_match(&SQLI_SIGNATURES, "1; DROP TABLE products;--").is_some());
        assert!(first_match(&SQLI_SIGNATURES, "1' AND SLEEP(5)--").is_some());
        assert!(first_match(&SQLI_SIGNATURES, "id=1 AND 1=1 UNION SELECT table_name FROM information_schema.tables").is_some());
    }

    #[test]
    fn xss_vectors_match() {
        assert!(first_match(&XSS_SIGNATURES, "<script>alert(1)</script>").is_some());
        assert!(first_match(&XSS_SIGNATURES, "javascript:alert(document.cookie)").is_some());
        assert!(first_match(&XSS_SIGNATURES, "<img src=x onerror=alert(1)>").is_some());
        assert!(first_match(&XSS_SIGNATURES, "data:text/html;base64,PHNjcmlwdD4=").is_some());
    }

    #[test]
    fn traversal_variants_match() {
        assert!(first_match(&TRAVERSAL_SIGNATURES, "../../etc/passwd").is_some());
        assert!(first_match(&TRAVERSAL_SIGNATURES, "..%2f..%2fetc%2fpasswd").is_some());
        assert!(first_match(&TRAVERSAL_SIGNATURES, "%252e%252e%252fetc").is_some());
        assert!(first_match(&TRAVERSAL_SIGNATURES, "c:\\windows\\win.ini").is_some());
    }

    #[test]
    fn sqlmap_user_agent_scores_at_least_ninety_five() {
        let hit = first_match(&SCANNER_UA_SIGNATURES, "sqlmap/1.7.2#stable (https://sqlmap.org)")
            .expect("should match");
        assert!(hit.confidence >= 0.95);
    }

    #[test]
    fn benign_enumeration_paths_stay_low() {
        let robots = first_match(&DIR_ENUM_SIGNATURES, "/robots.txt").expect("should match");
        assert!(robots.confidence < 0.6);
        let well_known = first_match(&DIR_ENUM_SIGNATURES, "/.well-known/security.txt")
            .expect("should match");
        assert!(well_known.confidence < 0.6);
    }

    #[test]
    fn auth_endpoints_cover_spec_list() {
        for path in [
            "/login",
            "/signin",
            "/auth",
            "/wp-login.php",
            "/api/token",
            "/api/v2/auth",
            "/api/cart/42/checkout",
            "/admin/login",
        ] {
            assert!(is_auth_endpoint(path), "expected auth endpoint: {path}");
        }
        assert!(!is_auth_endpoint("/api/products"));
    }

    #[test]
    fn all_confidences_inside_authored_range() {
        for table in [
            &*SQLI_SIGNATURES,
            &*XSS_SIGNATURES,
            &*TRAVERSAL_SIGNATURES,
            &*SCANNER_UA_SIGNATURES,
            &*DIR_ENUM_SIGNATURES,
        ] {
            for signature in table {
                assert!(
                    (0.30..=0.98).contains(&signature.confidence),
                    "{} out of range",
                    signature.evidence
                );
            }
        }
    }
}
