//! Attack Simulator - Main Entry Point
//!
//! Replays canned attack suites against the traffic analyzer's `/analyze`
//! endpoint and prints each verdict. Useful for demos and for exercising
//! the full deception pipeline end to end: a flagged request should
//! materialize a decoy set and a routing update within seconds.

use std::time::Duration;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "veil-simulator")]
#[command(about = "VEIL attack simulator - replay attack suites against the traffic analyzer")]
#[command(version)]
struct Args {
    /// Analyzer base URL
    #[arg(short, long, default_value = "http://localhost:8085")]
    target: String,

    /// Attack suite to run
    #[arg(short, long, value_enum, default_value_t = Suite::All)]
    suite: Suite,

    /// Delay between requests in milliseconds
    #[arg(long, default_value_t = 300)]
    delay_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Suite {
    Sqli,
    Xss,
    Traversal,
    BruteForce,
    Scan,
    All,
}

struct Shot {
    method: &'static str,
    path: String,
    query: Option<(&'static str, &'static str)>,
    body: Option<serde_json::Value>,
    user_agent: &'static str,
}

const BROWSER_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

fn sqli_suite() -> (&'static str, Vec<Shot>) {
    let payloads = [
        "1' OR '1'='1",
        "1' OR '1'='1'--",
        "1 UNION SELECT NULL,NULL,NULL--",
        "1 UNION SELECT username,password,NULL FROM users--",
        "1; DROP TABLE products;--",
        "1' AND SLEEP(5)--",
        "1' WAITFOR DELAY '0:0:5'--",
        "1' AND 1=1 UNION SELECT table_name,NULL FROM information_schema.tables--",
    ];
    let mut shots: Vec<Shot> = payloads
        .iter()
        .map(|payload| Shot {
            method: "GET",
            path: "/api/products".to_string(),
            query: Some(("id", *payload)),
            body: None,
            user_agent: BROWSER_UA,
        })
        .collect();
    shots.push(Shot {
        method: "POST",
        path: "/api/login".to_string(),
        query: None,
        body: Some(serde_json::json!({
            "username": "admin' OR '1'='1'--",
            "password": "anything",
        })),
        user_agent: BROWSER_UA,
    });
    ("192.168.1.66", shots)
}

fn xss_suite() -> (&'static str, Vec<Shot>) {
    let payloads = [
        "<script>alert('xss')</script>",
        "<img src=x onerror=alert(1)>",
        "javascript:alert(document.cookie)",
        "<svg onload=alert(1)>",
        "<iframe src=\"data:text/html,<script>alert(1)</script>\">",
    ];
    let shots = payloads
        .iter()
        .map(|payload| Shot {
            method: "GET",
            path: "/search".to_string(),
            query: Some(("q", *payload)),
            body: None,
            user_agent: BROWSER_UA,
        })
        .collect();
    ("192.168.1.67", shots)
}

fn traversal_suite() -> (&'static str, Vec<Shot>) {
    let paths = [
        "/static/../../../etc/passwd",
        "/images/..%2f..%2f..%2fetc%2fshadow",
        "/download?file=..%252e%252e%252fboot.ini",
        "/assets/../../windows/win.ini",
        "/files/../../../proc/self/environ",
    ];
    let shots = paths
        .iter()
        .map(|path| Shot {
            method: "GET",
            path: (*path).to_string(),
            query: None,
            body: None,
            user_agent: BROWSER_UA,
        })
        .collect();
    ("192.168.1.68", shots)
}

fn brute_force_suite() -> (&'static str, Vec<Shot>) {
    let shots = (0..8)
        .map(|attempt| Shot {
            method: "POST",
            path: "/login".to_string(),
            query: None,
            body: Some(serde_json::json!({
                "username": "admin",
                "password": format!("password{attempt}"),
            })),
            user_agent: "hydra-agent/9.4",
        })
        .collect();
    ("192.168.1.69", shots)
}

fn scan_suite() -> (&'static str, Vec<Shot>) {
    let paths = [
        "/admin", "/wp-login.php", "/phpmyadmin", "/.git/config", "/.env",
        "/actuator/health", "/swagger-ui.html", "/cgi-bin/test.cgi",
        "/server-status", "/console", "/backup.sql", "/config.php",
    ];
    let shots = paths
        .iter()
        .map(|path| Shot {
            method: "GET",
            path: (*path).to_string(),
            query: None,
            body: None,
            user_agent: "gobuster/3.6",
        })
        .collect();
    ("192.168.1.70", shots)
}

async fn run_suite(
    client: &reqwest::Client,
    target: &str,
    label: &str,
    attacker_ip: &str,
    shots: Vec<Shot>,
    delay: Duration,
) -> anyhow::Result<()> {
    println!("== {label} suite from {attacker_ip} ({} requests)", shots.len());

    for shot in shots {
        let mut descriptor = serde_json::json!({
            "method": shot.method,
            "path": shot.path,
            "source_ip": attacker_ip,
            "headers": { "User-Agent": shot.user_agent },
        });
        if let Some((key, value)) = shot.query {
            descriptor["query_params"] = serde_json::json!({ key: value });
        }
        if let Some(body) = shot.body {
            descriptor["body"] = body;
        }

        let response = client
            .post(format!("{target}/analyze"))
            .json(&descriptor)
            .timeout(Duration::from_secs(10))
            .send()
            .await;

        match response {
            Ok(response) => {
                let node = response
                    .headers()
                    .get("x-service-node")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown")
                    .to_string();
                let verdict: serde_json::Value = response.json().await.unwrap_or_default();
                println!(
                    "  {} {} -> attack={} type={} confidence={} node={}",
                    shot.method,
                    shot.path,
                    verdict["attack"],
                    verdict["type"],
                    verdict["confidence"],
                    node,
                );
            }
            Err(e) => println!("  {} {} -> error: {e}", shot.method, shot.path),
        }

        tokio::time::sleep(delay).await;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = reqwest::Client::new();
    let delay = Duration::from_millis(args.delay_ms);

    println!("VEIL attack simulator -> {}", args.target);

    let suites: Vec<(&str, (&str, Vec<Shot>))> = match args.suite {
        Suite::Sqli => vec![("sqli", sqli_suite())],
        Suite::Xss => vec![("xss", xss_suite())],
        Suite::Traversal => vec![("path-traversal", traversal_suite())],
        Suite::BruteForce => vec![("brute-force", brute_force_suite())],
        Suite::Scan => vec![("scan", scan_suite())],
        Suite::All => vec![
            ("sqli", sqli_suite()),
            ("xss", xss_suite()),
            ("path-traversal", traversal_suite()),
            ("brute-force", brute_force_suite()),
            ("scan", scan_suite()),
        ],
    };

    for (label, (attacker_ip, shots)) in suites {
        run_suite(&client, &args.target, label, attacker_ip, shots, delay).await?;
    }

    println!("done");
    Ok(())
}
