//! Decoy resource templates
//!
//! `create_decoy_set` is a pure function of its inputs except for the
//! `created-at` annotation: three pods (frontend, API, database) and three
//! matching ClusterIP services that impersonate the real stack for one
//! attacker. Labels tie every resource to the attack id for bulk cleanup;
//! annotations carry the TTL contract the sweeper enforces.

use std::collections::HashMap;

use veil_cluster::{
    Container, ContainerPort, EnvVar, HttpGetAction, ObjectMeta, Pod, PodSpec, Probe,
    ResourceRequirements, Service, ServicePort, ServiceSpec, TcpSocketAction,
};

pub const LABEL_ROLE: &str = "role";
pub const ROLE_DECOY: &str = "decoy";
pub const LABEL_ATTACK_ID: &str = "attack-id";
pub const LABEL_DECOY_TYPE: &str = "decoy-type";
pub const LABEL_ATTACKER_IP: &str = "attacker-ip";

pub const ANNOTATION_CREATED_AT: &str = "deception-system/created-at";
pub const ANNOTATION_TTL_MINUTES: &str = "deception-system/ttl-minutes";
pub const ANNOTATION_ATTACK_ID: &str = "deception-system/attack-id";
pub const ANNOTATION_ATTACKER_IP: &str = "deception-system/attacker-ip";
pub const ANNOTATION_ATTACK_TYPE: &str = "deception-system/attack-type";

pub const FRONTEND_PORT: u16 = 8080;
pub const API_PORT: u16 = 5000;
pub const DB_PORT: u16 = 5432;

/// Label values forbid colons; IPv6 attacker addresses are flattened and
/// the unmodified IP kept in the annotation.
pub fn sanitize_ip(ip: &str) -> String {
    ip.replace(':', "-")
}

/// Pod and service names for a short attack id.
pub fn resource_names(short_id: &str) -> [String; 3] {
    [
        format!("decoy-fe-{short_id}"),
        format!("decoy-api-{short_id}"),
        format!("decoy-db-{short_id}"),
    ]
}

/// Cluster DNS endpoints carried by `add_route`, one per tier.
pub fn service_endpoints(short_id: &str, namespace: &str) -> (String, String, String) {
    let [fe, api, db] = resource_names(short_id);
    (
        format!("{fe}.{namespace}.svc.cluster.local:{FRONTEND_PORT}"),
        format!("{api}.{namespace}.svc.cluster.local:{API_PORT}"),
        format!("{db}.{namespace}.svc.cluster.local:{DB_PORT}"),
    )
}

/// Inputs for one decoy set
pub struct DecoySetParams<'a> {
    /// Full attack UUID
    pub attack_id: &'a str,
    pub attacker_ip: &'a str,
    pub attack_type: &'a str,
    pub namespace: &'a str,
    pub ttl_minutes: u64,
    pub redis_url: &'a str,
}

/// A generated decoy set, ready for creation
pub struct DecoySet {
    pub short_id: String,
    pub pods: Vec<Pod>,
    pub services: Vec<Service>,
}

impl DecoySet {
    pub fn pod_names(&self) -> Vec<String> {
        self.pods.iter().map(|p| p.metadata.name.clone()).collect()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services
            .iter()
            .map(|s| s.metadata.name.clone())
            .collect()
    }
}

/// Generate the six resource specs of one decoy set. Every resource shares
/// one `created-at` timestamp so the TTL applies to the set as a whole.
pub fn create_decoy_set(params: &DecoySetParams<'_>) -> DecoySet {
    let short_id: String = params.attack_id.chars().take(8).collect();
    let created_at = chrono::Utc::now().to_rfc3339();
    let [fe_name, api_name, db_name] = resource_names(&short_id);

    let pods = vec![
        http_pod(params, &short_id, &created_at, &fe_name, "frontend", "decoy-frontend:latest", FRONTEND_PORT),
        http_pod(params, &short_id, &created_at, &api_name, "api", "decoy-api:latest", API_PORT),
        db_pod(params, &short_id, &created_at, &db_name),
    ];

    let services = pods
        .iter()
        .map(|pod| {
            let port = pod.spec.containers[0].ports[0].container_port;
            Service {
                metadata: metadata(params, &short_id, &created_at, &pod.metadata.name, decoy_type_of(pod)),
                spec: ServiceSpec {
                    selector: [("app".to_string(), pod.metadata.name.clone())]
                        .into_iter()
                        .collect(),
                    ports: vec![ServicePort {
                        port,
                        target_port: Some(port),
                        name: None,
                    }],
                    service_type: Some("ClusterIP".to_string()),
                },
            }
        })
        .collect();

    DecoySet {
        short_id,
        pods,
        services,
    }
}

fn decoy_type_of(pod: &Pod) -> &str {
    pod.metadata
        .labels
        .get(LABEL_DECOY_TYPE)
        .map(String::as_str)
        .unwrap_or("frontend")
}

fn metadata(
    params: &DecoySetParams<'_>,
    short_id: &str,
    created_at: &str,
    name: &str,
    decoy_type: &str,
) -> ObjectMeta {
    let mut labels = HashMap::new();
    labels.insert("app".to_string(), name.to_string());
    labels.insert(LABEL_ROLE.to_string(), ROLE_DECOY.to_string());
    labels.insert(LABEL_ATTACK_ID.to_string(), short_id.to_string());
    labels.insert(LABEL_DECOY_TYPE.to_string(), decoy_type.to_string());
    labels.insert(
        LABEL_ATTACKER_IP.to_string(),
        sanitize_ip(params.attacker_ip),
    );

    let mut annotations = HashMap::new();
    annotations.insert(ANNOTATION_CREATED_AT.to_string(), created_at.to_string());
    annotations.insert(
        ANNOTATION_TTL_MINUTES.to_string(),
        params.ttl_minutes.to_string(),
    );
    annotations.insert(ANNOTATION_ATTACK_ID.to_string(), params.attack_id.to_string());
    annotations.insert(
        ANNOTATION_ATTACKER_IP.to_string(),
        params.attacker_ip.to_string(),
    );
    annotations.insert(
        ANNOTATION_ATTACK_TYPE.to_string(),
        params.attack_type.to_string(),
    );

    ObjectMeta {
        name: name.to_string(),
        namespace: params.namespace.to_string(),
        labels,
        annotations,
        creation_timestamp: None,
        deletion_timestamp: None,
    }
}

fn common_env(params: &DecoySetParams<'_>, name: &str) -> Vec<EnvVar> {
    vec![
        EnvVar {
            name: "DECOY_ID".to_string(),
            value: name.to_string(),
        },
        EnvVar {
            name: "ATTACK_ID".to_string(),
            value: params.attack_id.to_string(),
        },
        EnvVar {
            name: "ATTACKER_IP".to_string(),
            value: params.attacker_ip.to_string(),
        },
        EnvVar {
            name: "REDIS_URL".to_string(),
            value: params.redis_url.to_string(),
        },
    ]
}

fn resources(cpu_req: &str, mem_req: &str, cpu_lim: &str, mem_lim: &str) -> ResourceRequirements {
    ResourceRequirements {
        requests: [
            ("cpu".to_string(), cpu_req.to_string()),
            ("memory".to_string(), mem_req.to_string()),
        ]
        .into_iter()
        .collect(),
        limits: [
            ("cpu".to_string(), cpu_lim.to_string()),
            ("memory".to_string(), mem_lim.to_string()),
        ]
        .into_iter()
        .collect(),
    }
}

fn http_probe(port: u16, initial_delay: u32, period: u32, timeout: u32, failures: u32) -> Probe {
    Probe {
        http_get: Some(HttpGetAction {
            path: "/health".to_string(),
            port,
        }),
        tcp_socket: None,
        initial_delay_seconds: initial_delay,
        period_seconds: period,
        timeout_seconds: timeout,
        failure_threshold: failures,
    }
}

fn http_pod(
    params: &DecoySetParams<'_>,
    short_id: &str,
    created_at: &str,
    name: &str,
    decoy_type: &str,
    image: &str,
    port: u16,
) -> Pod {
    Pod {
        metadata: metadata(params, short_id, created_at, name, decoy_type),
        spec: PodSpec {
            containers: vec![Container {
                name: decoy_type.to_string(),
                image: image.to_string(),
                ports: vec![ContainerPort {
                    container_port: port,
                    name: None,
                }],
                env: common_env(params, name),
                resources: resources("25m", "32Mi", "50m", "96Mi"),
                readiness_probe: Some(http_probe(port, 5, 5, 2, 6)),
                liveness_probe: Some(http_probe(port, 5, 5, 2, 6)),
                startup_probe: Some(http_probe(port, 0, 2, 2, 45)),
                image_pull_policy: Some("Never".to_string()),
            }],
            restart_policy: Some("Always".to_string()),
            node_name: None,
        },
        status: None,
    }
}

fn db_pod(params: &DecoySetParams<'_>, short_id: &str, created_at: &str, name: &str) -> Pod {
    let mut env = common_env(params, name);
    env.push(EnvVar {
        name: "POSTGRES_USER".to_string(),
        value: "store".to_string(),
    });
    env.push(EnvVar {
        name: "POSTGRES_PASSWORD".to_string(),
        value: "store-dev-password".to_string(),
    });
    env.push(EnvVar {
        name: "POSTGRES_DB".to_string(),
        value: "store".to_string(),
    });

    Pod {
        metadata: metadata(params, short_id, created_at, name, "database"),
        spec: PodSpec {
            containers: vec![Container {
                name: "database".to_string(),
                image: "decoy-db:latest".to_string(),
                ports: vec![ContainerPort {
                    container_port: DB_PORT,
                    name: None,
                }],
                env,
                resources: resources("50m", "48Mi", "100m", "64Mi"),
                readiness_probe: Some(Probe {
                    http_get: None,
                    tcp_socket: Some(TcpSocketAction { port: DB_PORT }),
                    initial_delay_seconds: 5,
                    period_seconds: 5,
                    timeout_seconds: 2,
                    failure_threshold: 6,
                }),
                liveness_probe: None,
                startup_probe: None,
                image_pull_policy: Some("Never".to_string()),
            }],
            restart_policy: Some("Always".to_string()),
            node_name: None,
        },
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DecoySetParams<'static> {
        DecoySetParams {
            attack_id: "a1b2c3d4-0000-0000-0000-000000000000",
            attacker_ip: "1.2.3.4",
            attack_type: "sqli",
            namespace: "decoy-pool",
            ttl_minutes: 10,
            redis_url: "redis://redis:6379",
        }
    }

    #[test]
    fn produces_three_pods_and_three_services() {
        let set = create_decoy_set(&params());
        assert_eq!(set.short_id, "a1b2c3d4");
        assert_eq!(set.pods.len(), 3);
        assert_eq!(set.services.len(), 3);
        assert_eq!(
            set.pod_names(),
            vec!["decoy-fe-a1b2c3d4", "decoy-api-a1b2c3d4", "decoy-db-a1b2c3d4"]
        );
        assert_eq!(set.pod_names(), set.service_names());
    }

    #[test]
    fn deterministic_modulo_created_at() {
        let a = create_decoy_set(&params());
        let b = create_decoy_set(&params());

        for (pod_a, pod_b) in a.pods.iter().zip(&b.pods) {
            let mut meta_a = pod_a.metadata.clone();
            let mut meta_b = pod_b.metadata.clone();
            meta_a.annotations.remove(ANNOTATION_CREATED_AT);
            meta_b.annotations.remove(ANNOTATION_CREATED_AT);
            assert_eq!(
                serde_json::to_value(&meta_a).unwrap(),
                serde_json::to_value(&meta_b).unwrap()
            );
            assert_eq!(
                serde_json::to_value(&pod_a.spec).unwrap(),
                serde_json::to_value(&pod_b.spec).unwrap()
            );
        }
    }

    #[test]
    fn every_resource_is_fully_labeled_and_annotated() {
        let set = create_decoy_set(&params());
        for pod in &set.pods {
            assert_eq!(pod.label(LABEL_ROLE), Some(ROLE_DECOY));
            assert_eq!(pod.label(LABEL_ATTACK_ID), Some("a1b2c3d4"));
            assert_eq!(pod.label(LABEL_ATTACKER_IP), Some("1.2.3.4"));
            assert!(pod.annotation(ANNOTATION_CREATED_AT).is_some());
            assert_eq!(pod.annotation(ANNOTATION_TTL_MINUTES), Some("10"));
            assert_eq!(
                pod.annotation(ANNOTATION_ATTACK_ID),
                Some("a1b2c3d4-0000-0000-0000-000000000000")
            );
        }
        for service in &set.services {
            assert_eq!(
                service.metadata.labels.get(LABEL_ROLE).map(String::as_str),
                Some(ROLE_DECOY)
            );
            let app = service.spec.selector.get("app").unwrap();
            assert_eq!(app, &service.metadata.name);
        }

        // The whole set shares one created-at so TTL applies uniformly.
        let stamps: std::collections::HashSet<_> = set
            .pods
            .iter()
            .filter_map(|p| p.annotation(ANNOTATION_CREATED_AT))
            .collect();
        assert_eq!(stamps.len(), 1);
    }

    #[test]
    fn ipv6_attacker_ip_is_label_safe() {
        let mut p = params();
        p.attacker_ip = "2001:db8::1";
        let set = create_decoy_set(&p);
        let label = set.pods[0].label(LABEL_ATTACKER_IP).unwrap();
        assert!(!label.contains(':'));
        assert_eq!(label, "2001-db8--1");
        assert_eq!(
            set.pods[0].annotation(ANNOTATION_ATTACKER_IP),
            Some("2001:db8::1")
        );
    }

    #[test]
    fn probe_and_resource_contract() {
        let set = create_decoy_set(&params());

        let fe = &set.pods[0].spec.containers[0];
        let readiness = fe.readiness_probe.as_ref().unwrap();
        assert_eq!(readiness.http_get.as_ref().unwrap().path, "/health");
        assert_eq!(readiness.initial_delay_seconds, 5);
        assert_eq!(readiness.failure_threshold, 6);
        let startup = fe.startup_probe.as_ref().unwrap();
        assert_eq!(startup.period_seconds, 2);
        assert_eq!(startup.failure_threshold, 45);
        assert_eq!(fe.resources.requests["cpu"], "25m");
        assert_eq!(fe.resources.limits["memory"], "96Mi");
        assert_eq!(fe.image_pull_policy.as_deref(), Some("Never"));

        let db = &set.pods[2].spec.containers[0];
        let readiness = db.readiness_probe.as_ref().unwrap();
        assert_eq!(readiness.tcp_socket.as_ref().unwrap().port, DB_PORT);
        assert!(db.env.iter().any(|e| e.name == "POSTGRES_USER"));
        assert_eq!(db.resources.requests["memory"], "48Mi");
    }

    #[test]
    fn endpoints_follow_cluster_dns_form() {
        let (fe, api, db) = service_endpoints("a1b2c3d4", "decoy-pool");
        assert_eq!(fe, "decoy-fe-a1b2c3d4.decoy-pool.svc.cluster.local:8080");
        assert_eq!(api, "decoy-api-a1b2c3d4.decoy-pool.svc.cluster.local:5000");
        assert_eq!(db, "decoy-db-a1b2c3d4.decoy-pool.svc.cluster.local:5432");
    }
}
