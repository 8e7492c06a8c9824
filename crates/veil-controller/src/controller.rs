//! Decoy set orchestration
//!
//! Consumes `attack_detected` events and drives the decoy lifecycle:
//! duplicate suppression, capacity-guarded spawning with eviction,
//! readiness gating, TTL-based reaping. The cluster is the source of truth
//! for set membership; the in-memory map only accelerates `/status`.
//!
//! Lifecycle of a set: Spawning -> Ready -> Expired/Evicted -> Deleted.
//! A set that never reaches Ready times out and is reaped without ever
//! generating an `add_route`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use veil_bus::{channels, publish_event, EventBus};
use veil_cluster::{ClusterApi, Pod};
use veil_core::{
    utc_now, AttackEvent, ControllerConfig, DecoyEventKind, DecoyLifecycleEvent, RoutingUpdate,
};

use crate::templates::{
    create_decoy_set, resource_names, sanitize_ip, service_endpoints, DecoySetParams,
    ANNOTATION_ATTACKER_IP, ANNOTATION_CREATED_AT, ANNOTATION_TTL_MINUTES, LABEL_ATTACKER_IP,
    LABEL_ATTACK_ID, LABEL_ROLE, ROLE_DECOY,
};

/// Hard cap on decoy pods across the namespace; the namespace ResourceQuota
/// enforces the same number independently.
pub const MAX_DECOY_PODS: usize = 15;

/// 15 pods / 3 pods per set
pub const MAX_DECOY_SETS: usize = 5;

/// Readiness poll deadline
pub const POD_READY_TIMEOUT: Duration = Duration::from_secs(120);

/// Readiness poll period
pub const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Seconds between TTL sweeps
pub const TTL_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, Serialize)]
pub struct ControllerCounters {
    pub total_attacks_received: u64,
    pub total_spawned_sets: u64,
    pub total_cleaned_sets: u64,
    pub total_duplicate_skipped: u64,
    pub total_evictions: u64,
}

/// Accelerator entry for one live decoy set
#[derive(Debug, Clone, Serialize)]
pub struct ActiveSet {
    pub attack_id: String,
    pub attacker_ip: String,
    pub attack_type: String,
    pub created_at: String,
    pub pods: Vec<String>,
    pub services: Vec<String>,
    pub pods_ready: bool,
}

#[derive(Default)]
struct ControllerState {
    counters: ControllerCounters,
    active: HashMap<String, ActiveSet>,
}

/// Poll timings, overridable so tests can compress the readiness gate.
#[derive(Debug, Clone)]
pub struct Tuning {
    pub ready_poll: Duration,
    pub ready_timeout: Duration,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            ready_poll: READY_POLL_INTERVAL,
            ready_timeout: POD_READY_TIMEOUT,
        }
    }
}

pub struct DeceptionController {
    cluster: Arc<dyn ClusterApi>,
    bus: Arc<dyn EventBus>,
    config: ControllerConfig,
    tuning: Tuning,
    state: Mutex<ControllerState>,
    started_at: DateTime<Utc>,
}

impl DeceptionController {
    pub fn new(
        config: ControllerConfig,
        cluster: Arc<dyn ClusterApi>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            cluster,
            bus,
            config,
            tuning: Tuning::default(),
            state: Mutex::new(ControllerState::default()),
            started_at: Utc::now(),
        }
    }

    pub fn with_tuning(mut self, tuning: Tuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn bus(&self) -> &dyn EventBus {
        self.bus.as_ref()
    }

    pub fn cluster(&self) -> &dyn ClusterApi {
        self.cluster.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn counters(&self) -> ControllerCounters {
        self.state.lock().unwrap().counters.clone()
    }

    pub fn active_sets(&self) -> HashMap<String, ActiveSet> {
        self.state.lock().unwrap().active.clone()
    }

    /// Live decoy pod count straight from the cluster.
    pub async fn live_decoy_pod_count(&self) -> usize {
        self.list_decoys(&format!("{LABEL_ROLE}={ROLE_DECOY}"))
            .await
            .len()
    }

    /// React to one `attack_detected` event.
    pub async fn handle_attack(&self, event: &AttackEvent) {
        {
            self.state.lock().unwrap().counters.total_attacks_received += 1;
        }

        let attack_id = event
            .attack_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let short_id: String = attack_id.chars().take(8).collect();
        let attacker_ip = event.source_ip.clone();
        let sanitized = sanitize_ip(&attacker_ip);
        let attack_type = event.attack_type.to_string();

        info!(
            "attack received: type={attack_type} ip={attacker_ip} confidence={}",
            event.confidence
        );

        // One active set per attacker IP. If one already exists, optionally
        // refresh the route (covers router restarts) and stop.
        let selector = format!("{LABEL_ROLE}={ROLE_DECOY},{LABEL_ATTACKER_IP}={sanitized}");
        let existing = self.list_decoys(&selector).await;
        if !existing.is_empty() {
            {
                self.state.lock().unwrap().counters.total_duplicate_skipped += 1;
            }
            let existing_short = existing[0]
                .label(LABEL_ATTACK_ID)
                .unwrap_or(short_id.as_str())
                .to_string();
            info!("duplicate attack from {attacker_ip}; set {existing_short} already active");

            if existing.iter().all(Pod::is_ready) {
                self.publish_add_route(&existing_short, &attacker_ip).await;
            }
            return;
        }

        // Capacity guard: one spawn adds three pods, so make room early.
        let decoys = self
            .list_decoys(&format!("{LABEL_ROLE}={ROLE_DECOY}"))
            .await;
        if decoys.len() >= MAX_DECOY_PODS - 2 {
            self.evict_oldest(&decoys).await;
        }

        let set = create_decoy_set(&DecoySetParams {
            attack_id: &attack_id,
            attacker_ip: &attacker_ip,
            attack_type: &attack_type,
            namespace: &self.config.decoy_namespace,
            ttl_minutes: self.config.ttl_minutes,
            redis_url: &self.config.bus.url,
        });
        let created_at = set.pods[0]
            .annotation(ANNOTATION_CREATED_AT)
            .unwrap_or_default()
            .to_string();

        let mut created_pods: Vec<String> = Vec::new();
        for pod in &set.pods {
            match self
                .cluster
                .create_pod(&self.config.decoy_namespace, pod)
                .await
            {
                Ok(()) => created_pods.push(pod.metadata.name.clone()),
                Err(e) if e.is_quota() && created_pods.len() < 3 => {
                    warn!(
                        "quota rejected pod {} of set {short_id}; tearing down partial set: {e}",
                        pod.metadata.name
                    );
                    self.delete_pods(&created_pods).await;
                    return;
                }
                Err(e) => {
                    warn!(
                        "pod create failed for {}; aborting spawn of {short_id}: {e}",
                        pod.metadata.name
                    );
                    return;
                }
            }
        }

        for service in &set.services {
            if let Err(e) = self
                .cluster
                .create_service(&self.config.decoy_namespace, service)
                .await
            {
                warn!(
                    "service create failed for {}; aborting spawn of {short_id}: {e}",
                    service.metadata.name
                );
                return;
            }
        }

        {
            let mut state = self.state.lock().unwrap();
            state.counters.total_spawned_sets += 1;
            state.active.insert(
                short_id.clone(),
                ActiveSet {
                    attack_id: attack_id.clone(),
                    attacker_ip: attacker_ip.clone(),
                    attack_type: attack_type.clone(),
                    created_at,
                    pods: set.pod_names(),
                    services: set.service_names(),
                    pods_ready: false,
                },
            );
        }
        info!(
            "spawned decoy set {short_id} for {attacker_ip} ({} pods)",
            set.pods.len()
        );

        let ready = self.await_ready(&set.pod_names()).await;
        {
            let mut state = self.state.lock().unwrap();
            if let Some(active) = state.active.get_mut(&short_id) {
                active.pods_ready = ready;
            }
        }

        let lifecycle = DecoyLifecycleEvent {
            timestamp: utc_now(),
            kind: DecoyEventKind::DecoySpawned,
            attack_id: short_id.clone(),
            attacker_ip: Some(attacker_ip.clone()),
            attack_type: Some(attack_type),
            decoy_pods: set.pod_names(),
            decoy_services: set.service_names(),
            pods_ready: ready,
            reason: None,
        };
        publish_event(self.bus.as_ref(), channels::DECOY_SPAWNED, &lifecycle).await;

        if ready {
            self.publish_add_route(&short_id, &attacker_ip).await;
        } else {
            // Routing to a pod that is not serving would surface errors and
            // break the illusion; the set stays routeless until the sweeper
            // reaps it.
            warn!("decoy set {short_id} not ready within deadline; route suppressed");
        }
    }

    /// Reap every set older than its TTL annotation. Runs on the sweep
    /// interval and after controller restarts (state lives on the cluster).
    pub async fn sweep_expired(&self) {
        let decoys = self
            .list_decoys(&format!("{LABEL_ROLE}={ROLE_DECOY}"))
            .await;
        let groups = group_by_attack_id(&decoys);
        let now = Utc::now();

        for (short_id, pods) in groups {
            let created = oldest_created_at(&pods);
            let ttl_minutes = pods
                .iter()
                .find_map(|p| p.annotation(ANNOTATION_TTL_MINUTES))
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(self.config.ttl_minutes as i64);

            let age = now - created;
            if age <= chrono::Duration::minutes(ttl_minutes) {
                continue;
            }

            info!(
                "decoy set {short_id} expired (age {}s > ttl {}m)",
                age.num_seconds(),
                ttl_minutes
            );
            let attacker_ip = pods
                .first()
                .and_then(|p| p.annotation(ANNOTATION_ATTACKER_IP))
                .map(str::to_string);

            self.delete_set(&short_id, &pods).await;

            let lifecycle = DecoyLifecycleEvent {
                timestamp: utc_now(),
                kind: DecoyEventKind::DecoyExpired,
                attack_id: short_id.clone(),
                attacker_ip,
                attack_type: None,
                decoy_pods: pods.iter().map(|p| p.metadata.name.clone()).collect(),
                decoy_services: resource_names(&short_id).to_vec(),
                pods_ready: false,
                reason: Some("ttl_expired".to_string()),
            };
            publish_event(self.bus.as_ref(), channels::DECOY_SPAWNED, &lifecycle).await;
            self.publish_remove_route(&short_id, "ttl_expired").await;

            let mut state = self.state.lock().unwrap();
            state.active.remove(&short_id);
            state.counters.total_cleaned_sets += 1;
        }
    }

    /// Delete the oldest set (minimum `created-at`) to free capacity.
    async fn evict_oldest(&self, decoys: &[Pod]) {
        let groups = group_by_attack_id(decoys);
        let Some((short_id, pods)) = groups
            .into_iter()
            .min_by_key(|(_, pods)| oldest_created_at(pods))
        else {
            return;
        };

        info!("capacity guard: evicting oldest decoy set {short_id}");
        let attacker_ip = pods
            .first()
            .and_then(|p| p.annotation(ANNOTATION_ATTACKER_IP))
            .map(str::to_string);

        self.delete_set(&short_id, &pods).await;

        let lifecycle = DecoyLifecycleEvent {
            timestamp: utc_now(),
            kind: DecoyEventKind::DecoyEvicted,
            attack_id: short_id.clone(),
            attacker_ip,
            attack_type: None,
            decoy_pods: pods.iter().map(|p| p.metadata.name.clone()).collect(),
            decoy_services: resource_names(&short_id).to_vec(),
            pods_ready: false,
            reason: Some("capacity_eviction".to_string()),
        };
        publish_event(self.bus.as_ref(), channels::DECOY_SPAWNED, &lifecycle).await;
        self.publish_remove_route(&short_id, "capacity_eviction").await;

        let mut state = self.state.lock().unwrap();
        state.active.remove(&short_id);
        state.counters.total_evictions += 1;
    }

    /// Delete every pod and service belonging to a set.
    async fn delete_set(&self, short_id: &str, pods: &[Pod]) {
        let pod_names: Vec<String> = pods.iter().map(|p| p.metadata.name.clone()).collect();
        self.delete_pods(&pod_names).await;

        let namespace = &self.config.decoy_namespace;
        let selector = format!("{LABEL_ATTACK_ID}={short_id}");
        let services = match self.cluster.list_services(namespace, Some(&selector)).await {
            Ok(services) => services
                .into_iter()
                .map(|s| s.metadata.name)
                .collect::<Vec<_>>(),
            Err(e) => {
                warn!("service list failed for set {short_id}; using derived names: {e}");
                resource_names(short_id).to_vec()
            }
        };
        for name in services {
            if let Err(e) = self.cluster.delete_service(namespace, &name).await {
                warn!("service delete failed for {name}: {e}");
            }
        }
    }

    async fn delete_pods(&self, names: &[String]) {
        for name in names {
            if let Err(e) = self
                .cluster
                .delete_pod(&self.config.decoy_namespace, name)
                .await
            {
                warn!("pod delete failed for {name}: {e}");
            }
        }
    }

    /// Poll until every pod of the set passes the readiness gate, or the
    /// deadline expires.
    async fn await_ready(&self, pod_names: &[String]) -> bool {
        let deadline = Instant::now() + self.tuning.ready_timeout;

        loop {
            let mut all_ready = true;
            for name in pod_names {
                match self
                    .cluster
                    .get_pod(&self.config.decoy_namespace, name)
                    .await
                {
                    Ok(pod) if pod.is_ready() => {}
                    Ok(_) => {
                        all_ready = false;
                    }
                    Err(e) => {
                        all_ready = false;
                        tracing::debug!("readiness poll for {name}: {e}");
                    }
                }
                if !all_ready {
                    break;
                }
            }

            if all_ready {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.tuning.ready_poll).await;
        }
    }

    async fn publish_add_route(&self, short_id: &str, attacker_ip: &str) {
        let (frontend_service, api_service, db_service) =
            service_endpoints(short_id, &self.config.decoy_namespace);
        let update = RoutingUpdate::AddRoute {
            timestamp: utc_now(),
            attacker_ip: attacker_ip.to_string(),
            attack_id: short_id.to_string(),
            frontend_service,
            api_service,
            db_service,
        };
        publish_event(self.bus.as_ref(), channels::ROUTING_UPDATE, &update).await;
    }

    async fn publish_remove_route(&self, short_id: &str, reason: &str) {
        let update = RoutingUpdate::RemoveRoute {
            timestamp: utc_now(),
            attack_id: Some(short_id.to_string()),
            attacker_ip: None,
            reason: reason.to_string(),
        };
        publish_event(self.bus.as_ref(), channels::ROUTING_UPDATE, &update).await;
    }

    /// Read failures are logged and degrade to an empty list; the next
    /// attack or sweep tick reconciles.
    async fn list_decoys(&self, selector: &str) -> Vec<Pod> {
        match self
            .cluster
            .list_pods(&self.config.decoy_namespace, Some(selector))
            .await
        {
            Ok(pods) => pods,
            Err(e) => {
                warn!("decoy pod list failed (treating as empty): {e}");
                Vec::new()
            }
        }
    }
}

/// Group decoy pods by their short attack id label.
pub fn group_by_attack_id(pods: &[Pod]) -> HashMap<String, Vec<Pod>> {
    let mut groups: HashMap<String, Vec<Pod>> = HashMap::new();
    for pod in pods {
        let Some(short_id) = pod.label(LABEL_ATTACK_ID) else {
            continue;
        };
        groups.entry(short_id.to_string()).or_default().push(pod.clone());
    }
    groups
}

/// Minimum `created-at` annotation across a set's pods. Pods missing the
/// annotation sort as oldest so malformed sets are reaped first.
pub fn oldest_created_at(pods: &[Pod]) -> DateTime<Utc> {
    pods.iter()
        .map(|pod| {
            pod.annotation(ANNOTATION_CREATED_AT)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        })
        .min()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
