//! In-memory implementation of `ClusterApi`
//!
//! Backs tests and local development without an orchestrator. Honors label
//! selectors, stamps creation timestamps, simulates a namespace pod quota,
//! and feeds a broadcast-based watch stream.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedSender;

use crate::types::{matches_selector, Pod, PodCondition, PodStatus, Service, WatchEvent, WatchEventType};
use crate::{ClusterApi, ClusterError, Result};

pub struct MemoryCluster {
    pods: DashMap<(String, String), Pod>,
    services: DashMap<(String, String), Service>,
    watch: broadcast::Sender<WatchEvent>,
    /// Per-namespace pod cap standing in for the ResourceQuota
    pod_quota: Option<usize>,
    fail_reads: AtomicBool,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        let (watch, _) = broadcast::channel(256);
        Self {
            pods: DashMap::new(),
            services: DashMap::new(),
            watch,
            pod_quota: None,
            fail_reads: AtomicBool::new(false),
        }
    }

    /// Enforce a per-namespace pod cap, mirroring the decoy namespace quota.
    pub fn with_pod_quota(mut self, quota: usize) -> Self {
        self.pod_quota = Some(quota);
        self
    }

    /// Make every read fail with a transient error until cleared.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(ClusterError::Transient("injected read failure".to_string()))
        } else {
            Ok(())
        }
    }

    fn pods_in(&self, namespace: &str) -> usize {
        self.pods
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .count()
    }

    fn emit(&self, kind: WatchEventType, pod: &Pod) {
        // Nobody watching is fine.
        let _ = self.watch.send(WatchEvent {
            kind,
            object: pod.clone(),
        });
    }

    /// Transition a pod to Running with a `Ready=True` condition.
    pub fn mark_ready(&self, namespace: &str, name: &str) {
        let key = (namespace.to_string(), name.to_string());
        if let Some(mut entry) = self.pods.get_mut(&key) {
            entry.status = Some(PodStatus {
                phase: "Running".to_string(),
                pod_ip: Some("10.0.0.1".to_string()),
                conditions: vec![PodCondition {
                    kind: "Ready".to_string(),
                    status: "True".to_string(),
                }],
            });
            let pod = entry.clone();
            drop(entry);
            self.emit(WatchEventType::Modified, &pod);
        }
    }

    /// Overwrite a pod's phase, clearing readiness.
    pub fn set_phase(&self, namespace: &str, name: &str, phase: &str) {
        let key = (namespace.to_string(), name.to_string());
        if let Some(mut entry) = self.pods.get_mut(&key) {
            entry.status = Some(PodStatus {
                phase: phase.to_string(),
                pod_ip: None,
                conditions: vec![],
            });
            let pod = entry.clone();
            drop(entry);
            self.emit(WatchEventType::Modified, &pod);
        }
    }

    /// Rewrite a pod's `created-at`-style annotation, for TTL tests.
    pub fn set_annotation(&self, namespace: &str, name: &str, key: &str, value: &str) {
        let map_key = (namespace.to_string(), name.to_string());
        if let Some(mut entry) = self.pods.get_mut(&map_key) {
            entry
                .metadata
                .annotations
                .insert(key.to_string(), value.to_string());
        }
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn list_pods(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<Pod>> {
        self.check_reads()?;
        let selector = label_selector.unwrap_or("");
        Ok(self
            .pods
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .filter(|entry| matches_selector(&entry.value().metadata.labels, selector))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.check_reads()?;
        self.pods
            .get(&(namespace.to_string(), name.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ClusterError::NotFound(format!("pod {namespace}/{name}")))
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<()> {
        if let Some(quota) = self.pod_quota {
            if self.pods_in(namespace) >= quota {
                return Err(ClusterError::QuotaExceeded(format!(
                    "namespace {namespace} pod quota of {quota} reached"
                )));
            }
        }

        let mut pod = pod.clone();
        pod.metadata.namespace = namespace.to_string();
        if pod.metadata.creation_timestamp.is_none() {
            pod.metadata.creation_timestamp = Some(Utc::now());
        }
        if pod.status.is_none() {
            pod.status = Some(PodStatus {
                phase: "Pending".to_string(),
                pod_ip: None,
                conditions: vec![],
            });
        }

        self.pods.insert(
            (namespace.to_string(), pod.metadata.name.clone()),
            pod.clone(),
        );
        self.emit(WatchEventType::Added, &pod);
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .pods
            .remove(&(namespace.to_string(), name.to_string()))
        {
            Some((_, pod)) => {
                self.emit(WatchEventType::Deleted, &pod);
                Ok(())
            }
            None => Err(ClusterError::NotFound(format!("pod {namespace}/{name}"))),
        }
    }

    async fn list_services(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<Service>> {
        self.check_reads()?;
        let selector = label_selector.unwrap_or("");
        Ok(self
            .services
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .filter(|entry| matches_selector(&entry.value().metadata.labels, selector))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<()> {
        let mut service = service.clone();
        service.metadata.namespace = namespace.to_string();
        if service.metadata.creation_timestamp.is_none() {
            service.metadata.creation_timestamp = Some(Utc::now());
        }
        self.services.insert(
            (namespace.to_string(), service.metadata.name.clone()),
            service,
        );
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        self.services
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound(format!("service {namespace}/{name}")))
    }

    async fn watch_pods(&self, sender: UnboundedSender<WatchEvent>) -> Result<()> {
        let mut receiver = self.watch.subscribe();
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if sender.send(event).is_err() {
                        return Ok(());
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("memory watch lagged, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }

    async fn ping(&self) -> bool {
        !self.fail_reads.load(Ordering::SeqCst)
    }
}
