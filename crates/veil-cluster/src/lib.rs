//! Container orchestrator client
//!
//! The control plane only needs a narrow slice of the orchestrator:
//! namespaced pod/service CRUD with label-selector lists, plus a
//! cluster-wide pod watch. `ClusterApi` captures that contract;
//! `HttpCluster` speaks it over the orchestrator's REST surface, and
//! `MemoryCluster` implements it in-process for tests and local
//! development.

mod error;
mod http;
mod memory;
pub mod types;

pub use error::{ClusterError, Result};
pub use http::HttpCluster;
pub use memory::MemoryCluster;
pub use types::{
    Container, ContainerPort, EnvVar, HttpGetAction, ObjectMeta, Pod, PodCondition, PodSpec,
    PodStatus, Probe, ResourceRequirements, Service, ServicePort, ServiceSpec, TcpSocketAction,
    WatchEvent, WatchEventType,
};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

/// The orchestrator seam. All list operations degrade gracefully at call
/// sites: a `Transient` error is logged and treated as an empty result by
/// the controller and collector, never as fatal.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_pods(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<Pod>>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<()>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    async fn list_services(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<Service>>;

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<()>;

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;

    /// Stream cluster-wide pod watch events into `sender` until the
    /// server-side timeout (60 s) closes the stream, then return `Ok` so the
    /// caller can reconnect.
    async fn watch_pods(&self, sender: UnboundedSender<WatchEvent>) -> Result<()>;

    /// Whether the orchestrator currently answers, for health endpoints.
    async fn ping(&self) -> bool;
}
