//! REST implementation of `ClusterApi`
//!
//! Speaks the orchestrator's generic resource surface:
//! `/api/v1/namespaces/{ns}/pods`, `/api/v1/namespaces/{ns}/services`,
//! and the cluster-wide `/api/v1/pods?watch=true` line-delimited stream.
//! Authentication is ambient (service-account proxy or local API proxy).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::types::{Pod, Service, WatchEvent};
use crate::{ClusterApi, ClusterError, Result};

/// Per-request timeout for CRUD calls. Watch requests are exempt; the
/// server closes those after its own timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Server-side watch timeout, after which `watch_pods` returns for the
/// caller to reconnect.
const WATCH_TIMEOUT_SECONDS: u32 = 60;

pub struct HttpCluster {
    base: String,
    client: reqwest::Client,
}

impl HttpCluster {
    /// Build a client against the orchestrator REST endpoint. Fails only on
    /// an unusable URL; reachability is probed via `ping`.
    pub fn new(base_url: &str) -> Result<Self> {
        if base_url.is_empty() {
            return Err(ClusterError::Config("empty orchestrator URL".to_string()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ClusterError::Config(e.to_string()))?;

        Ok(Self {
            base: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn list<T: DeserializeOwned + Default>(
        &self,
        path: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<T>> {
        let mut request = self.client.get(self.url(path)).timeout(REQUEST_TIMEOUT);
        if let Some(selector) = label_selector {
            request = request.query(&[("labelSelector", selector)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClusterError::Transient(e.to_string()))?;
        let response = check_status(response).await?;

        #[derive(Deserialize)]
        struct ResourceList<T> {
            #[serde(default)]
            items: Vec<T>,
        }

        let list: ResourceList<T> = response
            .json()
            .await
            .map_err(|e| ClusterError::Transient(e.to_string()))?;
        Ok(list.items)
    }

    async fn create<T: serde::Serialize>(&self, path: &str, resource: &T) -> Result<()> {
        let response = self
            .client
            .post(self.url(path))
            .timeout(REQUEST_TIMEOUT)
            .json(resource)
            .send()
            .await
            .map_err(|e| ClusterError::Transient(e.to_string()))?;
        check_status(response).await.map(|_| ())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(path))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| ClusterError::Transient(e.to_string()))?;
        check_status(response).await.map(|_| ())
    }
}

/// Map HTTP status codes onto the error taxonomy. Quota rejections surface
/// as 403 on create.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    match status.as_u16() {
        404 => Err(ClusterError::NotFound(body)),
        403 => Err(ClusterError::QuotaExceeded(body)),
        _ => Err(ClusterError::Transient(format!("HTTP {status}: {body}"))),
    }
}

#[async_trait]
impl ClusterApi for HttpCluster {
    async fn list_pods(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<Pod>> {
        self.list(&format!("/api/v1/namespaces/{namespace}/pods"), label_selector)
            .await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        let response = self
            .client
            .get(self.url(&format!("/api/v1/namespaces/{namespace}/pods/{name}")))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| ClusterError::Transient(e.to_string()))?;
        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ClusterError::Transient(e.to_string()))
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<()> {
        self.create(&format!("/api/v1/namespaces/{namespace}/pods"), pod)
            .await
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete(&format!("/api/v1/namespaces/{namespace}/pods/{name}"))
            .await
    }

    async fn list_services(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<Service>> {
        self.list(
            &format!("/api/v1/namespaces/{namespace}/services"),
            label_selector,
        )
        .await
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<()> {
        self.create(&format!("/api/v1/namespaces/{namespace}/services"), service)
            .await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete(&format!("/api/v1/namespaces/{namespace}/services/{name}"))
            .await
    }

    async fn watch_pods(&self, sender: UnboundedSender<WatchEvent>) -> Result<()> {
        let response = self
            .client
            .get(self.url("/api/v1/pods"))
            .query(&[
                ("watch", "true".to_string()),
                ("timeoutSeconds", WATCH_TIMEOUT_SECONDS.to_string()),
            ])
            .send()
            .await
            .map_err(|e| ClusterError::Transient(e.to_string()))?;
        let response = check_status(response).await?;

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ClusterError::Transient(e.to_string()))?;
            buffer.extend_from_slice(&chunk);

            while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match serde_json::from_str::<WatchEvent>(line) {
                    Ok(event) => {
                        if sender.send(event).is_err() {
                            debug!("watch receiver dropped; ending stream");
                            return Ok(());
                        }
                    }
                    Err(e) => warn!("undecodable watch line: {e}"),
                }
            }
        }

        // Server-side timeout closed the stream; caller reconnects.
        Ok(())
    }

    async fn ping(&self) -> bool {
        match self
            .client
            .get(self.url("/version"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("cluster ping failed: {e}");
                false
            }
        }
    }
}
