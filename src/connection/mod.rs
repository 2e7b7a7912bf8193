//! Connection management for Elasticsearch
//!
//! This module provides connection setup:
//! - Cluster URL resolution (plain URL or Elastic Cloud ID)
//! - HTTP client construction (timeouts, certificate verification)
//! - Basic authentication
//! - A startup check against the cluster root endpoint

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, Url};
use tracing::{info, warn};

use crate::backend::http::Credentials;
use crate::backend::{EsClient, SearchBackend};
use crate::config::ConnectionConfig;
use crate::error::{ConnectionError, Result};

/// Elasticsearch connection manager
///
/// Resolves the cluster address from configuration and hands out a ready
/// [`EsClient`].
pub struct ConnectionManager {
    /// Connection configuration
    config: ConnectionConfig,

    /// Password for basic authentication
    password: Option<String>,
}

impl ConnectionManager {
    /// Create a new connection manager
    ///
    /// # Arguments
    /// * `config` - Connection configuration
    /// * `password` - Password matching `config.username`
    ///
    /// # Returns
    /// * `Self` - New connection manager instance
    pub fn new(config: ConnectionConfig, password: Option<String>) -> Self {
        Self { config, password }
    }

    /// Resolve the cluster URL
    ///
    /// A configured cloud ID takes precedence over the plain URL.
    pub fn cluster_url(&self) -> Result<Url> {
        let raw = match &self.config.cloud_id {
            Some(cloud_id) => {
                info!("Connecting to Elasticsearch cloud using cloud_id");
                decode_cloud_id(cloud_id)?
            }
            None => {
                info!("Connecting to Elasticsearch using URL");
                self.config.url.clone()
            }
        };
        Url::parse(&raw).map_err(|e| ConnectionError::InvalidUrl(format!("{raw}: {e}")).into())
    }

    /// Build the client without contacting the cluster
    ///
    /// # Returns
    /// * `Result<EsClient>` - Configured client or error
    pub fn build_client(&self) -> Result<EsClient> {
        let url = self.cluster_url()?;

        if self.config.ignore_certs {
            warn!("TLS certificate verification is disabled");
        }

        let http = Client::builder()
            .timeout(self.config.request_timeout())
            .danger_accept_invalid_certs(self.config.ignore_certs)
            .build()
            .map_err(|e| ConnectionError::ClientBuildFailed(e.to_string()))?;

        let credentials = match &self.config.username {
            Some(username) => Some(Credentials {
                username: username.clone(),
                password: self.password.clone().unwrap_or_default(),
            }),
            None => None,
        };

        Ok(EsClient::new(http, url, credentials))
    }

    /// Build the client and verify the cluster answers
    ///
    /// # Returns
    /// * `Result<EsClient>` - Connected client or error
    pub async fn connect(&self) -> Result<EsClient> {
        let client = self.build_client()?;
        let cluster = client.info().await?;
        info!(
            "Connected to cluster {} (version {})",
            cluster.cluster_name, cluster.version.number
        );
        Ok(client)
    }
}

/// Decode an Elastic Cloud ID into the Elasticsearch endpoint URL
///
/// A cloud ID has the form `<name>:<base64(host$es_uuid$kibana_uuid)>`; the
/// host part may carry an explicit port (`host:port`).
///
/// # Arguments
/// * `cloud_id` - Cloud ID as shown in the deployment console
///
/// # Returns
/// * `Result<String>` - `https://<es_uuid>.<host>[:port]`
pub fn decode_cloud_id(cloud_id: &str) -> Result<String> {
    let encoded = cloud_id
        .split_once(':')
        .map(|(_, rest)| rest)
        .unwrap_or(cloud_id);

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ConnectionError::InvalidCloudId(e.to_string()))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|e| ConnectionError::InvalidCloudId(e.to_string()))?;

    let mut parts = decoded.split('$');
    let host = parts.next().unwrap_or_default();
    let es_uuid = parts.next().unwrap_or_default();
    if host.is_empty() || es_uuid.is_empty() {
        return Err(ConnectionError::InvalidCloudId(
            "expected host$elasticsearch_id".to_string(),
        )
        .into());
    }

    let (host, port) = match host.split_once(':') {
        Some((h, p)) => (h, Some(p)),
        None => (host, None),
    };

    Ok(match port {
        Some(port) => format!("https://{es_uuid}.{host}:{port}"),
        None => format!("https://{es_uuid}.{host}"),
    })
}
