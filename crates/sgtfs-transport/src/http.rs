//! HTTP+JSON client for remote volume nodes.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use sgtfs_meta::{ClusterInfo, DataObjectMetadata, Directory, Node, Recipe, VirtualPath};

use crate::client::{ClientFactory, RemoteClient};
use crate::error::{Result, TransportError};
use crate::wire::{self, ChunkQuery, LiveResponse, PathQuery, WireError};

const NO_QUERY: &[(&str, &str)] = &[];

/// Client bound to one node's HTTP endpoint.
pub struct HttpClient {
    node: String,
    base_url: String,
    http: reqwest::Client,
}

impl HttpClient {
    /// Client for `node`, sharing the connection pool of `http`.
    pub fn new(node: &Node, http: reqwest::Client) -> Self {
        let endpoint = node.transport_endpoint.trim_end_matches('/');
        let base_url = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("http://{endpoint}")
        };
        Self {
            node: node.name.clone(),
            base_url,
            http,
        }
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_send_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                addr: self.base_url.clone(),
                timeout_ms: 0,
            }
        } else {
            TransportError::Connection {
                addr: self.base_url.clone(),
                reason: e.to_string(),
            }
        }
    }

    async fn send<Q: Serialize + ?Sized>(
        &self,
        route: &str,
        query: &Q,
    ) -> Result<reqwest::Response> {
        let response = self
            .http
            .get(format!("{}{route}", self.base_url))
            .query(query)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.bytes().await.unwrap_or_default();
        let err = serde_json::from_slice::<WireError>(&body).unwrap_or_else(|_| {
            WireError::from_status(status.as_u16(), String::from_utf8_lossy(&body).into_owned())
        });
        Err(TransportError::Remote(err))
    }

    async fn get_json<T, Q>(&self, route: &str, query: &Q) -> Result<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let body = self
            .send(route, query)
            .await?
            .bytes()
            .await
            .map_err(|e| self.map_send_error(e))?;
        serde_json::from_slice(&body).map_err(|e| TransportError::Serialization(e.to_string()))
    }

    fn path_query(path: &VirtualPath) -> PathQuery {
        PathQuery {
            path: path.to_string(),
        }
    }
}

#[async_trait]
impl RemoteClient for HttpClient {
    fn node_name(&self) -> &str {
        &self.node
    }

    async fn is_live(&self) -> Result<bool> {
        let live: LiveResponse = self.get_json(wire::ROUTE_LIVE, NO_QUERY).await?;
        Ok(live.live)
    }

    async fn get_cluster(&self) -> Result<ClusterInfo> {
        self.get_json(wire::ROUTE_CLUSTER, NO_QUERY).await
    }

    async fn get_directory(&self, path: &VirtualPath) -> Result<Directory> {
        self.get_json(wire::ROUTE_DIRECTORY, &Self::path_query(path))
            .await
    }

    async fn get_metadata(&self, path: &VirtualPath) -> Result<DataObjectMetadata> {
        self.get_json(wire::ROUTE_METADATA, &Self::path_query(path))
            .await
    }

    async fn list_metadata(&self, path: &VirtualPath) -> Result<Vec<DataObjectMetadata>> {
        self.get_json(wire::ROUTE_METADATA_LIST, &Self::path_query(path))
            .await
    }

    async fn get_recipe(&self, path: &VirtualPath) -> Result<Recipe> {
        self.get_json(wire::ROUTE_RECIPE, &Self::path_query(path))
            .await
    }

    async fn get_data_chunk(&self, cluster: &str, hash: &str) -> Result<Bytes> {
        let query = ChunkQuery {
            cluster: cluster.to_string(),
            hash: hash.to_string(),
        };
        self.send(wire::ROUTE_CHUNK, &query)
            .await?
            .bytes()
            .await
            .map_err(|e| self.map_send_error(e))
    }
}

/// Builds [`HttpClient`]s over one shared connection pool.
#[derive(Clone)]
pub struct HttpClientFactory {
    http: reqwest::Client,
}

impl HttpClientFactory {
    /// Factory whose connections give up after `connect_timeout`.
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::Connection {
                addr: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { http })
    }
}

impl ClientFactory for HttpClientFactory {
    fn connect(&self, _cluster: &str, node: &Node) -> Result<Arc<dyn RemoteClient>> {
        Ok(Arc::new(HttpClient::new(node, self.http.clone())))
    }
}
