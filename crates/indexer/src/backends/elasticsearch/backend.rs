//! Elasticsearch cluster client.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use elasticsearch::auth::Credentials;
use elasticsearch::cert::CertificateValidation;
use elasticsearch::http::Url;
use elasticsearch::http::response::Response;
use elasticsearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use elasticsearch::indices::{IndicesExistsParts, IndicesRefreshParts};
use elasticsearch::params::Refresh;
use elasticsearch::{
    BulkParts, ClearScrollParts, Elasticsearch, GetParts, MgetParts, ScrollParts, SearchParts,
    UpdateByQueryParts,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::codec::{self, BACKEND_NAME};
use crate::core::{BulkResponse, ClusterClient, RefreshPolicy, UpdateByQueryResponse};
use crate::error::{ConfigurationError, TransportError};
use crate::types::{Hit, MutationRecord, Script, SearchRequest, SearchResponse};

/// Port used when a host has none.
pub const DEFAULT_PORT: u16 = 9200;

/// Credentials sent with every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ElasticsearchAuth {
    /// HTTP basic credentials.
    Basic {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// An API or service token.
    Bearer {
        /// Token value.
        token: String,
    },
}

impl ElasticsearchAuth {
    fn credentials(&self) -> Credentials {
        match self {
            ElasticsearchAuth::Basic { username, password } => {
                Credentials::Basic(username.clone(), password.clone())
            }
            ElasticsearchAuth::Bearer { token } => Credentials::Bearer(token.clone()),
        }
    }
}

/// Where and how to reach the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    /// Node URLs. Requests go to the first one.
    #[serde(default = "default_nodes")]
    pub nodes: Vec<String>,

    /// Per-request timeout, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Credentials, if the cluster requires them.
    #[serde(default)]
    pub auth: Option<ElasticsearchAuth>,

    /// Accept any TLS certificate. Local clusters only.
    #[serde(default)]
    pub disable_certificate_validation: bool,
}

fn default_nodes() -> Vec<String> {
    vec![format!("http://localhost:{}", DEFAULT_PORT)]
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            request_timeout_ms: default_timeout_ms(),
            auth: None,
            disable_certificate_validation: false,
        }
    }
}

impl ElasticsearchConfig {
    /// Builds node URLs from a comma-separated `host[:port]` list.
    ///
    /// Hosts without a port get [`DEFAULT_PORT`]; hosts without a scheme get
    /// `http://`.
    pub fn with_hosts(mut self, hosts: &str) -> Self {
        self.nodes = hosts
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(|host| {
                let (scheme, rest) = match host.split_once("://") {
                    Some((scheme, rest)) => (scheme, rest),
                    None => ("http", host),
                };
                if rest.contains(':') {
                    format!("{}://{}", scheme, rest)
                } else {
                    format!("{}://{}:{}", scheme, rest, DEFAULT_PORT)
                }
            })
            .collect();
        self
    }
}

/// A [`ClusterClient`] speaking the Elasticsearch REST API.
pub struct ElasticsearchClient {
    client: Elasticsearch,
    config: ElasticsearchConfig,
    closed: AtomicBool,
}

impl Debug for ElasticsearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticsearchClient")
            .field("nodes", &self.config.nodes)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ElasticsearchClient {
    /// Connects to the first configured node.
    ///
    /// No request is sent; an unreachable cluster surfaces on the first call.
    pub fn new(config: ElasticsearchConfig) -> Result<Self, ConfigurationError> {
        let node = config.nodes.first().cloned().unwrap_or_else(|| {
            format!("http://localhost:{}", DEFAULT_PORT)
        });
        let url: Url = node.parse().map_err(|e| ConfigurationError::InvalidNodeUrl {
            url: node.clone(),
            message: format!("{}", e),
        })?;

        let mut transport = TransportBuilder::new(SingleNodeConnectionPool::new(url))
            .timeout(Duration::from_millis(config.request_timeout_ms));
        if config.disable_certificate_validation {
            transport = transport.cert_validation(CertificateValidation::None);
        }
        if let Some(auth) = &config.auth {
            transport = transport.auth(auth.credentials());
        }

        let transport = transport
            .build()
            .map_err(|e| ConfigurationError::ClientBuild {
                backend_name: BACKEND_NAME.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client: Elasticsearch::new(transport),
            config,
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ElasticsearchConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed {
                backend_name: BACKEND_NAME.to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Reads a JSON body, turning error statuses into transport errors.
    ///
    /// `accept` lists additional statuses whose body is still a regular
    /// response.
    async fn read_json(response: Response, accept: &[u16]) -> Result<Value, TransportError> {
        let status = response.status_code().as_u16();
        if !(200..300).contains(&status) && !accept.contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(codec::status_error(status, &body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::Decode {
                backend_name: BACKEND_NAME.to_string(),
                message: e.to_string(),
            })
    }
}

fn send_error(e: elasticsearch::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout {
            backend_name: BACKEND_NAME.to_string(),
            message: e.to_string(),
        }
    } else {
        TransportError::Connection {
            backend_name: BACKEND_NAME.to_string(),
            message: e.to_string(),
        }
    }
}

fn as_refs(values: &[String]) -> Vec<&str> {
    values.iter().map(String::as_str).collect()
}

#[async_trait]
impl ClusterClient for ElasticsearchClient {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn bulk(
        &self,
        records: &[MutationRecord],
        refresh: RefreshPolicy,
    ) -> Result<BulkResponse, TransportError> {
        self.ensure_open()?;
        let refresh = match refresh {
            RefreshPolicy::None => Refresh::False,
            RefreshPolicy::Immediate => Refresh::True,
            RefreshPolicy::WaitFor => Refresh::WaitFor,
        };

        let response = self
            .client
            .bulk(BulkParts::None)
            .refresh(refresh)
            .body(codec::bulk_lines(records))
            .send()
            .await
            .map_err(send_error)?;

        let body = Self::read_json(response, &[]).await?;
        codec::parse_bulk_response(&body)
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, TransportError> {
        self.ensure_open()?;
        let indices = as_refs(&request.indices);
        let keep_alive = request.scroll.map(codec::keep_alive);

        let mut search = self
            .client
            .search(SearchParts::Index(&indices))
            .body(request.to_body());
        if let Some(keep_alive) = keep_alive.as_deref() {
            search = search.scroll(keep_alive);
        }

        let response = search.send().await.map_err(send_error)?;
        let body = Self::read_json(response, &[]).await?;
        codec::parse_search_response(&body)
    }

    async fn scroll(
        &self,
        scroll_id: &str,
        keep_alive: Duration,
    ) -> Result<SearchResponse, TransportError> {
        self.ensure_open()?;
        debug!(keep_alive = %codec::keep_alive(keep_alive), "Continuing scroll");

        let response = self
            .client
            .scroll(ScrollParts::None)
            .body(json!({
                "scroll": codec::keep_alive(keep_alive),
                "scroll_id": scroll_id,
            }))
            .send()
            .await
            .map_err(send_error)?;

        let body = Self::read_json(response, &[]).await?;
        codec::parse_search_response(&body)
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        let response = self
            .client
            .clear_scroll(ClearScrollParts::None)
            .body(json!({ "scroll_id": [scroll_id] }))
            .send()
            .await
            .map_err(send_error)?;

        // 404: the context was already gone.
        Self::read_json(response, &[404]).await.map(|_| ())
    }

    async fn update_by_query(
        &self,
        index: &str,
        query: &Value,
        script: &Script,
        refresh: bool,
    ) -> Result<UpdateByQueryResponse, TransportError> {
        self.ensure_open()?;
        let response = self
            .client
            .update_by_query(UpdateByQueryParts::Index(&[index]))
            .refresh(refresh)
            .body(json!({
                "query": query,
                "script": script.to_value(),
            }))
            .send()
            .await
            .map_err(send_error)?;

        // 409: aborted on version conflicts; the body lists them.
        let body = Self::read_json(response, &[409]).await?;
        codec::parse_update_by_query_response(&body)
    }

    async fn refresh(&self, indices: &[String]) -> Result<(), TransportError> {
        self.ensure_open()?;
        let indices = as_refs(indices);
        let response = self
            .client
            .indices()
            .refresh(IndicesRefreshParts::Index(&indices))
            .send()
            .await
            .map_err(send_error)?;

        Self::read_json(response, &[]).await.map(|_| ())
    }

    async fn get(
        &self,
        index: &str,
        id: &str,
        source_includes: &[String],
    ) -> Result<Option<Hit>, TransportError> {
        self.ensure_open()?;
        let includes = as_refs(source_includes);
        let mut get = self.client.get(GetParts::IndexId(index, id));
        if !includes.is_empty() {
            get = get._source_includes(&includes);
        }

        let response = get.send().await.map_err(send_error)?;
        // 404 with "found": false for a missing document.
        let body = Self::read_json(response, &[404]).await?;
        codec::parse_get_response(&body)
    }

    async fn mget(
        &self,
        index: &str,
        ids: &[String],
        source_includes: &[String],
    ) -> Result<Vec<Hit>, TransportError> {
        self.ensure_open()?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let includes = as_refs(source_includes);
        let mut mget = self
            .client
            .mget(MgetParts::Index(index))
            .body(json!({ "ids": ids }));
        if !includes.is_empty() {
            mget = mget._source_includes(&includes);
        }

        let response = mget.send().await.map_err(send_error)?;
        let body = Self::read_json(response, &[]).await?;
        codec::parse_mget_response(&body)
    }

    async fn indices_exist(&self, indices: &[String]) -> Result<bool, TransportError> {
        self.ensure_open()?;
        let indices = as_refs(indices);
        let response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&indices))
            .send()
            .await
            .map_err(send_error)?;

        match response.status_code().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(codec::status_error(status, &body))
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        // The transport holds no connections that need an explicit goodbye.
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_hosts() {
        let config = ElasticsearchConfig::default().with_hosts("es1:9201, es2,https://es3");
        assert_eq!(
            config.nodes,
            vec![
                "http://es1:9201".to_string(),
                "http://es2:9200".to_string(),
                "https://es3:9200".to_string(),
            ]
        );
    }

    #[test]
    fn test_invalid_node_url() {
        let config = ElasticsearchConfig {
            nodes: vec!["not a url".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            ElasticsearchClient::new(config),
            Err(ConfigurationError::InvalidNodeUrl { .. })
        ));
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let config: ElasticsearchConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.nodes, vec!["http://localhost:9200".to_string()]);
        assert_eq!(config.request_timeout_ms, 30000);
        assert!(config.auth.is_none());
    }

    #[tokio::test]
    async fn test_closed_client_refuses_calls() {
        let client = ElasticsearchClient::new(ElasticsearchConfig::default()).unwrap();
        client.close().await.unwrap();
        let err = client.refresh(&["docs".to_string()]).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed { .. }));
    }
}
