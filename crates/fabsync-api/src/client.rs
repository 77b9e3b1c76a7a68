// Async HTTP client for a Kubernetes-style declarative API.
//
// Auth: `Authorization: Bearer <token>` (optional, for unauthenticated
// lab clusters and test servers).

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::resource::{Resource, ResourceList, ResourceType, Status};
use crate::transport::TransportConfig;

/// Async client for one cluster API server.
///
/// Cheap to clone: the inner `reqwest::Client` is reference counted.
#[derive(Clone)]
pub struct ClusterClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl ClusterClient {
    // ── Constructors ─────────────────────────────────────────────────

    /// Build from an endpoint URL, an optional bearer token, and a
    /// transport config.
    pub fn new(
        endpoint: &str,
        token: Option<&SecretString>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|e| Error::Unauthorized {
                    message: format!("invalid token header value: {e}"),
                })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = transport.build_client_with_headers(headers)?;
        let base_url = Self::normalize_base_url(endpoint)?;

        Ok(Self {
            http,
            base_url,
            timeout: transport.timeout,
        })
    }

    /// Wrap an existing `reqwest::Client` (caller manages auth headers).
    pub fn from_reqwest(endpoint: &str, http: reqwest::Client) -> Result<Self, Error> {
        Ok(Self {
            http,
            base_url: Self::normalize_base_url(endpoint)?,
            timeout: TransportConfig::default().timeout,
        })
    }

    /// The normalized endpoint (always ends with `/`).
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Ensure a trailing slash so relative joins keep any path prefix
    /// (API servers behind a proxy, e.g. `https://host/k8s/clusters/c-1/`).
    fn normalize_base_url(raw: &str) -> Result<Url, Error> {
        let mut url = Url::parse(raw.trim())?;
        let path = url.path().trim_end_matches('/').to_owned();
        url.set_path(&format!("{path}/"));
        Ok(url)
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    // ── Resource operations ──────────────────────────────────────────

    /// List objects of one type in a namespace, optionally filtered by a
    /// label selector (`key=value[,key=value]`).
    pub async fn list(
        &self,
        resource_type: &ResourceType,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<Resource>, Error> {
        let url = self.url(&resource_type.collection_path(namespace))?;
        debug!("GET {url} selector={label_selector:?}");

        let mut req = self.http.get(url);
        if let Some(selector) = label_selector {
            req = req.query(&[("labelSelector", selector)]);
        }
        let list: ResourceList = self.send(req).await?;
        Ok(list.items)
    }

    /// Fetch a single object by name.
    pub async fn get(
        &self,
        resource_type: &ResourceType,
        namespace: &str,
        name: &str,
    ) -> Result<Resource, Error> {
        let url = self.url(&resource_type.item_path(namespace, name))?;
        debug!("GET {url}");

        self.send(self.http.get(url)).await
    }

    /// Create an object. Fails with [`Error::Conflict`] if it exists.
    pub async fn create(
        &self,
        resource_type: &ResourceType,
        namespace: &str,
        resource: &Resource,
    ) -> Result<Resource, Error> {
        let url = self.url(&resource_type.collection_path(namespace))?;
        debug!("POST {url}");

        self.send(self.http.post(url).json(resource)).await
    }

    /// Replace an object. `resource.metadata.resource_version` must carry
    /// the version the caller last observed.
    pub async fn update(
        &self,
        resource_type: &ResourceType,
        namespace: &str,
        resource: &Resource,
    ) -> Result<Resource, Error> {
        let url = self.url(&resource_type.item_path(namespace, resource.name()))?;
        debug!("PUT {url}");

        self.send(self.http.put(url).json(resource)).await
    }

    // ── Response handling ────────────────────────────────────────────

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, Error> {
        let resp = req.send().await.map_err(|e| self.map_transport(e))?;
        let status = resp.status();
        if status.is_success() {
            let body = resp.text().await.map_err(|e| self.map_transport(e))?;
            serde_json::from_str(&body).map_err(|e| {
                let preview: String = body.chars().take(200).collect();
                Error::Deserialization {
                    message: format!("{e} (body preview: {preview:?})"),
                    body,
                }
            })
        } else {
            Err(parse_error(status, resp).await)
        }
    }

    fn map_transport(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }
        } else if err.is_connect() {
            let message = error_chain(&err);
            if is_tls_failure(&message) {
                Error::Tls(message)
            } else {
                Error::Connection { message }
            }
        } else {
            Error::Transport(err)
        }
    }
}

/// Translate a non-success response into a typed error.
async fn parse_error(status: StatusCode, resp: reqwest::Response) -> Error {
    let retry_after_secs = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let raw = resp.text().await.unwrap_or_default();
    let body: Status = serde_json::from_str(&raw).unwrap_or_default();
    let message = body.message.unwrap_or_else(|| {
        if raw.is_empty() {
            status.to_string()
        } else {
            raw
        }
    });

    match status.as_u16() {
        401 => Error::Unauthorized { message },
        403 => Error::Forbidden { message },
        404 => Error::NotFound { message },
        409 => Error::Conflict { message },
        429 => Error::RateLimited { retry_after_secs },
        400 | 422 => Error::Invalid {
            status: status.as_u16(),
            message,
        },
        code @ 500..=599 => Error::Server {
            status: code,
            message,
        },
        code => Error::Api {
            status: code,
            message,
            reason: body.reason,
        },
    }
}

/// Flatten a reqwest error's source chain into one line. The top-level
/// message alone ("error sending request") hides the DNS/TLS cause.
/// rustls and native-tls both name the certificate or handshake in their
/// error text.
fn is_tls_failure(chain: &str) -> bool {
    let chain = chain.to_ascii_lowercase();
    chain.contains("certificate") || chain.contains("handshake")
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut msg = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}
