// ── Remote cluster seam ──
//
// The reconciler talks to the cluster through `ClusterApi`, and obtains a
// client per fabric through `ClusterConnector`. Production uses
// `fabsync_api::ClusterClient`; tests plug in an in-memory fake.

use std::collections::HashMap;
use std::future::Future;

use fabsync_api::{ClusterClient, Error as ApiError, Resource, ResourceType, TransportConfig};
use secrecy::SecretString;

use crate::model::{FabricConfig, FabricId};

/// The operations the reconciler needs from a declarative cluster API.
pub trait ClusterApi: Send + Sync {
    fn list(
        &self,
        resource_type: &ResourceType,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> impl Future<Output = Result<Vec<Resource>, ApiError>> + Send;

    fn get(
        &self,
        resource_type: &ResourceType,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Resource, ApiError>> + Send;

    fn create(
        &self,
        resource_type: &ResourceType,
        namespace: &str,
        resource: &Resource,
    ) -> impl Future<Output = Result<Resource, ApiError>> + Send;

    fn update(
        &self,
        resource_type: &ResourceType,
        namespace: &str,
        resource: &Resource,
    ) -> impl Future<Output = Result<Resource, ApiError>> + Send;
}

impl ClusterApi for ClusterClient {
    fn list(
        &self,
        resource_type: &ResourceType,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> impl Future<Output = Result<Vec<Resource>, ApiError>> + Send {
        ClusterClient::list(self, resource_type, namespace, label_selector)
    }

    fn get(
        &self,
        resource_type: &ResourceType,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Resource, ApiError>> + Send {
        ClusterClient::get(self, resource_type, namespace, name)
    }

    fn create(
        &self,
        resource_type: &ResourceType,
        namespace: &str,
        resource: &Resource,
    ) -> impl Future<Output = Result<Resource, ApiError>> + Send {
        ClusterClient::create(self, resource_type, namespace, resource)
    }

    fn update(
        &self,
        resource_type: &ResourceType,
        namespace: &str,
        resource: &Resource,
    ) -> impl Future<Output = Result<Resource, ApiError>> + Send {
        ClusterClient::update(self, resource_type, namespace, resource)
    }
}

/// Builds a cluster client for one fabric.
pub trait ClusterConnector: Send + Sync + 'static {
    type Client: ClusterApi;

    /// Connect to the fabric's endpoint. Failures here are fabric-level.
    fn connect(&self, fabric: &FabricConfig) -> Result<Self::Client, ApiError>;
}

/// Production connector: one `ClusterClient` per fabric with bearer-token
/// auth. Per-fabric tokens override the default.
#[derive(Debug, Clone, Default)]
pub struct HttpConnector {
    transport: TransportConfig,
    default_token: Option<SecretString>,
    tokens: HashMap<FabricId, SecretString>,
}

impl HttpConnector {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            default_token: None,
            tokens: HashMap::new(),
        }
    }

    pub fn with_default_token(mut self, token: SecretString) -> Self {
        self.default_token = Some(token);
        self
    }

    pub fn with_token(mut self, fabric: FabricId, token: SecretString) -> Self {
        self.tokens.insert(fabric, token);
        self
    }

    pub fn token_for(&self, fabric: &FabricId) -> Option<&SecretString> {
        self.tokens.get(fabric).or(self.default_token.as_ref())
    }
}

impl ClusterConnector for HttpConnector {
    type Client = ClusterClient;

    fn connect(&self, fabric: &FabricConfig) -> Result<ClusterClient, ApiError> {
        ClusterClient::new(
            fabric.remote_endpoint.trim(),
            self.token_for(&fabric.id),
            &self.transport,
        )
    }
}
