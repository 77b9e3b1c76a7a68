// ── Wire types for a Kubernetes-style declarative API ──
//
// Only the fields the reconciler reads or writes are modelled. Unknown
// object fields (`status`) are ignored on input. Unknown metadata
// (annotations, finalizers, owner references) is kept in `extra` so an
// update can send it back unchanged.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Group / version / kind of a resource, plus the plural collection name
/// used in request paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceType {
    /// API group. Empty for the core group (`/api/v1`).
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

impl ResourceType {
    /// Build a type with the conventional plural (`kind` lowercased + `s`).
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        let kind = kind.into();
        let plural = format!("{}s", kind.to_lowercase());
        Self {
            group: group.into(),
            version: version.into(),
            kind,
            plural,
        }
    }

    /// Override the plural collection name (e.g. `"policies"`).
    pub fn with_plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = plural.into();
        self
    }

    /// The `apiVersion` field value: `group/version`, or bare `version`
    /// for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Relative collection path inside a namespace.
    ///
    /// Core group: `api/v1/namespaces/{ns}/{plural}`
    /// Named group: `apis/{group}/{version}/namespaces/{ns}/{plural}`
    pub fn collection_path(&self, namespace: &str) -> String {
        if self.group.is_empty() {
            format!("api/{}/namespaces/{namespace}/{}", self.version, self.plural)
        } else {
            format!(
                "apis/{}/{}/namespaces/{namespace}/{}",
                self.group, self.version, self.plural
            )
        }
    }

    /// Relative path of a single named object.
    pub fn item_path(&self, namespace: &str, name: &str) -> String {
        format!("{}/{name}", self.collection_path(namespace))
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.api_version())
    }
}

/// Object metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Opaque optimistic-concurrency token. Required on update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Metadata owned by other writers.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A declarative object as stored by the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// List items may omit `apiVersion` and `kind`.
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl Resource {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }
}

/// Envelope for collection reads (`{ "items": [...] }`).
#[derive(Debug, Deserialize)]
pub(crate) struct ResourceList {
    #[serde(default)]
    pub items: Vec<Resource>,
}

/// Failure body returned by the API server (`kind: Status`).
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Status {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}
