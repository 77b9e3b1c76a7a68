// ── Desired resources ──
//
// What the host's domain layer wants to exist remotely for one fabric.

use std::collections::BTreeMap;
use std::fmt;

use fabsync_api::{ObjectMeta, Resource, ResourceType};
use serde::{Deserialize, Serialize};

use super::fabric::FabricId;

/// Label stamped on every object the reconciler manages. Observed state is
/// listed with `FABRIC_LABEL=<fabric id>`.
pub const FABRIC_LABEL: &str = "fabsync.io/fabric";

/// One object the fabric should have in the remote cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredResource {
    pub resource_type: ResourceType,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub spec: serde_json::Value,
}

impl DesiredResource {
    pub fn new(resource_type: ResourceType, name: impl Into<String>, spec: serde_json::Value) -> Self {
        Self {
            resource_type,
            name: name.into(),
            labels: BTreeMap::new(),
            spec,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            kind: self.resource_type.kind.clone(),
            name: self.name.clone(),
        }
    }

    /// Render as a wire object owned by `fabric` in `namespace`.
    pub(crate) fn to_resource(
        &self,
        fabric: &FabricId,
        namespace: &str,
        resource_version: Option<String>,
    ) -> Resource {
        let mut labels = self.labels.clone();
        labels.insert(FABRIC_LABEL.into(), fabric.to_string());
        Resource {
            api_version: self.resource_type.api_version(),
            kind: self.resource_type.kind.clone(),
            metadata: ObjectMeta {
                name: self.name.clone(),
                namespace: Some(namespace.to_owned()),
                labels,
                resource_version,
                ..ObjectMeta::default()
            },
            spec: self.spec.clone(),
        }
    }

    /// Render as a replacement for `observed`. Metadata written by others
    /// (annotations, finalizers, foreign labels) is carried over; desired
    /// labels win on conflict.
    pub(crate) fn to_update(&self, fabric: &FabricId, namespace: &str, observed: &ObjectMeta) -> Resource {
        let mut resource = self.to_resource(fabric, namespace, observed.resource_version.clone());
        let mut labels = observed.labels.clone();
        labels.append(&mut resource.metadata.labels);
        resource.metadata.labels = labels;
        resource.metadata.uid.clone_from(&observed.uid);
        resource.metadata.extra.clone_from(&observed.extra);
        resource
    }

    /// `true` when `observed` already carries everything this resource
    /// asks for. Extra fields the server defaulted are ignored.
    pub(crate) fn is_satisfied_by(&self, fabric: &FabricId, observed: &Resource) -> bool {
        let labels_match = self
            .labels
            .iter()
            .chain(std::iter::once((&FABRIC_LABEL.to_owned(), &fabric.to_string())))
            .all(|(k, v)| observed.metadata.labels.get(k) == Some(v));
        labels_match && json_contains(&observed.spec, &self.spec)
    }
}

/// Human-readable resource identity (`Kind/name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: String,
    pub name: String,
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Structural containment: every field of `wanted` is present in `actual`
/// with a contained value. Arrays must match element-wise.
fn json_contains(actual: &serde_json::Value, wanted: &serde_json::Value) -> bool {
    use serde_json::Value;

    match (actual, wanted) {
        (Value::Object(a), Value::Object(w)) => w
            .iter()
            .all(|(k, wv)| a.get(k).is_some_and(|av| json_contains(av, wv))),
        (Value::Array(a), Value::Array(w)) => {
            a.len() == w.len() && a.iter().zip(w).all(|(av, wv)| json_contains(av, wv))
        }
        (a, w) => a == w,
    }
}
