// ── Local validation ──
//
// Everything here runs before the first network call. A failure is a
// `validation` error: the operator has to fix configuration or inventory.

use std::collections::BTreeSet;

use url::Url;

use crate::error::CoreError;
use crate::model::{DesiredResource, FABRIC_LABEL, FabricConfig};

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 253;

fn invalid(message: impl Into<String>) -> CoreError {
    CoreError::Validation {
        message: message.into(),
    }
}

/// Endpoint must be an absolute http(s) URL.
pub(crate) fn endpoint(fabric: &FabricConfig) -> Result<Url, CoreError> {
    let raw = fabric.remote_endpoint.trim();
    let url = Url::parse(raw).map_err(|e| invalid(format!("invalid endpoint {raw:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Ok(url),
        _ => Err(invalid(format!(
            "invalid endpoint {raw:?}: expected an http(s) URL with a host"
        ))),
    }
}

/// Namespaces follow DNS label rules.
pub(crate) fn namespace(fabric: &FabricConfig) -> Result<(), CoreError> {
    if is_dns_label(&fabric.namespace) {
        Ok(())
    } else {
        Err(invalid(format!("invalid namespace {:?}", fabric.namespace)))
    }
}

/// Names, types and labels of the desired set, plus uniqueness.
pub(crate) fn resources(fabric: &FabricConfig, desired: &[DesiredResource]) -> Result<(), CoreError> {
    let mut seen = BTreeSet::new();
    for resource in desired {
        let key = resource.key();
        let rt = &resource.resource_type;
        if rt.kind.is_empty() || rt.version.is_empty() || !is_dns_label(&rt.plural) {
            return Err(invalid(format!("{key}: incomplete resource type {rt}")));
        }
        if !is_dns_subdomain(&resource.name) {
            return Err(invalid(format!("{key}: invalid name {:?}", resource.name)));
        }
        if let Some(owner) = resource
            .labels
            .get(FABRIC_LABEL)
            .filter(|owner| owner.as_str() != fabric.id.as_str())
        {
            return Err(invalid(format!(
                "{key}: label {FABRIC_LABEL} is reserved (got {owner:?})"
            )));
        }
        if let Some((k, _)) = resource
            .labels
            .iter()
            .find(|(k, v)| k.is_empty() || k.len() > MAX_NAME_LEN || v.len() > MAX_LABEL_LEN)
        {
            return Err(invalid(format!("{key}: invalid label {k:?}")));
        }
        if !resource.spec.is_object() && !resource.spec.is_null() {
            return Err(invalid(format!("{key}: spec must be an object")));
        }
        if !seen.insert(key.clone()) {
            return Err(invalid(format!("duplicate resource {key}")));
        }
    }
    Ok(())
}

fn is_dns_label(s: &str) -> bool {
    let bytes = s.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= MAX_LABEL_LEN
        && bytes.iter().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes.first().is_some_and(u8::is_ascii_alphanumeric)
        && bytes.last().is_some_and(u8::is_ascii_alphanumeric)
}

fn is_dns_subdomain(s: &str) -> bool {
    s.len() <= MAX_NAME_LEN && s.split('.').all(is_dns_label)
}

#[cfg(test)]
mod tests {
    use fabsync_api::ResourceType;
    use serde_json::json;

    use super::*;
    use crate::model::FabricSettings;

    fn fabric(endpoint: &str) -> FabricConfig {
        FabricSettings::new("f1").endpoint(endpoint).enabled(true).into()
    }

    fn switch(name: &str) -> DesiredResource {
        DesiredResource::new(
            ResourceType::new("wiring.githedgehog.com", "v1beta1", "Switch").with_plural("switches"),
            name,
            json!({"role": "server-leaf"}),
        )
    }

    #[test]
    fn endpoint_rules() {
        assert!(endpoint(&fabric("https://10.0.0.1:6443")).is_ok());
        assert!(endpoint(&fabric("  http://k8s.local  ")).is_ok());
        assert!(endpoint(&fabric("k8s.local:6443")).is_err());
        assert!(endpoint(&fabric("ftp://k8s.local")).is_err());
    }

    #[test]
    fn namespace_rules() {
        let mut f = fabric("https://k8s");
        assert!(namespace(&f).is_ok());
        f.namespace = "Fab_1".into();
        assert!(namespace(&f).is_err());
        f.namespace = String::new();
        assert!(namespace(&f).is_err());
    }

    #[test]
    fn duplicate_resources_rejected() {
        let f = fabric("https://k8s");
        let err = resources(&f, &[switch("leaf-1"), switch("leaf-1")]);
        assert!(matches!(err, Err(CoreError::Validation { ref message }) if message.contains("duplicate")));
    }

    #[test]
    fn names_follow_dns_rules() {
        let f = fabric("https://k8s");
        assert!(resources(&f, &[switch("leaf-1"), switch("spine-1.dc1")]).is_ok());
        assert!(resources(&f, &[switch("Leaf 1")]).is_err());
        assert!(resources(&f, &[switch("-leaf")]).is_err());
    }

    #[test]
    fn ownership_label_is_reserved() {
        let f = fabric("https://k8s");
        assert!(resources(&f, &[switch("a").with_label(FABRIC_LABEL, "other")]).is_err());
        assert!(resources(&f, &[switch("a").with_label(FABRIC_LABEL, "f1")]).is_ok());
    }

    #[test]
    fn spec_must_be_object() {
        let f = fabric("https://k8s");
        let mut bad = switch("a");
        bad.spec = json!([1, 2]);
        assert!(resources(&f, &[bad]).is_err());
    }
}
