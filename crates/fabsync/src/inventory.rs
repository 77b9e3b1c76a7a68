//! Wiring inventory: the desired state of each fabric.
//!
//! Maps the `switches` / `connections` lists of a `[[fabrics]]` entry into
//! `wiring.githedgehog.com/v1beta1` `Switch` and `Connection` objects.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value, json};

use fabsync_api::ResourceType;
use fabsync_config::{Config, ConnectionEntry, FabricEntry, LinkEntry, SwitchEntry};
use fabsync_core::{CoreError, DesiredResource, DesiredStateSource, FabricConfig, FabricId};

const WIRING_GROUP: &str = "wiring.githedgehog.com";
const WIRING_VERSION: &str = "v1beta1";

const SWITCH_ROLES: &[&str] = &[
    "spine",
    "server-leaf",
    "border-leaf",
    "mixed-leaf",
    "virtual-edge",
];

fn switch_type() -> ResourceType {
    ResourceType::new(WIRING_GROUP, WIRING_VERSION, "Switch").with_plural("switches")
}

fn connection_type() -> ResourceType {
    ResourceType::new(WIRING_GROUP, WIRING_VERSION, "Connection").with_plural("connections")
}

fn invalid(fabric: &str, message: impl std::fmt::Display) -> CoreError {
    CoreError::Validation {
        message: format!("fabric '{fabric}': {message}"),
    }
}

/// Inventories of every configured fabric, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    fabrics: HashMap<FabricId, FabricEntry>,
}

impl Inventory {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fabrics: config
                .fabrics
                .iter()
                .map(|f| (FabricId::from(f.id.as_str()), f.clone()))
                .collect(),
        }
    }

    /// Desired objects for one fabric entry.
    pub fn build(entry: &FabricEntry) -> Result<Vec<DesiredResource>, CoreError> {
        let mut names = HashSet::new();
        let mut resources = Vec::with_capacity(entry.switches.len() + entry.connections.len());

        for switch in &entry.switches {
            if !names.insert(("Switch", switch.name.as_str())) {
                return Err(invalid(&entry.id, format!("switch '{}' listed twice", switch.name)));
            }
            resources.push(switch_resource(&entry.id, switch)?);
        }

        let switches: HashSet<&str> = entry.switches.iter().map(|s| s.name.as_str()).collect();
        for conn in &entry.connections {
            if !names.insert(("Connection", conn.name.as_str())) {
                return Err(invalid(&entry.id, format!("connection '{}' listed twice", conn.name)));
            }
            resources.push(connection_resource(&entry.id, conn, &switches)?);
        }
        Ok(resources)
    }
}

impl DesiredStateSource for Inventory {
    fn desired_resources(&self, fabric: &FabricConfig) -> Result<Vec<DesiredResource>, CoreError> {
        match self.fabrics.get(&fabric.id) {
            Some(entry) => Self::build(entry),
            None => Ok(Vec::new()),
        }
    }
}

// ── Switches ────────────────────────────────────────────────────────

fn switch_resource(fabric: &str, switch: &SwitchEntry) -> Result<DesiredResource, CoreError> {
    if !SWITCH_ROLES.contains(&switch.role.as_str()) {
        return Err(invalid(
            fabric,
            format!(
                "switch '{}' has unknown role '{}' (expected one of: {})",
                switch.name,
                switch.role,
                SWITCH_ROLES.join(", ")
            ),
        ));
    }

    let mut spec = Map::new();
    spec.insert("role".into(), json!(switch.role));
    if let Some(ref description) = switch.description {
        spec.insert("description".into(), json!(description));
    }
    if let Some(asn) = switch.asn {
        spec.insert("asn".into(), json!(asn));
    }
    if !switch.groups.is_empty() {
        spec.insert("groups".into(), json!(switch.groups));
    }

    let resource = switch.labels.iter().fold(
        DesiredResource::new(switch_type(), switch.name.clone(), Value::Object(spec)),
        |r, (k, v)| r.with_label(k.clone(), v.clone()),
    );
    Ok(resource)
}

// ── Connections ─────────────────────────────────────────────────────

/// A `device/port` reference.
struct Port<'a> {
    device: &'a str,
    raw: &'a str,
}

fn parse_port<'a>(fabric: &str, conn: &str, raw: &'a str) -> Result<Port<'a>, CoreError> {
    match raw.split_once('/') {
        Some((device, port)) if !device.is_empty() && !port.is_empty() => {
            Ok(Port { device, raw })
        }
        _ => Err(invalid(
            fabric,
            format!("connection '{conn}': port '{raw}' is not in device/port form"),
        )),
    }
}

fn connection_resource(
    fabric: &str,
    conn: &ConnectionEntry,
    switches: &HashSet<&str>,
) -> Result<DesiredResource, CoreError> {
    if conn.links.is_empty() {
        return Err(invalid(fabric, format!("connection '{}' has no links", conn.name)));
    }

    let ports = |link| link_ports(fabric, conn, switches, link);

    let spec = match conn.kind.as_str() {
        "unbundled" => {
            let [link] = conn.links.as_slice() else {
                return Err(invalid(
                    fabric,
                    format!("unbundled connection '{}' needs exactly one link", conn.name),
                ));
            };
            let (switch, server) = ports(link)?;
            json!({ "unbundled": { "link": server_link(&switch, &server) } })
        }
        kind @ ("bundled" | "mclag") => {
            let links = conn
                .links
                .iter()
                .map(|link| ports(link).map(|(switch, server)| server_link(&switch, &server)))
                .collect::<Result<Vec<_>, _>>()?;
            json!({ kind: { "links": links } })
        }
        "fabric" => {
            let links = conn
                .links
                .iter()
                .map(|link| {
                    let (spine, leaf) = ports(link)?;
                    ensure_switch(fabric, conn, switches, &leaf)?;
                    Ok(json!({
                        "spine": { "port": spine.raw },
                        "leaf": { "port": leaf.raw },
                    }))
                })
                .collect::<Result<Vec<_>, CoreError>>()?;
            json!({ "fabric": { "links": links } })
        }
        other => {
            return Err(invalid(
                fabric,
                format!(
                    "connection '{}' has unknown kind '{other}' (expected unbundled, bundled, mclag or fabric)",
                    conn.name
                ),
            ));
        }
    };

    Ok(DesiredResource::new(connection_type(), conn.name.clone(), spec))
}

/// Parse both ends of a link. The `from` end must be a known switch.
fn link_ports<'a>(
    fabric: &str,
    conn: &ConnectionEntry,
    switches: &HashSet<&str>,
    link: &'a LinkEntry,
) -> Result<(Port<'a>, Port<'a>), CoreError> {
    let from = parse_port(fabric, &conn.name, &link.from)?;
    let to = parse_port(fabric, &conn.name, &link.to)?;
    ensure_switch(fabric, conn, switches, &from)?;
    Ok((from, to))
}

fn ensure_switch(
    fabric: &str,
    conn: &ConnectionEntry,
    switches: &HashSet<&str>,
    port: &Port<'_>,
) -> Result<(), CoreError> {
    if switches.contains(port.device) {
        return Ok(());
    }
    Err(invalid(
        fabric,
        format!(
            "connection '{}' references unknown switch '{}'",
            conn.name, port.device
        ),
    ))
}

fn server_link(switch: &Port<'_>, server: &Port<'_>) -> Value {
    json!({
        "switch": { "port": switch.raw },
        "server": { "port": server.raw },
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn switch(name: &str, role: &str) -> SwitchEntry {
        SwitchEntry {
            name: name.into(),
            role: role.into(),
            description: None,
            asn: None,
            groups: Vec::new(),
            labels: BTreeMap::new(),
        }
    }

    fn link(from: &str, to: &str) -> LinkEntry {
        LinkEntry {
            from: from.into(),
            to: to.into(),
        }
    }

    fn connection(name: &str, kind: &str, links: Vec<LinkEntry>) -> ConnectionEntry {
        ConnectionEntry {
            name: name.into(),
            kind: kind.into(),
            links,
        }
    }

    fn entry(switches: Vec<SwitchEntry>, connections: Vec<ConnectionEntry>) -> FabricEntry {
        FabricEntry {
            id: "lab".into(),
            name: None,
            endpoint: "https://lab.example:6443".into(),
            namespace: "default".into(),
            enabled: true,
            interval: 300,
            token: None,
            token_env: None,
            switches,
            connections,
        }
    }

    fn error_message(result: Result<Vec<DesiredResource>, CoreError>) -> String {
        match result {
            Err(CoreError::Validation { message }) => message,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn switches_become_switch_objects() {
        let mut leaf = switch("leaf-1", "server-leaf");
        leaf.asn = Some(65101);
        leaf.groups = vec!["mclag-1".into()];
        leaf.labels.insert("rack".into(), "r1".into());

        let resources = Inventory::build(&entry(vec![leaf], Vec::new())).unwrap();

        assert_eq!(resources.len(), 1);
        let r = &resources[0];
        assert_eq!(r.resource_type.kind, "Switch");
        assert_eq!(r.resource_type.api_version(), "wiring.githedgehog.com/v1beta1");
        assert_eq!(r.name, "leaf-1");
        assert_eq!(r.labels.get("rack").map(String::as_str), Some("r1"));
        assert_eq!(
            r.spec,
            json!({ "role": "server-leaf", "asn": 65101, "groups": ["mclag-1"] })
        );
    }

    #[test]
    fn unbundled_connection_maps_switch_and_server_ports() {
        let inv = entry(
            vec![switch("leaf-1", "server-leaf")],
            vec![connection(
                "server-1--leaf-1",
                "unbundled",
                vec![link("leaf-1/E1/1", "server-1/enp2s1")],
            )],
        );
        let resources = Inventory::build(&inv).unwrap();
        assert_eq!(
            resources[1].spec,
            json!({ "unbundled": { "link": {
                "switch": { "port": "leaf-1/E1/1" },
                "server": { "port": "server-1/enp2s1" },
            }}})
        );
    }

    #[test]
    fn mclag_connection_lists_every_link() {
        let inv = entry(
            vec![switch("leaf-1", "server-leaf"), switch("leaf-2", "server-leaf")],
            vec![connection(
                "server-1--mclag",
                "mclag",
                vec![
                    link("leaf-1/E1/2", "server-1/enp2s1"),
                    link("leaf-2/E1/2", "server-1/enp2s2"),
                ],
            )],
        );
        let resources = Inventory::build(&inv).unwrap();
        let links = &resources[2].spec["mclag"]["links"];
        assert_eq!(links.as_array().map(Vec::len), Some(2));
        assert_eq!(links[1]["switch"]["port"], "leaf-2/E1/2");
    }

    #[test]
    fn fabric_connection_requires_both_ends_to_be_switches() {
        let inv = entry(
            vec![switch("spine-1", "spine")],
            vec![connection(
                "spine-1--leaf-9",
                "fabric",
                vec![link("spine-1/E1/1", "leaf-9/E1/49")],
            )],
        );
        assert!(error_message(Inventory::build(&inv)).contains("unknown switch 'leaf-9'"));
    }

    #[test]
    fn rejects_unknown_role() {
        let inv = entry(vec![switch("leaf-1", "router")], Vec::new());
        assert!(error_message(Inventory::build(&inv)).contains("unknown role 'router'"));
    }

    #[test]
    fn rejects_malformed_port() {
        let inv = entry(
            vec![switch("leaf-1", "server-leaf")],
            vec![connection("c", "unbundled", vec![link("leaf-1", "server-1/eth0")])],
        );
        assert!(error_message(Inventory::build(&inv)).contains("device/port"));
    }

    #[test]
    fn rejects_multi_link_unbundled_connection() {
        let inv = entry(
            vec![switch("leaf-1", "server-leaf")],
            vec![connection(
                "c",
                "unbundled",
                vec![link("leaf-1/E1/1", "s/e0"), link("leaf-1/E1/2", "s/e1")],
            )],
        );
        assert!(error_message(Inventory::build(&inv)).contains("exactly one link"));
    }

    #[test]
    fn rejects_duplicate_switch_names() {
        let inv = entry(
            vec![switch("leaf-1", "server-leaf"), switch("leaf-1", "spine")],
            Vec::new(),
        );
        assert!(error_message(Inventory::build(&inv)).contains("listed twice"));
    }

    #[test]
    fn unknown_fabric_has_no_desired_state() {
        let inventory = Inventory::default();
        let fabric = FabricConfig::new("ghost");
        assert!(inventory.desired_resources(&fabric).unwrap().is_empty());
    }
}
