// ── Desired vs observed diff ──

use std::collections::{BTreeMap, BTreeSet};

use fabsync_api::{ObjectMeta, Resource};

use crate::model::{DesiredResource, FabricId, ResourceKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Action {
    Create,
    /// Replace the observed object, keeping the metadata in `current`.
    Update { current: Box<ObjectMeta> },
    Unchanged,
}

#[derive(Debug)]
pub(crate) struct Step<'a> {
    pub desired: &'a DesiredResource,
    pub action: Action,
}

#[derive(Debug, Default)]
pub(crate) struct Plan<'a> {
    pub steps: Vec<Step<'a>>,
    pub orphaned: Vec<ResourceKey>,
}

impl Plan<'_> {
    pub fn pending(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.action != Action::Unchanged)
            .count()
    }
}

/// Three-way diff. `observed` holds every object listed with this fabric's
/// ownership label, keyed by kind and name. Steps keep the order of
/// `desired`.
pub(crate) fn plan<'a>(
    fabric: &FabricId,
    desired: &'a [DesiredResource],
    observed: &BTreeMap<ResourceKey, Resource>,
) -> Plan<'a> {
    let steps = desired
        .iter()
        .map(|d| {
            let action = match observed.get(&d.key()) {
                None => Action::Create,
                Some(current) if d.is_satisfied_by(fabric, current) => Action::Unchanged,
                Some(current) => Action::Update {
                    current: Box::new(current.metadata.clone()),
                },
            };
            Step { desired: d, action }
        })
        .collect();

    let wanted: BTreeSet<ResourceKey> = desired.iter().map(DesiredResource::key).collect();
    let orphaned = observed
        .keys()
        .filter(|k| !wanted.contains(*k))
        .cloned()
        .collect();

    Plan { steps, orphaned }
}

#[cfg(test)]
mod tests {
    use fabsync_api::ResourceType;
    use serde_json::json;

    use super::*;

    fn switch(name: &str, spec: serde_json::Value) -> DesiredResource {
        DesiredResource::new(
            ResourceType::new("wiring.githedgehog.com", "v1beta1", "Switch").with_plural("switches"),
            name,
            spec,
        )
    }

    fn observed_from(fabric: &FabricId, items: &[DesiredResource]) -> BTreeMap<ResourceKey, Resource> {
        items
            .iter()
            .map(|d| (d.key(), d.to_resource(fabric, "default", Some("5".into()))))
            .collect()
    }

    #[test]
    fn classifies_create_update_unchanged_and_orphans() {
        let fabric = FabricId::from("f1");
        let desired = vec![
            switch("new", json!({"role": "leaf"})),
            switch("same", json!({"role": "leaf"})),
            switch("changed", json!({"role": "spine"})),
        ];
        let observed = observed_from(
            &fabric,
            &[
                switch("same", json!({"role": "leaf"})),
                switch("changed", json!({"role": "leaf"})),
                switch("gone", json!({})),
            ],
        );

        let plan = plan(&fabric, &desired, &observed);
        let actions: Vec<&Action> = plan.steps.iter().map(|s| &s.action).collect();
        assert_eq!(actions[..2], [&Action::Create, &Action::Unchanged]);
        let Action::Update { current } = actions[2] else {
            panic!("expected update, got {:?}", actions[2]);
        };
        assert_eq!(current.resource_version.as_deref(), Some("5"));
        assert_eq!(plan.pending(), 2);
        assert_eq!(plan.orphaned.len(), 1);
        assert_eq!(plan.orphaned[0].name, "gone");
    }

    #[test]
    fn nothing_desired_nothing_pending() {
        let fabric = FabricId::from("f1");
        let plan = plan(&fabric, &[], &BTreeMap::new());
        assert!(plan.steps.is_empty());
        assert_eq!(plan.pending(), 0);
    }
}
