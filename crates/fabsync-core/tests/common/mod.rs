// Shared fixtures for engine and reconciler tests: an in-memory cluster
// with call counters and failure injection.
#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fabsync_api::{Error as ApiError, ObjectMeta, Resource, ResourceType};
use fabsync_core::{
    ClusterApi, ClusterConnector, CoreError, DesiredResource, FabricConfig,
};
use serde_json::json;

type Failure = Box<dyn Fn() -> ApiError + Send + Sync>;

pub const ENDPOINT: &str = "https://cluster.test:6443";

pub fn switch_type() -> ResourceType {
    ResourceType::new("wiring.githedgehog.com", "v1beta1", "Switch").with_plural("switches")
}

pub fn switch(name: &str) -> DesiredResource {
    DesiredResource::new(switch_type(), name, json!({"role": "server-leaf"}))
}

pub fn switches(names: &[&str]) -> Vec<DesiredResource> {
    names.iter().map(|n| switch(n)).collect()
}

/// Desired state that can be swapped between runs.
#[derive(Clone, Default)]
pub struct SharedDesired(Arc<Mutex<Vec<DesiredResource>>>);

impl SharedDesired {
    pub fn new(resources: Vec<DesiredResource>) -> Self {
        Self(Arc::new(Mutex::new(resources)))
    }

    pub fn set(&self, resources: Vec<DesiredResource>) {
        *self.0.lock().unwrap() = resources;
    }

    pub fn source(
        &self,
    ) -> impl Fn(&FabricConfig) -> Result<Vec<DesiredResource>, CoreError> + Send + Sync + 'static
    {
        let shared = self.clone();
        move |_: &FabricConfig| Ok(shared.0.lock().unwrap().clone())
    }
}

/// Two switches per fabric, named after the fabric.
pub fn per_fabric_source(
    fabric: &FabricConfig,
) -> Result<Vec<DesiredResource>, CoreError> {
    Ok(vec![
        switch(&format!("{}-leaf-1", fabric.id)),
        switch(&format!("{}-leaf-2", fabric.id)),
    ])
}

// ── FakeCluster ─────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct FakeCluster {
    inner: Arc<FakeInner>,
}

#[derive(Default)]
struct FakeInner {
    objects: Mutex<BTreeMap<String, Resource>>,
    next_rv: AtomicU64,
    lists: AtomicUsize,
    gets: AtomicUsize,
    creates: AtomicUsize,
    updates: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    write_failures: Mutex<HashMap<String, Failure>>,
    list_failure: Mutex<Option<Failure>>,
    write_delays: Mutex<HashMap<String, Duration>>,
    default_delay: Mutex<Option<Duration>>,
    conflicts: Mutex<HashMap<String, u32>>,
}

struct InFlight<'a>(&'a FakeInner);

impl<'a> InFlight<'a> {
    fn enter(inner: &'a FakeInner) -> Self {
        let now = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Setup ────────────────────────────────────────────────────────

    /// Place an object directly, as if another writer created it.
    pub fn seed(&self, name: &str, labels: &[(&str, &str)], spec: serde_json::Value) {
        let rv = self.bump_rv();
        let resource = Resource {
            api_version: switch_type().api_version(),
            kind: "Switch".into(),
            metadata: ObjectMeta {
                name: name.into(),
                labels: labels
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
                resource_version: Some(rv),
                ..ObjectMeta::default()
            },
            spec,
        };
        self.inner.objects.lock().unwrap().insert(name.into(), resource);
    }

    pub fn fail_writes_for(&self, name: &str, f: impl Fn() -> ApiError + Send + Sync + 'static) {
        self.inner
            .write_failures
            .lock()
            .unwrap()
            .insert(name.into(), Box::new(f));
    }

    pub fn fail_lists(&self, f: impl Fn() -> ApiError + Send + Sync + 'static) {
        *self.inner.list_failure.lock().unwrap() = Some(Box::new(f));
    }

    pub fn clear_failures(&self) {
        self.inner.write_failures.lock().unwrap().clear();
        *self.inner.list_failure.lock().unwrap() = None;
    }

    pub fn delay_writes_for(&self, name: &str, delay: Duration) {
        self.inner
            .write_delays
            .lock()
            .unwrap()
            .insert(name.into(), delay);
    }

    pub fn delay_all_writes(&self, delay: Duration) {
        *self.inner.default_delay.lock().unwrap() = Some(delay);
    }

    /// The next `count` writes to `name` lose an optimistic-concurrency
    /// race against an invisible writer.
    pub fn conflict_on(&self, name: &str, count: u32) {
        self.inner
            .conflicts
            .lock()
            .unwrap()
            .insert(name.into(), count);
    }

    // ── Inspection ───────────────────────────────────────────────────

    pub fn object(&self, name: &str) -> Option<Resource> {
        self.inner.objects.lock().unwrap().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn lists(&self) -> usize {
        self.inner.lists.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.inner.gets.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.inner.creates.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.inner.updates.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.lists() + self.gets() + self.creates() + self.updates()
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    // ── Internals ────────────────────────────────────────────────────

    fn bump_rv(&self) -> String {
        (self.inner.next_rv.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn delay_for(&self, name: &str) -> Option<Duration> {
        let specific = self.inner.write_delays.lock().unwrap().get(name).copied();
        specific.or(*self.inner.default_delay.lock().unwrap())
    }

    fn injected_failure(&self, name: &str) -> Option<ApiError> {
        self.inner
            .write_failures
            .lock()
            .unwrap()
            .get(name)
            .map(|f| f())
    }

    fn take_conflict(&self, name: &str) -> bool {
        let mut conflicts = self.inner.conflicts.lock().unwrap();
        match conflicts.get_mut(name) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    fn conflict(name: &str) -> ApiError {
        ApiError::Conflict {
            message: format!("switches \"{name}\": the object has been modified"),
        }
    }

    fn store(&self, resource: &Resource) -> Resource {
        let mut stored = resource.clone();
        stored.metadata.resource_version = Some(self.bump_rv());
        self.inner
            .objects
            .lock()
            .unwrap()
            .insert(stored.metadata.name.clone(), stored.clone());
        stored
    }

    async fn write(&self, resource: &Resource, create: bool) -> Result<Resource, ApiError> {
        let name = resource.metadata.name.clone();
        if create {
            self.inner.creates.fetch_add(1, Ordering::SeqCst);
        } else {
            self.inner.updates.fetch_add(1, Ordering::SeqCst);
        }
        let _in_flight = InFlight::enter(&self.inner);
        if let Some(delay) = self.delay_for(&name) {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.injected_failure(&name) {
            return Err(err);
        }
        if self.take_conflict(&name) {
            // Someone else wrote in between: bump the stored version.
            if let Some(obj) = self.inner.objects.lock().unwrap().get_mut(&name) {
                obj.metadata.resource_version = Some(self.bump_rv());
            }
            return Err(Self::conflict(&name));
        }

        let existing = self.object(&name);
        match (create, existing) {
            (true, Some(_)) => Err(ApiError::Conflict {
                message: format!("switches \"{name}\" already exists"),
            }),
            (true, None) => Ok(self.store(resource)),
            (false, None) => Err(ApiError::NotFound {
                message: format!("switches \"{name}\" not found"),
            }),
            (false, Some(current)) => {
                if current.metadata.resource_version != resource.metadata.resource_version {
                    return Err(Self::conflict(&name));
                }
                Ok(self.store(resource))
            }
        }
    }
}

impl ClusterApi for FakeCluster {
    fn list(
        &self,
        _resource_type: &ResourceType,
        _namespace: &str,
        label_selector: Option<&str>,
    ) -> impl Future<Output = Result<Vec<Resource>, ApiError>> + Send {
        let selector = label_selector
            .and_then(|s| s.split_once('='))
            .map(|(k, v)| (k.to_owned(), v.to_owned()));
        async move {
            self.inner.lists.fetch_add(1, Ordering::SeqCst);
            if let Some(f) = self.inner.list_failure.lock().unwrap().as_ref() {
                return Err(f());
            }
            let objects = self.inner.objects.lock().unwrap();
            Ok(objects
                .values()
                .filter(|o| {
                    selector
                        .as_ref()
                        .is_none_or(|(k, v)| o.metadata.labels.get(k) == Some(v))
                })
                .cloned()
                .collect())
        }
    }

    fn get(
        &self,
        _resource_type: &ResourceType,
        _namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Resource, ApiError>> + Send {
        async move {
            self.inner.gets.fetch_add(1, Ordering::SeqCst);
            self.object(name).ok_or_else(|| ApiError::NotFound {
                message: format!("switches \"{name}\" not found"),
            })
        }
    }

    fn create(
        &self,
        _resource_type: &ResourceType,
        _namespace: &str,
        resource: &Resource,
    ) -> impl Future<Output = Result<Resource, ApiError>> + Send {
        self.write(resource, true)
    }

    fn update(
        &self,
        _resource_type: &ResourceType,
        _namespace: &str,
        resource: &Resource,
    ) -> impl Future<Output = Result<Resource, ApiError>> + Send {
        self.write(resource, false)
    }
}

impl ClusterConnector for FakeCluster {
    type Client = FakeCluster;

    fn connect(&self, _fabric: &FabricConfig) -> Result<FakeCluster, ApiError> {
        Ok(self.clone())
    }
}
