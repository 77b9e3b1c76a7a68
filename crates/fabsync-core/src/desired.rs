// ── Desired-state source ──
//
// The host's domain layer: turns a fabric record into the set of objects
// that should exist remotely. Injected into the engine.

use crate::error::CoreError;
use crate::model::{DesiredResource, FabricConfig};

pub trait DesiredStateSource: Send + Sync + 'static {
    fn desired_resources(&self, fabric: &FabricConfig) -> Result<Vec<DesiredResource>, CoreError>;
}

impl<F> DesiredStateSource for F
where
    F: Fn(&FabricConfig) -> Result<Vec<DesiredResource>, CoreError> + Send + Sync + 'static,
{
    fn desired_resources(&self, fabric: &FabricConfig) -> Result<Vec<DesiredResource>, CoreError> {
        self(fabric)
    }
}
