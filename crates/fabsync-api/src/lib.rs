// fabsync-api: Async Rust client for Kubernetes-style declarative cluster APIs

pub mod client;
pub mod error;
pub mod resource;
pub mod transport;

pub use client::ClusterClient;
pub use error::Error;
pub use resource::{ObjectMeta, Resource, ResourceType};
pub use transport::{TlsMode, TransportConfig};
