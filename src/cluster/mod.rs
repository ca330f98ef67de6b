//! # Cluster access
//!
//! Everything chaos needs from Kubernetes goes through [`ClusterGateway`]:
//! list pods, delete or evict one, and attach an event to it. The core never
//! touches `kube` types directly; [`KubeGateway`] projects API objects onto
//! [`PodInfo`] and [`MockGateway`] stands in for a cluster in tests.

pub mod gateway;
pub mod kubernetes;
pub mod mock;

pub use gateway::{
    ClusterGateway, EventKind, GatewayError, GatewayFactory, OwnerRef, PodEvent, PodInfo,
    DELETION_COST_ANNOTATION,
};
pub use kubernetes::{KubeGateway, KubeGatewayFactory};
pub use mock::{GatewayCall, MockGateway, MockGatewayFactory};
