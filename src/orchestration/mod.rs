//! Container orchestration
//!
//! Byte-stream access to the builder container and buildx lifecycle verbs.

pub mod docker;
pub mod handle;
pub mod runtime;

pub use docker::DockerCli;
pub use handle::ContainerHandle;
pub use runtime::{BuilderControl, ContainerRuntime};
