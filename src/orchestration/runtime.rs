//! Container runtime abstraction
//!
//! Two seams are kept separate: [`ContainerRuntime`] moves bytes in and out
//! of a container, [`BuilderControl`] drives the buildx builder lifecycle.
//! Both are implemented by the docker CLI in production and by fakes in tests.

use crate::cache::prune::PruneType;
use crate::error::{StateError, StateResult};
use crate::orchestration::handle::ContainerHandle;
use crate::pipeline::{ByteSink, ByteSource};
use async_trait::async_trait;

/// Byte-stream access to a directory inside a container
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Resolve a handle to exactly one container ID
    async fn resolve(&self, handle: &ContainerHandle) -> StateResult<String>;

    /// Source producing a tar archive of `path` inside `container`
    fn archive_source(&self, container: &str, path: &str) -> ByteSource;

    /// Sink extracting a tar archive into `path` inside `container`.
    ///
    /// Directories contained in the archive are created as needed. `path`
    /// itself must exist, see [`ContainerRuntime::create_directory`].
    fn archive_sink(&self, container: &str, path: &str) -> ByteSink;

    /// Create `path` and its missing parents inside a (possibly stopped) container
    async fn create_directory(&self, container: &str, path: &str) -> StateResult<()>;

    /// Reclassify a failed copy stage, e.g. as a missing container or path
    fn classify_copy_failure(
        &self,
        _container: &str,
        _path: &str,
        error: StateError,
    ) -> StateError {
        error
    }

    /// Get the human-readable runtime name for display
    fn runtime_name(&self) -> &str;
}

/// Lifecycle verbs of a buildx builder
#[async_trait]
pub trait BuilderControl: Send + Sync {
    /// Stop the builder so its state directory is quiescent
    async fn stop(&self, builder: &str) -> StateResult<()>;

    /// Start the builder and wait until it is ready
    async fn bootstrap(&self, builder: &str) -> StateResult<()>;

    /// Force-remove every cache record of one category
    async fn prune(&self, builder: &str, category: PruneType) -> StateResult<()>;

    /// Human-readable disk usage report
    async fn disk_usage(&self, builder: &str) -> StateResult<String>;
}
