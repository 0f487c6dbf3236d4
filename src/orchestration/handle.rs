//! Container naming for buildx builders

use std::fmt;

/// Name of the container backing a docker-container buildx builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    name: String,
}

impl ContainerHandle {
    /// Handle for an explicitly named container
    pub fn explicit(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Handle derived from the builder name (`buildx_buildkit_<builder>0`)
    pub fn for_builder(builder: &str) -> Self {
        Self {
            name: format!("buildx_buildkit_{}0", builder),
        }
    }

    /// Use the override when given, otherwise derive from the builder
    pub fn new(builder: &str, container_override: Option<&str>) -> Self {
        match container_override {
            Some(name) if !name.trim().is_empty() => Self::explicit(name.trim()),
            _ => Self::for_builder(builder),
        }
    }

    /// Container name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
