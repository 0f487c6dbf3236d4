//! CLI command implementations

pub mod config;
pub mod probe;
pub mod restore;
pub mod save;
pub mod transfer;

pub use config::execute as config;
pub use probe::execute as probe;
pub use restore::execute as restore;
pub use save::execute as save;
