//! Cross-process session state

pub mod state;

pub use state::{append_output, RestoredKeyRecord, RestoredKeyStore, RESTORED_KEY_OUTPUT};
