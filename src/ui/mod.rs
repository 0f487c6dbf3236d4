//! UI module for consistent CLI output
//!
//! Fancy output (colors, spinners) in interactive terminals, plain tagged
//! lines in CI, and log groups when running under GitHub Actions.
//!
//! # Example
//!
//! ```rust,ignore
//! use buildkit_state::ui::{self, UiContext, TaskSpinner};
//!
//! let ctx = UiContext::detect();
//!
//! ui::section(&ctx, "Restore");
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Restoring cache...");
//! // ... do work ...
//! spinner.stop("Restored build-41");
//! ui::end_section(&ctx);
//! ```

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{
    end_section, key_value, key_value_status, outro_success, outro_warn, section, step_error,
    step_info, step_ok, step_ok_detail, step_warn,
};
pub use progress::TaskSpinner;
