//! Restore command - load builder state from the cache store

use crate::cli::args::RestoreArgs;
use crate::cli::commands::transfer::{phase_observer, prepare, render_report};
use crate::config::Config;
use crate::error::StateResult;
use crate::transfer::{StateTransfer, TransferOutcome};
use crate::ui::{self, UiContext};
use tracing::debug;

/// Execute the restore command
pub async fn execute(args: RestoreArgs, config: &Config) -> StateResult<()> {
    let ctx = UiContext::detect();
    let mut config = config.clone();
    args.apply(&mut config);

    let run = prepare(&config, &ctx).await?;
    debug!(
        "Restoring {} (fallbacks: {:?}) into {}",
        run.settings.key.primary(),
        run.settings.key.fallbacks(),
        run.settings.container
    );

    let transfer = StateTransfer::new(&run.runtime, &run.runtime, &run.store, &run.codec, &run.keys)
        .with_observer(phase_observer(&ctx));
    let report = transfer.restore(&run.settings).await;

    render_report(&ctx, &report);
    match (&report.outcome, &report.key) {
        (TransferOutcome::Success, Some(key)) => {
            ui::key_value(&ctx, "Restored key", key);
            if key != run.settings.key.primary() {
                ui::step_info(&ctx, "Matched a fallback key, save will upload a new entry");
            }
            if report.is_success() {
                ui::outro_success(&ctx, &format!("Restored builder state from {}", key));
            }
        }
        (TransferOutcome::CacheMiss, _) => {
            ui::outro_warn(
                &ctx,
                &format!("No cache entry found for {}", run.settings.key.primary()),
            );
        }
        _ => {}
    }

    report.into_result().map(|_| ())
}
