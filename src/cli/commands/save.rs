//! Save command - store builder state under the primary key

use crate::cli::args::SaveArgs;
use crate::cli::commands::transfer::{phase_observer, prepare, render_report};
use crate::config::Config;
use crate::error::StateResult;
use crate::transfer::StateTransfer;
use crate::ui::{self, UiContext};

/// Execute the save command
pub async fn execute(args: SaveArgs, config: &Config) -> StateResult<()> {
    let ctx = UiContext::detect();
    let mut config = config.clone();
    args.apply(&mut config);

    let mut run = prepare(&config, &ctx).await?;
    run.settings = run.settings.with_restored_key(args.restored_key.clone());

    let transfer = StateTransfer::new(&run.runtime, &run.runtime, &run.store, &run.codec, &run.keys)
        .with_observer(phase_observer(&ctx));
    let report = transfer.save(&run.settings).await;

    if let Some(prune) = &report.prune {
        for category in &prune.pruned {
            if !prune.failures.iter().any(|f| f.category == *category) {
                ui::step_ok(&ctx, &format!("Pruned {}", category));
            }
        }
        for failure in &prune.failures {
            ui::step_warn(
                &ctx,
                &format!("Pruning {} failed: {}", failure.category, failure.reason),
            );
        }
    }
    render_report(&ctx, &report);

    let key = run.settings.key.primary();
    if report.skipped {
        ui::outro_success(&ctx, &format!("State was restored from {}, nothing to save", key));
    } else if report.is_success() {
        ui::outro_success(&ctx, &format!("Saved builder state as {}", key));
    }

    report.into_result().map(|_| ())
}
