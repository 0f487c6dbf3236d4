//! Wiring shared by the restore and save commands

use crate::cache::{format_bytes, LocalStore, RemoteStore};
use crate::compression::{CompressorProbe, Zstd};
use crate::config::Config;
use crate::error::StateResult;
use crate::orchestration::{ContainerRuntime, DockerCli};
use crate::session::RestoredKeyStore;
use crate::transfer::settings::configured_window;
use crate::transfer::{PhaseObserver, TransferPhase, TransferReport, TransferSettings};
use crate::ui::{self, TaskSpinner, UiContext};

/// Collaborators for one CLI transfer run
pub struct TransferContext {
    pub settings: TransferSettings,
    pub runtime: DockerCli,
    pub store: LocalStore,
    pub codec: Zstd,
    pub keys: RestoredKeyStore,
}

/// Validate the configuration and negotiate the compression window
pub async fn prepare(config: &Config, ctx: &UiContext) -> StateResult<TransferContext> {
    // Fail on bad keys or categories before touching the compressor
    let settings = TransferSettings::from_config(config, None)?;
    let codec = Zstd::new(
        &config.compression.program,
        config.compression.level,
        config.compression.threads,
    )?;
    let configured = configured_window(&config.compression)?;

    let mut spinner = TaskSpinner::new(ctx);
    spinner.start(&format!("Checking {}...", config.compression.program));
    let probe = CompressorProbe::new(&config.compression.program, config.compression.auto_install);
    let info = match probe.probe(configured).await {
        Ok(info) => info,
        Err(e) => {
            spinner.stop_error(&format!("{} unavailable", config.compression.program));
            return Err(e);
        }
    };

    match (&info.version, info.window) {
        (Some(version), Some(window)) => spinner.stop(&format!(
            "{} {} (long window {})",
            config.compression.program, version, window
        )),
        (Some(version), None) => {
            spinner.stop(&format!("{} {}", config.compression.program, version))
        }
        (None, _) => spinner.stop_warn(&format!(
            "{} version unknown, long-distance matching disabled",
            config.compression.program
        )),
    }

    let store_root = config
        .cache
        .store_dir
        .clone()
        .unwrap_or_else(LocalStore::default_root);
    let runtime = DockerCli::new(&config.builder.runtime);
    let store = LocalStore::new(store_root);

    ui::key_value(ctx, "Key", settings.key.primary());
    ui::key_value(
        ctx,
        "Builder",
        &format!("{} ({} via {})", settings.builder, settings.container, runtime.runtime_name()),
    );
    ui::key_value(ctx, "Store", &store.store_name());

    Ok(TransferContext {
        settings: TransferSettings {
            window: info.window,
            ..settings
        },
        runtime,
        store,
        codec,
        keys: RestoredKeyStore::from_env(),
    })
}

/// Open a section for each phase the transfer enters
pub fn phase_observer(ctx: &UiContext) -> PhaseObserver {
    let ctx = *ctx;
    Box::new(move |phase| match phase {
        TransferPhase::Idle => {}
        TransferPhase::Quiescing => ui::section(&ctx, "Stopping builder"),
        TransferPhase::Restoring => {
            ui::end_section(&ctx);
            ui::section(&ctx, "Restoring state");
        }
        TransferPhase::Saving => {
            ui::end_section(&ctx);
            ui::section(&ctx, "Saving state");
        }
        TransferPhase::Resuming => {
            ui::end_section(&ctx);
            ui::section(&ctx, "Resuming builder");
        }
        phase if phase.is_terminal() => ui::end_section(&ctx),
        _ => {}
    })
}

/// Print the fields common to every report
pub fn render_report(ctx: &UiContext, report: &TransferReport) {
    if let Some(bytes) = report.archive_bytes {
        ui::key_value(ctx, "Archive", &format_bytes(bytes));
    }
    ui::key_value_status(ctx, "Outcome", &report.outcome.to_string(), report.outcome.is_success());
    if let Some(err) = &report.resume_failure {
        ui::step_error(ctx, &format!("Builder did not resume: {}", err));
    }
}
