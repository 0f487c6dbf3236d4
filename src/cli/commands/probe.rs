//! Probe command - report compressor version and window support

use crate::cli::args::ProbeArgs;
use crate::compression::{CompressionWindow, CompressorProbe, MIN_LONG_WINDOW_VERSION};
use crate::config::Config;
use crate::error::StateResult;
use crate::transfer::settings::configured_window;
use crate::ui::{self, UiContext};

/// Execute the probe command
pub async fn execute(args: ProbeArgs, config: &Config) -> StateResult<()> {
    let ctx = UiContext::detect();

    let program = args.program.unwrap_or_else(|| config.compression.program.clone());
    let configured = match args.long_window {
        Some(log2) => Some(CompressionWindow::new(log2)?),
        None => configured_window(&config.compression)?,
    };
    let auto_install = config.compression.auto_install && !args.no_install;

    ui::section(&ctx, "Compressor");
    let info = CompressorProbe::new(&program, auto_install).probe(configured).await?;

    ui::key_value(&ctx, "Program", &program);
    match &info.version {
        Some(version) => ui::key_value_status(
            &ctx,
            "Version",
            &version.to_string(),
            *version >= MIN_LONG_WINDOW_VERSION,
        ),
        None => ui::key_value_status(&ctx, "Version", "unknown", false),
    }

    let window = match (configured, info.window) {
        (_, Some(window)) => format!("--long={}", window),
        (Some(_), None) => format!("unsupported (requires {})", MIN_LONG_WINDOW_VERSION),
        (None, None) => "disabled".to_string(),
    };
    let window_ok = info.window.is_some() || configured.is_none();
    ui::key_value_status(&ctx, "Long window", &window, window_ok);
    ui::end_section(&ctx);

    Ok(())
}
