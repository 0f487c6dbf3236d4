//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{StateError, StateResult};
use crate::ui::{self, UiContext};

/// Keys accepted by `config set`
const VALID_KEYS: &[&str] = &[
    "general.log_format",
    "builder.name",
    "builder.container",
    "builder.runtime",
    "builder.state_dir",
    "builder.restore_dir",
    "builder.resume",
    "cache.key",
    "cache.restore_keys",
    "cache.rewrite",
    "cache.store_dir",
    "cache.archive_path",
    "prune.keep",
    "compression.program",
    "compression.level",
    "compression.threads",
    "compression.long_window",
    "compression.auto_install",
];

/// Execute the config command
pub async fn execute(
    args: ConfigArgs,
    manager: &ConfigManager,
    config: &Config,
) -> StateResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => show_path(manager),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => set_value(manager, config, &key, &value).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> StateResult<()> {
    let toml = toml::to_string_pretty(config)?;
    println!("{}", toml);
    Ok(())
}

fn show_path(manager: &ConfigManager) {
    println!("{}", manager.path().display());
}

async fn init_config(manager: &ConfigManager, force: bool) -> StateResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn(
            &ctx,
            &format!("Config already exists at {} (use --force to overwrite)", path.display()),
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok_detail(&ctx, "Configuration initialized", &path.display().to_string());

    Ok(())
}

async fn set_value(
    manager: &ConfigManager,
    config: &Config,
    key: &str,
    value: &str,
) -> StateResult<()> {
    let ctx = UiContext::detect();
    let mut config = config.clone();
    apply_value(&mut config, key, value)?;

    manager.save(&config).await?;
    ui::step_ok(&ctx, &format!("Set {} = {}", key, value));

    Ok(())
}

/// Set a dot-separated key on a configuration
pub fn apply_value(config: &mut Config, key: &str, value: &str) -> StateResult<()> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["general", "log_format"] => {
            config.general.log_format = match value {
                "text" | "json" => value.to_string(),
                _ => return Err(invalid(key, "expected text or json")),
            }
        }

        ["builder", "name"] => config.builder.name = value.to_string(),
        ["builder", "container"] => config.builder.container = optional(value),
        ["builder", "runtime"] => config.builder.runtime = value.to_string(),
        ["builder", "state_dir"] => config.builder.state_dir = value.to_string(),
        ["builder", "restore_dir"] => config.builder.restore_dir = value.to_string(),
        ["builder", "resume"] => config.builder.resume = parse_bool(key, value)?,

        ["cache", "key"] => config.cache.key = optional(value),
        ["cache", "restore_keys"] => config.cache.restore_keys = parse_list(value),
        ["cache", "rewrite"] => config.cache.rewrite = parse_bool(key, value)?,
        ["cache", "store_dir"] => config.cache.store_dir = optional(value).map(Into::into),
        ["cache", "archive_path"] => config.cache.archive_path = optional(value).map(Into::into),

        ["prune", "keep"] => config.prune.keep = parse_list(value),

        ["compression", "program"] => config.compression.program = value.to_string(),
        ["compression", "level"] => config.compression.level = parse_number(key, value)?,
        ["compression", "threads"] => config.compression.threads = parse_number(key, value)?,
        ["compression", "long_window"] => {
            config.compression.long_window = match optional(value) {
                Some(v) => Some(parse_number(key, &v)?),
                None => None,
            }
        }
        ["compression", "auto_install"] => {
            config.compression.auto_install = parse_bool(key, value)?
        }

        _ => return Err(StateError::UnknownConfigKey(key.to_string())),
    }

    Ok(())
}

/// All keys `config set` accepts
pub fn valid_keys() -> &'static [&'static str] {
    VALID_KEYS
}

fn invalid(key: &str, reason: &str) -> StateError {
    StateError::InvalidConfigValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// Empty or "none" clears an optional value
fn optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_bool(key: &str, value: &str) -> StateResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(invalid(key, "expected true or false")),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> StateResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(key, &format!("'{}' is not a valid number", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn apply_known_keys() {
        let mut config = Config::default();

        apply_value(&mut config, "builder.name", "ci").unwrap();
        apply_value(&mut config, "prune.keep", "regular, frontend,").unwrap();
        apply_value(&mut config, "compression.level", "3").unwrap();
        apply_value(&mut config, "compression.long_window", "none").unwrap();
        apply_value(&mut config, "builder.resume", "no").unwrap();
        apply_value(&mut config, "cache.store_dir", "/mnt/cache").unwrap();

        assert_eq!(config.builder.name, "ci");
        assert_eq!(config.prune.keep, ["regular", "frontend"]);
        assert_eq!(config.compression.level, 3);
        assert_eq!(config.compression.long_window, None);
        assert!(!config.builder.resume);
        assert_eq!(config.cache.store_dir, Some("/mnt/cache".into()));
    }

    #[test]
    fn every_listed_key_is_settable() {
        for key in valid_keys() {
            let mut config = Config::default();
            let value = if key.ends_with("log_format") {
                "json"
            } else if ["resume", "rewrite", "auto_install"].iter().any(|s| key.ends_with(s)) {
                "true"
            } else if key.starts_with("compression.") && key != &"compression.program" {
                "12"
            } else {
                "value"
            };
            assert!(apply_value(&mut config, key, value).is_ok(), "{}", key);
        }
    }

    #[test]
    fn rejects_unknown_key_and_bad_values() {
        let mut config = Config::default();
        assert!(matches!(
            apply_value(&mut config, "vm.name", "x"),
            Err(StateError::UnknownConfigKey(_))
        ));
        assert!(matches!(
            apply_value(&mut config, "compression.level", "high"),
            Err(StateError::InvalidConfigValue { .. })
        ));
        assert!(apply_value(&mut config, "general.log_format", "xml").is_err());
    }

    #[tokio::test]
    async fn set_value_persists() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp.path().join("config.toml"));

        set_value(&manager, &Config::default(), "cache.key", "build-1")
            .await
            .unwrap();

        let loaded = manager.load().await.unwrap();
        assert_eq!(loaded.cache.key.as_deref(), Some("build-1"));
    }
}
