//! UI context for detecting interactive vs CI environments

use std::io::IsTerminal;

/// UI context that determines output behavior
#[derive(Debug, Clone, Copy)]
pub struct UiContext {
    /// Whether running in an interactive terminal
    interactive: bool,
    /// Whether running as a GitHub Actions step
    github_actions: bool,
}

impl UiContext {
    /// Detect the current environment
    pub fn detect() -> Self {
        Self {
            interactive: Self::detect_interactive(),
            github_actions: Self::env_is_true("GITHUB_ACTIONS"),
        }
    }

    /// Create a non-interactive context (for testing or explicit CI mode)
    pub fn non_interactive() -> Self {
        Self {
            interactive: false,
            github_actions: false,
        }
    }

    /// Force GitHub Actions log commands on or off
    pub fn with_github_actions(mut self, enabled: bool) -> Self {
        self.github_actions = enabled;
        self
    }

    /// Check if we're in an interactive terminal
    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Check if GitHub Actions log commands should be emitted
    pub fn is_github_actions(&self) -> bool {
        self.github_actions
    }

    /// Check if we should use fancy output (spinners, colors)
    pub fn use_fancy_output(&self) -> bool {
        self.interactive
    }

    fn env_is_true(var: &str) -> bool {
        std::env::var(var).map(|v| v == "true").unwrap_or(false)
    }

    /// Detect if running in an interactive environment
    fn detect_interactive() -> bool {
        // Not interactive if stdout is not a TTY
        if !std::io::stdout().is_terminal() {
            return false;
        }

        // Check for CI environment variables
        if std::env::var("CI").is_ok() {
            return false;
        }

        // Common CI environment indicators
        let ci_vars = [
            "GITHUB_ACTIONS",
            "GITLAB_CI",
            "CIRCLECI",
            "TRAVIS",
            "JENKINS_URL",
            "BUILDKITE",
            "TEAMCITY_VERSION",
            "TF_BUILD",
        ];

        for var in ci_vars {
            if std::env::var(var).is_ok() {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn non_interactive_context() {
        let ctx = UiContext::non_interactive();
        assert!(!ctx.is_interactive());
        assert!(!ctx.is_github_actions());
        assert!(!ctx.use_fancy_output());
    }

    #[test]
    fn with_github_actions() {
        let ctx = UiContext::non_interactive().with_github_actions(true);
        assert!(ctx.is_github_actions());
    }

    #[test]
    #[serial]
    fn detect_github_actions() {
        let previous = std::env::var("GITHUB_ACTIONS").ok();

        std::env::set_var("GITHUB_ACTIONS", "true");
        let ctx = UiContext::detect();
        assert!(ctx.is_github_actions());
        assert!(!ctx.is_interactive());

        match previous {
            Some(v) => std::env::set_var("GITHUB_ACTIONS", v),
            None => std::env::remove_var("GITHUB_ACTIONS"),
        }
    }
}
