use bon::Builder;

/// Runtime options of a program instance.
#[derive(Debug, Clone, Builder)]
pub struct ProgramConfig {
    /// Give every state set a private snapshot of the channel variables, refreshed only at
    /// wakeup points.
    #[builder(default)]
    pub safe_mode: bool,

    /// Block startup until every process variable has connected.
    #[builder(default = true)]
    pub wait_for_connect: bool,

    /// Stack size for spawned state set threads. Uses the platform default if not set.
    pub stack_size: Option<usize>,

    /// Base name for state set threads; additional state sets append `_<n>`.
    /// Defaults to the name of the thread running the program, then the program name.
    pub thread_name: Option<String>,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProgramConfig::default();
        assert!(!config.safe_mode);
        assert!(config.wait_for_connect);
        assert!(config.stack_size.is_none());
        assert!(config.thread_name.is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let config = ProgramConfig::builder()
            .safe_mode(true)
            .wait_for_connect(false)
            .stack_size(256 * 1024)
            .thread_name("tank".to_string())
            .build();

        assert!(config.safe_mode);
        assert!(!config.wait_for_connect);
        assert_eq!(config.stack_size, Some(256 * 1024));
        assert_eq!(config.thread_name.as_deref(), Some("tank"));
    }
}
