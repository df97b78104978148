//! Environment-derived configuration.
//!
//! Two knobs come from the environment rather than flags: the default link
//! pattern and the browser command. Flags always win over the environment.

/// Resolved environment configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Default extraction pattern (`TMPMAIL_LINK_PATTERN`).
    pub link_pattern: Option<String>,
    /// Browser command (`PRIVATE_BROWSER`, falling back to `BROWSER`).
    pub browser: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable lookup. Used by tests to
    /// avoid touching the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let nonempty = |value: String| {
            let trimmed = value.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        };

        Self {
            link_pattern: lookup("TMPMAIL_LINK_PATTERN").and_then(nonempty),
            browser: lookup("PRIVATE_BROWSER")
                .and_then(nonempty)
                .or_else(|| lookup("BROWSER").and_then(nonempty)),
        }
    }
}
