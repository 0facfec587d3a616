//! Relay server configuration, read from the environment.

pub const DEFAULT_PORT: u16 = 8081;
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// TCP port the relay listens on.
    pub port: u16,
    /// Capacity of each connection's outbound frame queue.
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT, queue_capacity: DEFAULT_QUEUE_CAPACITY }
    }
}

impl ServerConfig {
    /// Build config from process environment variables.
    ///
    /// - `SIGNALING_PORT`: listening port (default 8081)
    /// - `RELAY_QUEUE_CAPACITY`: per-connection outbound queue size (default 256)
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Unset or empty keys fall back
    /// to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let port = parse_var(&lookup, "SIGNALING_PORT", defaults.port)?;
        let queue_capacity = parse_var(&lookup, "RELAY_QUEUE_CAPACITY", defaults.queue_capacity)?;
        if queue_capacity == 0 {
            return Err(ConfigError::Invalid { var: "RELAY_QUEUE_CAPACITY", value: "0".into() });
        }
        Ok(Self { port, queue_capacity })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match lookup(var).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
