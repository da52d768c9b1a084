//! # Global runtime configuration.
//!
//! [`Config`] defines the supervisor's behavior: which worker executable to
//! launch, how shards are grouped onto processes, the termination grace
//! period, the fleet start stagger, and the reactor event-loop pacing.
//!
//! The value is built once at startup — either literally or from the
//! environment via [`Config::from_env`] — and handed to the fleet by value.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use shardvisor::Config;
//!
//! let mut cfg = Config::default();
//! cfg.shards_per_process = 4;
//! cfg.grace = Duration::from_secs(10);
//!
//! assert_eq!(cfg.shards_per_process, 4);
//! ```

use std::env;
use std::time::Duration;

use crate::error::ConfigError;

/// Global configuration for the fleet and its reactors.
#[derive(Clone, Debug)]
pub struct Config {
    /// Path of the worker executable to supervise.
    pub executable: String,
    /// Fixed argument list passed to every worker.
    pub args: Vec<String>,
    /// Bot token used both for gateway planning and by the workers.
    pub token: String,
    /// Explicit shard ids to distribute; `None` derives them from the gateway.
    pub shard_ids: Option<Vec<u32>>,
    /// How many shards each worker process serves (0 = provider default).
    pub shards_per_process: usize,
    /// Wait after a termination signal before escalating or giving up.
    pub grace: Duration,
    /// Delay between consecutive reactor starts.
    pub stagger: Duration,
    /// Pause between handled inputs in each reactor loop.
    pub throttle: Duration,
    /// Capacity of each reactor's inbound event channel.
    pub event_buffer: usize,
    /// Capacity of the shared response and status listener channels.
    pub listener_buffer: usize,
}

impl Default for Config {
    /// Mirrors the production deployment defaults:
    /// - `executable = /usr/local/bin/python3`, `args = ["__main__.py"]`
    /// - `shards_per_process = 3`
    /// - `grace = 60s`, `stagger = 5s`, `throttle = 5s`
    /// - `event_buffer = 5`, `listener_buffer = 1000`
    fn default() -> Self {
        Self {
            executable: "/usr/local/bin/python3".to_string(),
            args: vec!["__main__.py".to_string()],
            token: String::new(),
            shard_ids: None,
            shards_per_process: 3,
            grace: Duration::from_secs(60),
            stagger: Duration::from_secs(5),
            throttle: Duration::from_secs(5),
            event_buffer: 5,
            listener_buffer: 1000,
        }
    }
}

impl Config {
    /// Reads configuration from the process environment.
    ///
    /// `DISCORD_TOKEN` is required. `DISCORD_SHARD_IDS` (a JSON array such
    /// as `[0,1,2]`), `DISCORD_SHARDS_PER_PROCESS`, `WORKER_EXECUTABLE`,
    /// and `WORKER_ARGS` (whitespace-separated) override the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        cfg.token = env::var("DISCORD_TOKEN").map_err(|_| ConfigError::Missing("DISCORD_TOKEN"))?;
        if cfg.token.is_empty() {
            return Err(ConfigError::Missing("DISCORD_TOKEN"));
        }

        if let Ok(raw) = env::var("DISCORD_SHARD_IDS") {
            cfg.shard_ids = Some(parse_shard_ids(&raw)?);
        }

        if let Ok(raw) = env::var("DISCORD_SHARDS_PER_PROCESS") {
            cfg.shards_per_process =
                raw.parse()
                    .map_err(|_| ConfigError::Invalid {
                        var: "DISCORD_SHARDS_PER_PROCESS",
                        reason: format!("not an integer: {raw:?}"),
                    })?;
        }

        if let Ok(raw) = env::var("WORKER_EXECUTABLE") {
            cfg.executable = raw;
        }

        if let Ok(raw) = env::var("WORKER_ARGS") {
            cfg.args = raw.split_whitespace().map(str::to_string).collect();
        }

        Ok(cfg)
    }
}

fn parse_shard_ids(raw: &str) -> Result<Vec<u32>, ConfigError> {
    serde_json::from_str(raw).map_err(|cause| ConfigError::Invalid {
        var: "DISCORD_SHARD_IDS",
        reason: cause.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shard_ids_json_list() {
        assert_eq!(parse_shard_ids("[0,1,2]").unwrap(), vec![0, 1, 2]);
        assert_eq!(parse_shard_ids("[]").unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn test_parse_shard_ids_rejects_garbage() {
        assert!(parse_shard_ids("0,1,2").is_err());
        assert!(parse_shard_ids("[-1]").is_err());
    }

    #[test]
    fn test_from_env_requires_token() {
        // Only this test touches these variables; tests in this crate do
        // not otherwise read the environment.
        env::remove_var("DISCORD_TOKEN");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("DISCORD_TOKEN"))
        ));

        env::set_var("DISCORD_TOKEN", "token-under-test");
        env::set_var("DISCORD_SHARDS_PER_PROCESS", "7");
        env::set_var("WORKER_ARGS", "-u __main__.py");
        let cfg = Config::from_env().expect("config");
        env::remove_var("DISCORD_TOKEN");
        env::remove_var("DISCORD_SHARDS_PER_PROCESS");
        env::remove_var("WORKER_ARGS");

        assert_eq!(cfg.token, "token-under-test");
        assert_eq!(cfg.shards_per_process, 7);
        assert_eq!(cfg.args, vec!["-u".to_string(), "__main__.py".to_string()]);
    }
}
