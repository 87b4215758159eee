//! mcpredact_common
//!
//! Ambient plumbing shared by every crate in the proxy: environment-driven
//! startup configuration and the one-time `tracing` subscriber setup. Nothing
//! in here is PII-aware; it is the same kind of boring, load-bearing glue the
//! teacher repo keeps in its `common` crate.

use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("neither UPSTREAM_MCP_COMMAND nor UPSTREAM_MCP_URL is set")]
    MissingUpstreamTarget,
}

/// Which transport the backend handle should use to reach the upstream MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UpstreamTarget {
    Stdio { command: String, args: Vec<String> },
    Http { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub upstream: UpstreamTarget,
    pub compliance_profile: String,
    pub audit_enabled: bool,
    pub comprehend_enabled: bool,
    pub aws_region: String,
    pub audit_log_path: String,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// This is the only place environment variables are read; every other
    /// crate receives an already-resolved `Config`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let command = env::var("UPSTREAM_MCP_COMMAND").ok();
        let url = env::var("UPSTREAM_MCP_URL").ok();

        let upstream = match (command, url) {
            (Some(command), _) => {
                let args = env::var("UPSTREAM_MCP_ARGS").unwrap_or_default();
                let args = args.split_whitespace().map(str::to_string).collect();
                UpstreamTarget::Stdio { command, args }
            }
            (None, Some(url)) => UpstreamTarget::Http { url },
            (None, None) => return Err(ConfigError::MissingUpstreamTarget),
        };

        Ok(Config {
            upstream,
            compliance_profile: env::var("COMPLIANCE_PROFILE").unwrap_or_else(|_| "GDPR".into()),
            audit_enabled: env::var("AUDIT_ENABLED").map(|v| v != "false").unwrap_or(true),
            comprehend_enabled: env::var("COMPREHEND_ENABLED")
                .map(|v| v == "true")
                .unwrap_or(false),
            aws_region: env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".into()),
            audit_log_path: env::var("AUDIT_LOG_PATH")
                .unwrap_or_else(|_| "runtime/logs/audit.jsonl".into()),
        })
    }
}

/// Initialize the global `tracing` subscriber. Writes to stderr so stdout
/// stays clean for MCP stdio framing, and honors `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for k in [
            "UPSTREAM_MCP_COMMAND",
            "UPSTREAM_MCP_URL",
            "UPSTREAM_MCP_ARGS",
            "COMPLIANCE_PROFILE",
            "AUDIT_ENABLED",
            "COMPREHEND_ENABLED",
            "AWS_REGION",
            "AUDIT_LOG_PATH",
        ] {
            env::remove_var(k);
        }
    }

    #[test]
    fn missing_upstream_target_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        assert!(matches!(Config::from_env(), Err(ConfigError::MissingUpstreamTarget)));
    }

    #[test]
    fn stdio_command_parses_whitespace_separated_args() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("UPSTREAM_MCP_COMMAND", "elastic-mcp");
        env::set_var("UPSTREAM_MCP_ARGS", "--index transactions-*");
        let cfg = Config::from_env().unwrap();
        match cfg.upstream {
            UpstreamTarget::Stdio { command, args } => {
                assert_eq!(command, "elastic-mcp");
                assert_eq!(args, vec!["--index", "transactions-*"]);
            }
            UpstreamTarget::Http { .. } => panic!("expected stdio target"),
        }
        assert_eq!(cfg.compliance_profile, "GDPR");
        assert!(cfg.audit_enabled);
        assert!(!cfg.comprehend_enabled);
        clear_env();
    }

    #[test]
    fn audit_disabled_only_on_literal_false() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("UPSTREAM_MCP_URL", "http://localhost:9200");
        env::set_var("AUDIT_ENABLED", "false");
        let cfg = Config::from_env().unwrap();
        assert!(!cfg.audit_enabled);
        clear_env();
    }
}
