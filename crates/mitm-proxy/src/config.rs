//! Configuration loading and validation for the mitm-proxy relay.
//!
//! Values come from `MITM_PROXY_*` environment variables, then command-line
//! flags override individual keys.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use common::DumpFormat;
use config::builder::DefaultState;
use config::ConfigBuilder;
use serde::Deserialize;

use crate::session::{template, RelayConfig};

const ENV_PREFIX: &str = "MITM_PROXY";

/// Largest accepted `chunk_size`; each session allocates one read buffer this big.
const MAX_CHUNK_SIZE: usize = 1 << 20;

/// Command-line overrides. Every flag is optional; unset flags fall back to
/// the environment and then to the defaults.
#[derive(Debug, Default, Parser)]
#[command(
    name = "mitm-proxy",
    version,
    about = "Relay TCP connections to a fixed upstream and dump every chunk to a per-connection file"
)]
pub struct Cli {
    /// Address to listen on.
    #[arg(long)]
    pub listen_addr: Option<String>,

    /// Port to listen on (0 lets the OS pick one).
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Upstream server as `addr:port`; wins over --to-addr/--to-port.
    #[arg(long)]
    pub to: Option<String>,

    /// Upstream server address; replaces any `target` from the environment.
    #[arg(long)]
    pub to_addr: Option<String>,

    /// Upstream server port; replaces any `target` from the environment.
    #[arg(long)]
    pub to_port: Option<u16>,

    /// Dump file name; `{timestamp}` is replaced by the session start time.
    #[arg(long)]
    pub filename_template: Option<String>,

    /// Dump rendering: `escaped` or `hex`.
    #[arg(long)]
    pub dump_format: Option<DumpFormat>,

    /// Largest chunk read from a socket at once.
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Upstream connect timeout in seconds (0 disables).
    #[arg(long)]
    pub connect_timeout_secs: Option<u64>,

    /// Tracing log level.
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Validated relay configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Host or address to bind the listener on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Listener port; `0` means an OS-assigned ephemeral port.
    #[serde(default)]
    pub listen_port: u16,

    /// Upstream as `addr:port`. Takes precedence over `target_addr`/`target_port`
    /// from the same source.
    pub target: Option<String>,

    /// Upstream host, used when `target` is unset.
    pub target_addr: Option<String>,

    /// Upstream port, used when `target` is unset.
    pub target_port: Option<u16>,

    /// Dump path template.
    #[serde(default = "default_filename_template")]
    pub filename_template: String,

    /// Dump record rendering.
    #[serde(default)]
    pub dump_format: DumpFormat,

    /// Largest chunk read from a socket at once.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Upstream connect timeout; `0` disables the timeout.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Tracing log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_listen_addr() -> String {
    "localhost".into()
}
fn default_filename_template() -> String {
    template::DEFAULT_TEMPLATE.into()
}
fn default_chunk_size() -> usize {
    1024
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load configuration from the environment, apply `cli` on top, and validate.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed or the result fails validation.
    pub fn load(cli: Cli) -> Result<Self> {
        let env = config::Config::builder().add_source(config::Environment::with_prefix(ENV_PREFIX));
        Self::layered(env, cli)
    }

    /// Apply `cli` over whatever `base` provides.
    ///
    /// `--to-addr`/`--to-port` without `--to` drop a combined `target` coming
    /// from `base`, since `target` would otherwise win over the split keys.
    fn layered(base: ConfigBuilder<DefaultState>, cli: Cli) -> Result<Self> {
        let int = |v: Option<u64>| v.map(|n| n as i64);
        let mut builder = base;
        if cli.to.is_none() && (cli.to_addr.is_some() || cli.to_port.is_some()) {
            builder = builder.set_override("target", config::Value::new(None, config::ValueKind::Nil))?;
        }
        let cfg = builder
            .set_override_option("listen_addr", cli.listen_addr)?
            .set_override_option("listen_port", int(cli.listen_port.map(u64::from)))?
            .set_override_option("target", cli.to)?
            .set_override_option("target_addr", cli.to_addr)?
            .set_override_option("target_port", int(cli.to_port.map(u64::from)))?
            .set_override_option("filename_template", cli.filename_template)?
            .set_override_option("dump_format", cli.dump_format.map(DumpFormat::as_str))?
            .set_override_option("chunk_size", int(cli.chunk_size.map(|n| n as u64)))?
            .set_override_option("connect_timeout_secs", int(cli.connect_timeout_secs))?
            .set_override_option("log_level", cli.log_level)?
            .build()
            .context("failed to build mitm-proxy configuration")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise mitm-proxy configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// The upstream `(addr, port)`, from `target` if set, otherwise from
    /// `target_addr` and `target_port`.
    pub fn resolve_target(&self) -> Result<(String, u16)> {
        let (addr, port) = match &self.target {
            Some(to) => split_target(to)?,
            None => (
                self.target_addr.clone().unwrap_or_default(),
                self.target_port.unwrap_or_default(),
            ),
        };
        if addr.trim().is_empty() || port == 0 {
            anyhow::bail!("an upstream address and non-zero port are required (TARGET or TARGET_ADDR + TARGET_PORT)");
        }
        Ok((addr, port))
    }

    /// Session settings handed to the session factory.
    pub fn relay_config(&self) -> Result<RelayConfig> {
        let (target_addr, target_port) = self.resolve_target()?;
        Ok(RelayConfig {
            target_addr,
            target_port,
            filename_template: self.filename_template.clone(),
            dump_format: self.dump_format,
            chunk_size: self.chunk_size,
            connect_timeout: (self.connect_timeout_secs > 0)
                .then(|| Duration::from_secs(self.connect_timeout_secs)),
        })
    }

    fn validate(&self) -> Result<()> {
        if self.listen_addr.trim().is_empty() {
            anyhow::bail!("LISTEN_ADDR must not be empty");
        }
        if self.filename_template.trim().is_empty() {
            anyhow::bail!("FILENAME_TEMPLATE must not be empty");
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            anyhow::bail!("CHUNK_SIZE must be between 1 and {MAX_CHUNK_SIZE}");
        }
        self.resolve_target()?;
        Ok(())
    }
}

/// Split `addr:port`, accepting `[v6]:port`.
fn split_target(to: &str) -> Result<(String, u16)> {
    let (addr, port) = to
        .trim()
        .rsplit_once(':')
        .with_context(|| format!("target {to:?} must be given as addr:port"))?;
    let port = port
        .parse::<u16>()
        .with_context(|| format!("target {to:?} has an invalid port"))?;
    let addr = addr.trim_start_matches('[').trim_end_matches(']');
    Ok((addr.to_owned(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config {
            listen_addr: default_listen_addr(),
            listen_port: 0,
            target: None,
            target_addr: Some("127.0.0.1".into()),
            target_port: Some(8080),
            filename_template: default_filename_template(),
            dump_format: DumpFormat::Escaped,
            chunk_size: default_chunk_size(),
            connect_timeout_secs: default_connect_timeout(),
            log_level: default_log_level(),
        }
    }

    #[test]
    fn defaults() {
        assert_eq!(default_listen_addr(), "localhost");
        assert_eq!(default_filename_template(), "packet_dump_{timestamp}.dat");
        assert_eq!(default_chunk_size(), 1024);
        assert_eq!(default_connect_timeout(), 10);
        assert_eq!(default_log_level(), "info");
    }

    #[test]
    fn validate_accepts_valid_config() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_target() {
        let cfg = Config {
            target_addr: None,
            target_port: None,
            ..base()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            target_port: None,
            ..base()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_listen_addr_and_template() {
        let cfg = Config {
            listen_addr: " ".into(),
            ..base()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            filename_template: "".into(),
            ..base()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_chunk_size() {
        let cfg = Config {
            chunk_size: 0,
            ..base()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_oversized_chunk_size() {
        let cfg = Config {
            chunk_size: MAX_CHUNK_SIZE + 1,
            ..base()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            chunk_size: MAX_CHUNK_SIZE,
            ..base()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn combined_target_wins() {
        let cfg = Config {
            target: Some("example.com:443".into()),
            ..base()
        };
        assert_eq!(cfg.resolve_target().unwrap(), ("example.com".into(), 443));
    }

    #[test]
    fn combined_target_requires_port() {
        let cfg = Config {
            target: Some("example.com".into()),
            ..base()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            target: Some("example.com:http".into()),
            ..base()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn combined_target_accepts_bracketed_ipv6() {
        assert_eq!(split_target("[::1]:9000").unwrap(), ("::1".into(), 9000));
    }

    #[test]
    fn relay_config_maps_timeout() {
        let relay = base().relay_config().unwrap();
        assert_eq!(relay.target_addr, "127.0.0.1");
        assert_eq!(relay.target_port, 8080);
        assert_eq!(relay.connect_timeout, Some(Duration::from_secs(10)));

        let cfg = Config {
            connect_timeout_secs: 0,
            ..base()
        };
        assert_eq!(cfg.relay_config().unwrap().connect_timeout, None);
    }

    #[test]
    fn cli_overrides_are_applied() {
        let cli = Cli::parse_from([
            "mitm-proxy",
            "--listen-port",
            "4000",
            "--to",
            "10.0.0.5:5432",
            "--dump-format",
            "hex",
            "--filename-template",
            "pg_{timestamp}.log",
        ]);
        let cfg = Config::load(cli).unwrap();
        assert_eq!(cfg.listen_port, 4000);
        assert_eq!(cfg.dump_format, DumpFormat::Hex);
        assert_eq!(cfg.filename_template, "pg_{timestamp}.log");
        assert_eq!(cfg.resolve_target().unwrap(), ("10.0.0.5".into(), 5432));
    }

    #[test]
    fn cli_split_target_beats_lower_layer_combined_target() {
        let base = config::Config::builder()
            .set_default("target", "env.example:1")
            .unwrap();
        let cli = Cli::parse_from(["mitm-proxy", "--to-addr", "10.1.1.1", "--to-port", "6379"]);
        let cfg = Config::layered(base, cli).unwrap();
        assert_eq!(cfg.target, None);
        assert_eq!(cfg.resolve_target().unwrap(), ("10.1.1.1".into(), 6379));
    }

    #[test]
    fn cli_port_alone_merges_with_lower_layer_addr() {
        let base = config::Config::builder()
            .set_default("target", "env.example:1")
            .unwrap()
            .set_default("target_addr", "db.internal")
            .unwrap();
        let cli = Cli::parse_from(["mitm-proxy", "--to-port", "5432"]);
        let cfg = Config::layered(base, cli).unwrap();
        assert_eq!(cfg.resolve_target().unwrap(), ("db.internal".into(), 5432));
    }

    #[test]
    fn lower_layer_combined_target_kept_without_cli_target_flags() {
        let base = config::Config::builder()
            .set_default("target", "env.example:8080")
            .unwrap();
        let cfg = Config::layered(base, Cli::default()).unwrap();
        assert_eq!(cfg.resolve_target().unwrap(), ("env.example".into(), 8080));
    }

    #[test]
    fn load_without_target_fails() {
        assert!(Config::load(Cli::default()).is_err());
    }
}
