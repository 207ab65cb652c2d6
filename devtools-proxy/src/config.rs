//! Configuration types and CLI/environment parsing for the proxy.
//!
//! [`ProxyConfig`] is the raw `clap` surface; [`RuntimeConfig`] is the derived
//! form every component works with (deduplicated ports, effective client
//! capacity, the shared [`IdCodec`]). The optional backends in
//! [`FeatureFlags`] are read from the environment separately because they must
//! be known before the tokio runtime exists.

use std::collections::HashSet;
use std::num::NonZeroU16;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;

use crate::id_codec::IdCodec;

/// Command-line and environment configuration.
#[derive(Parser, Debug)]
#[clap(about = "Proxy that multiplexes several DevTools clients onto one browser")]
pub struct ProxyConfig {
    /// Proxy bind addresses; every host is bound on every port.
    #[clap(
        long = "host",
        env = "DEVTOOLS_PROXY_HOST",
        default_value = "127.0.0.1"
    )]
    pub hosts: Vec<String>,

    /// Proxy bind ports; duplicates are ignored.
    #[clap(long = "port", env = "DEVTOOLS_PROXY_PORT", default_value = "9222")]
    pub ports: Vec<u16>,

    /// Host of the browser the proxy forwards to.
    #[clap(
        long,
        env = "DEVTOOLS_PROXY_CHROME_HOST",
        default_value = "127.0.0.1"
    )]
    pub chrome_host: String,

    /// Remote-debugging port of the browser.
    #[clap(long, env = "DEVTOOLS_PROXY_CHROME_PORT", default_value = "12222")]
    pub chrome_port: u16,

    /// Max concurrent inspector clients per page; rounded up to a power of
    /// two.
    #[clap(long, env = "DEVTOOLS_PROXY_MAX_CLIENTS", default_value = "2")]
    pub max_clients: NonZeroU16,

    /// Enable verbose diagnostics.
    #[clap(long, env = "DEVTOOLS_PROXY_DEBUG")]
    pub debug: bool,
}

/// Optional backends selected through the environment.
///
/// Both flags affect performance only and are reported by `/status.json`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FeatureFlags {
    /// Parse WebSocket frames with `simd-json` instead of `serde_json`.
    pub simd_json: bool,
    /// Run the multi-threaded tokio runtime instead of the single-threaded
    /// one.
    pub multi_thread: bool,
}

impl FeatureFlags {
    /// Environment variable selecting the alternative JSON parser.
    pub const SIMD_JSON_ENV: &str = "DEVTOOLS_PROXY_SIMD_JSON";
    /// Environment variable selecting the multi-threaded runtime.
    pub const MULTI_THREAD_ENV: &str = "DEVTOOLS_PROXY_MULTI_THREAD";

    /// Reads both flags from the environment (case-insensitive `true`).
    ///
    /// The JSON flag is only honored when the crate was built with the
    /// `simd-json` cargo feature; without it the flag reads as inactive.
    pub fn from_env() -> Self {
        Self {
            simd_json: cfg!(feature = "simd-json") && env_flag(Self::SIMD_JSON_ENV),
            multi_thread: env_flag(Self::MULTI_THREAD_ENV),
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|value| value.eq_ignore_ascii_case("true"))
}

/// Fully derived configuration shared by every component.
#[derive(Debug)]
pub struct RuntimeConfig {
    /// Proxy bind addresses.
    pub proxy_hosts: Vec<String>,
    /// Deduplicated proxy bind ports, in first-occurrence order.
    pub proxy_ports: Vec<u16>,
    /// Upstream browser host.
    pub chrome_host: String,
    /// Upstream browser port.
    pub chrome_port: u16,
    /// Effective per-page client capacity (a power of two).
    pub max_clients: usize,
    /// Verbose diagnostics flag.
    pub debug: bool,
    /// Active optional backends.
    pub internal: FeatureFlags,
    /// Shared id codec; parameters fixed at startup.
    pub codec: IdCodec,
}

impl RuntimeConfig {
    /// Derives the runtime configuration from the parsed CLI and env flags.
    pub fn new(config: ProxyConfig, internal: FeatureFlags) -> Self {
        let codec = IdCodec::new(usize::from(config.max_clients.get()));
        Self {
            proxy_hosts: config.hosts,
            proxy_ports: dedup_ports(config.ports),
            chrome_host: config.chrome_host,
            chrome_port: config.chrome_port,
            max_clients: codec.max_clients(),
            debug: config.debug,
            internal,
            codec,
        }
    }

    /// Convenience wrapper for callers that share the config across tasks.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

fn dedup_ports(ports: Vec<u16>) -> Vec<u16> {
    let mut seen = HashSet::new();
    ports.into_iter().filter(|port| seen.insert(*port)).collect()
}

#[cfg(test)]
mod tests {
    use clap::Parser as _;

    use super::*;

    #[test]
    fn ports_deduplicate_in_first_occurrence_order() {
        assert_eq!(
            dedup_ports(vec![9222, 9333, 9222, 9444, 9333]),
            vec![9222, 9333, 9444]
        );
    }

    #[test]
    fn defaults_match_chrome_conventions() {
        let config = ProxyConfig::parse_from(["devtools-proxy"]);
        assert_eq!(config.hosts, vec!["127.0.0.1"]);
        assert_eq!(config.ports, vec![9222]);
        assert_eq!(config.chrome_host, "127.0.0.1");
        assert_eq!(config.chrome_port, 12222);
        assert_eq!(config.max_clients.get(), 2);
        assert!(!config.debug);
    }

    #[test]
    fn repeated_host_and_port_flags_accumulate() {
        let config = ProxyConfig::parse_from([
            "devtools-proxy",
            "--host",
            "127.0.0.1",
            "--host",
            "0.0.0.0",
            "--port",
            "9222",
            "--port",
            "9322",
        ]);
        assert_eq!(config.hosts, vec!["127.0.0.1", "0.0.0.0"]);
        assert_eq!(config.ports, vec![9222, 9322]);
    }

    #[test]
    fn effective_capacity_rounds_up_to_a_power_of_two() {
        let config = ProxyConfig::parse_from(["devtools-proxy", "--max-clients", "3"]);
        let runtime = RuntimeConfig::new(config, FeatureFlags::default());
        assert_eq!(runtime.max_clients, 4);
        assert_eq!(runtime.codec.max_clients(), 4);
    }
}
