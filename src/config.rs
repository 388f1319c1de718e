//! Operator configuration
//!
//! All settings come from command-line flags with environment variable
//! fallbacks, so the same binary works from a shell and from a Deployment.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Args;

use crate::{Error, DEFAULT_OPENFGA_URL};

/// Settings for the `controller` command
#[derive(Args, Clone, Debug)]
pub struct OperatorConfig {
    /// Base URL of the OpenFGA HTTP API
    #[arg(long, env = "OPENFGA_URL", default_value = DEFAULT_OPENFGA_URL)]
    pub openfga_url: String,

    /// Bearer token for the OpenFGA API (preshared key authentication)
    #[arg(long, env = "OPENFGA_API_TOKEN", hide_env_values = true)]
    pub openfga_api_token: Option<String>,

    /// Timeout for a single OpenFGA API request in seconds
    #[arg(long, env = "OPENFGA_REQUEST_TIMEOUT_SECS", default_value = "10")]
    pub request_timeout_secs: u64,

    /// Enable leader election so only one replica reconciles at a time
    #[arg(long, env = "LEADER_ELECT")]
    pub leader_elect: bool,

    /// Namespace holding the leader election Lease
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    pub leader_election_namespace: String,

    /// Identity recorded on the Lease (defaults to the pod hostname)
    #[arg(long, env = "POD_NAME")]
    pub leader_election_identity: Option<String>,

    /// Server-side apply the operator's CRDs before starting controllers
    #[arg(long, env = "INSTALL_CRDS")]
    pub install_crds: bool,

    /// Address the metrics endpoint binds to; "0" disables it
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = ":8080")]
    pub metrics_bind_address: String,

    /// Address the health endpoint binds to
    #[arg(long, env = "HEALTH_PROBE_BIND_ADDRESS", default_value = ":8081")]
    pub health_probe_bind_address: String,
}

impl OperatorConfig {
    /// Request timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Parse the health address, accepting the `:port` shorthand
    pub fn health_addr(&self) -> Result<SocketAddr, Error> {
        parse_bind_address(&self.health_probe_bind_address)
    }

    /// Parse the metrics address; `None` when metrics are disabled
    pub fn metrics_addr(&self) -> Result<Option<SocketAddr>, Error> {
        if self.metrics_bind_address == "0" {
            return Ok(None);
        }
        parse_bind_address(&self.metrics_bind_address).map(Some)
    }

    /// Identity used for leader election
    pub fn identity(&self) -> String {
        self.leader_election_identity
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| format!("openfga-operator-{}", std::process::id()))
    }
}

fn parse_bind_address(addr: &str) -> Result<SocketAddr, Error> {
    let full = if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    };
    full.parse()
        .map_err(|e| Error::validation(format!("invalid bind address '{addr}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: OperatorConfig,
    }

    #[test]
    fn flags_override_defaults() {
        let cli = TestCli::try_parse_from([
            "test",
            "--openfga-url",
            "http://openfga:8080",
            "--request-timeout-secs",
            "3",
            "--leader-elect",
            "--health-probe-bind-address",
            "127.0.0.1:9000",
        ])
        .unwrap();

        assert_eq!(cli.config.openfga_url, "http://openfga:8080");
        assert_eq!(cli.config.request_timeout(), Duration::from_secs(3));
        assert!(cli.config.leader_elect);
        assert_eq!(
            cli.config.health_addr().unwrap(),
            "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn metrics_listen_on_8080_unless_disabled() {
        let cli = TestCli::try_parse_from(["test"]).unwrap();
        assert_eq!(
            cli.config.metrics_addr().unwrap(),
            Some("0.0.0.0:8080".parse::<SocketAddr>().unwrap())
        );

        let cli = TestCli::try_parse_from(["test", "--metrics-bind-address", "0"]).unwrap();
        assert_eq!(cli.config.metrics_addr().unwrap(), None);
    }

    #[test]
    fn port_shorthand_binds_all_interfaces() {
        assert_eq!(
            parse_bind_address(":8081").unwrap(),
            "0.0.0.0:8081".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn invalid_bind_address_is_rejected() {
        let err = parse_bind_address("not-an-address").unwrap_err();
        assert!(err.to_string().contains("invalid bind address"));
    }
}
