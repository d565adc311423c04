//! Consul connection settings

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{ArgAction, Args};

use crate::Error;

/// Default Consul HTTP API address
pub const DEFAULT_CONSUL_ADDRESS: &str = "127.0.0.1:8500";

/// How to reach the Consul HTTP API
#[derive(Args, Clone, Debug, PartialEq, Eq)]
pub struct ConsulConfig {
    /// Address for access to the Consul API
    #[arg(long = "consul-api", default_value = DEFAULT_CONSUL_ADDRESS)]
    pub address: String,

    /// HTTP basic authentication, `username[:password]`
    #[arg(long = "consul-auth", value_name = "USER[:PASSWORD]")]
    pub auth: Option<BasicAuth>,

    /// Use HTTPS to access the Consul API
    #[arg(long = "consul-ssl")]
    pub enable_ssl: bool,

    /// Verify the Consul server certificate
    #[arg(long = "consul-ssl-verify", default_value_t = true, action = ArgAction::Set)]
    pub ssl_verify: bool,

    /// Path to a CA certificate (PEM) used to verify Consul
    #[arg(long = "consul-ca")]
    pub ca_cert_file: Option<PathBuf>,

    /// Path to a client certificate (PEM) for TLS
    #[arg(long = "consul-cert")]
    pub cert_file: Option<PathBuf>,

    /// Path to the client certificate's private key (PEM)
    #[arg(long = "consul-key")]
    pub key_file: Option<PathBuf>,

    /// Consul ACL token
    #[arg(long = "consul-token", env = "CONSUL_HTTP_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Timeout in seconds for each Consul API call (0 = no timeout)
    #[arg(long = "consul-timeout", default_value_t = 0)]
    pub timeout_secs: u64,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_CONSUL_ADDRESS.to_string(),
            auth: None,
            enable_ssl: false,
            ssl_verify: true,
            ca_cert_file: None,
            cert_file: None,
            key_file: None,
            token: None,
            timeout_secs: 0,
        }
    }
}

impl ConsulConfig {
    /// Base URL of the HTTP API. An address that already carries a scheme is
    /// used as-is.
    pub fn base_url(&self) -> String {
        let address = self.address.trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            return address.to_string();
        }
        let scheme = if self.enable_ssl { "https" } else { "http" };
        format!("{scheme}://{address}")
    }

    /// Per-call timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// HTTP basic authentication credentials
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    /// User name
    pub username: String,
    /// Password, empty when none was given
    pub password: String,
}

impl FromStr for BasicAuth {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.is_empty() {
            return Err(Error::config("consul-auth must not be empty"));
        }
        let (username, password) = value.split_once(':').unwrap_or((value, ""));
        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
