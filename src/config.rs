//! Command-line configuration and Kubernetes client construction

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use http::Uri;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::info;

use crate::consul::ConsulConfig;
use crate::watch::DEFAULT_RESYNC_PERIOD;
use crate::Error;

/// Default connection timeout for Kubernetes API clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default read timeout for Kubernetes API clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// kube2consul - register Kubernetes headless services into Consul
#[derive(Parser, Debug)]
#[command(name = "kube2consul", version, about, long_about = None)]
pub struct Cli {
    /// Consul connection settings
    #[command(flatten)]
    pub consul: ConsulConfig,

    /// URL to reach the Kubernetes master; environment variables are expanded
    #[arg(long = "kube-master", value_parser = parse_kube_master)]
    pub kube_master: Option<Uri>,

    /// Path to a kubeconfig file for access to the Kubernetes master
    #[arg(long = "kube-config")]
    pub kube_config: Option<PathBuf>,

    /// Seconds between full resyncs of watched resources
    #[arg(
        long = "resync-period",
        default_value_t = DEFAULT_RESYNC_PERIOD.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub resync_period_secs: u64,
}

impl Cli {
    /// Resync period as a duration
    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }
}

/// Parse `--kube-master`, expanding `$VAR` and `${VAR}` from the environment
pub fn parse_kube_master(value: &str) -> Result<Uri, Error> {
    validate_kube_master(&expand_env(value, |name| std::env::var(name).ok()))
}

fn validate_kube_master(value: &str) -> Result<Uri, Error> {
    let uri: Uri = value
        .parse()
        .map_err(|e| Error::config(format!("failed to parse kube-master url {value:?}: {e}")))?;

    let host = uri.authority().map(|a| a.as_str()).unwrap_or_default();
    if uri.scheme().is_none() || host.is_empty() || host == ":" {
        return Err(Error::config(format!(
            "invalid kube-master url {value:?}: scheme and host are required"
        )));
    }

    Ok(uri)
}

/// Replace `$NAME` and `${NAME}` with values from `lookup`; unset names
/// expand to the empty string. A `$` not followed by a name is kept.
pub fn expand_env<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let is_name_char = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => {
                    out.push_str(&lookup(&braced[..end]).unwrap_or_default());
                    rest = &braced[end + 1..];
                }
                None => {
                    // Unterminated: drop the rest
                    rest = "";
                }
            }
            continue;
        }

        let len = after.find(|c: char| !is_name_char(c)).unwrap_or(after.len());
        if len == 0 {
            out.push('$');
        } else {
            out.push_str(&lookup(&after[..len]).unwrap_or_default());
        }
        rest = &after[len..];
    }

    out.push_str(rest);
    out
}

/// Create a Kubernetes client
///
/// - only `master`: talk to that URL directly
/// - `kubeconfig`: load it, overriding the cluster URL with `master` if given
/// - neither: infer (in-cluster, then the default kubeconfig)
pub async fn create_kube_client(
    master: Option<&Uri>,
    kubeconfig: Option<&Path>,
) -> Result<Client, Error> {
    let mut config = match (master, kubeconfig) {
        (Some(master), None) => Config::new(master.clone()),
        (master, Some(path)) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| Error::config(format!("failed to read kubeconfig: {}", e)))?;
            let mut config =
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?;
            if let Some(master) = master {
                config.cluster_url = master.clone();
            }
            config
        }
        (None, None) => Config::infer()
            .await
            .map_err(|e| Error::config(format!("failed to infer config: {}", e)))?,
    };

    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    info!(master = %config.cluster_url, "Using Kubernetes master");

    Client::try_from(config)
        .map_err(|e| Error::config(format!("failed to create client: {}", e)))
}
