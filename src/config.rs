//! Settings read from the process environment.

use std::time::Duration;

use crate::error::{Error, Result};

pub const DOCKER_HOST: &str = "DOCKER_HOST";
pub const HOST_OVERRIDE: &str = "TESTCONTAINERS_HOST_OVERRIDE";
pub const STARTUP_TIMEOUT: &str = "TESTCONTAINERS_STARTUP_TIMEOUT";

pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Docker Engine endpoint, `unix://` or `tcp://`.
    pub docker_host: String,
    /// Host that test code should connect to in order to reach published ports.
    pub container_host: String,
    pub startup_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            docker_host: DEFAULT_DOCKER_HOST.into(),
            container_host: "localhost".into(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let docker_host = non_empty(DOCKER_HOST).unwrap_or_else(|| DEFAULT_DOCKER_HOST.into());
        let container_host = match non_empty(HOST_OVERRIDE) {
            Some(host) => host,
            None => host_of(&docker_host),
        };
        let startup_timeout = match non_empty(STARTUP_TIMEOUT) {
            Some(expression) => parse_duration::parse(&expression)
                .map_err(|e| Error::Config(format!("{STARTUP_TIMEOUT}={expression}: {e}")))?,
            None => DEFAULT_STARTUP_TIMEOUT,
        };

        Ok(Settings {
            docker_host,
            container_host,
            startup_timeout,
        })
    }
}

/// Published ports are reachable on the daemon's host: localhost for a local
/// socket, the remote address for a `tcp://` endpoint.
fn host_of(docker_host: &str) -> String {
    let remote = docker_host
        .strip_prefix("tcp://")
        .or_else(|| docker_host.strip_prefix("http://"))
        .or_else(|| docker_host.strip_prefix("https://"));
    match remote {
        Some(authority) => {
            let authority = authority.split('/').next().unwrap_or(authority);
            let host = match authority.rsplit_once(':') {
                Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
                _ => authority,
            };
            if host.is_empty() {
                "localhost".into()
            } else {
                host.trim_start_matches('[').trim_end_matches(']').into()
            }
        }
        None => "localhost".into(),
    }
}
