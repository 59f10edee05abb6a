use std::{
    net::{IpAddr, SocketAddr},
    str::FromStr,
    time::Duration,
};

use crate::error::{ConfigErrorKind, Error};

const DEFAULT_PORT: u16 = 3000;

/// Configuration for [`crate::server::run`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Path that upgrades to the websocket.
    pub socket_path: String,
    /// How often the server pings each client.
    pub heartbeat_interval: Duration,
    /// Silence after which a client counts as disconnected.
    pub client_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::from([0, 0, 0, 0]), DEFAULT_PORT),
            socket_path: "/socket".to_string(),
            heartbeat_interval: Duration::from_secs(5),
            client_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Reads `HOST`, `PORT`, `RELAY_SOCKET_PATH`, `RELAY_HEARTBEAT_INTERVAL_SECS`
    /// and `RELAY_CLIENT_TIMEOUT_SECS`, falling back to defaults.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();

        let host: IpAddr = parse_var(&lookup, "HOST")?.unwrap_or(default.bind_addr.ip());
        let port: u16 = parse_var(&lookup, "PORT")?.unwrap_or(default.bind_addr.port());
        let socket_path = match lookup("RELAY_SOCKET_PATH") {
            Some(path) if path.starts_with('/') => path,
            Some(path) => {
                return Err(Error::new_config(
                    format!("RELAY_SOCKET_PATH must start with '/': {}", path),
                    ConfigErrorKind::InvalidValue,
                ))
            }
            None => default.socket_path,
        };
        let heartbeat_interval = parse_var(&lookup, "RELAY_HEARTBEAT_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(default.heartbeat_interval);
        let client_timeout = parse_var(&lookup, "RELAY_CLIENT_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(default.client_timeout);

        let config = Self {
            bind_addr: SocketAddr::new(host, port),
            socket_path,
            heartbeat_interval,
            client_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.heartbeat_interval.is_zero() {
            return Err(Error::new_config(
                "heartbeat interval must be positive".to_string(),
                ConfigErrorKind::InvalidValue,
            ));
        }
        if self.client_timeout <= self.heartbeat_interval {
            return Err(Error::new_config(
                format!(
                    "client timeout {:?} must exceed heartbeat interval {:?}",
                    self.client_timeout, self.heartbeat_interval
                ),
                ConfigErrorKind::InvalidValue,
            ));
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, Error>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|err| {
            Error::new_config(
                format!("{}={} is invalid: {}", key, raw, err),
                ConfigErrorKind::InvalidValue,
            )
        }),
        None => Ok(None),
    }
}
