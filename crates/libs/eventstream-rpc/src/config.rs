use crate::error::{RpcError, RpcStatus, TransportError};
use crate::header::MessageAmendment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const GREENGRASS_SOCKET_PATH_ENV: &str = "AWS_GG_NUCLEUS_DOMAIN_SOCKET_FILEPATH_FOR_COMPONENT";
pub const GREENGRASS_AUTH_TOKEN_ENV: &str = "SVCUID";

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum SocketDomain {
    #[default]
    Ipv4,
    Ipv6,
    /// Unix domain socket or named pipe; `host_name` is the path.
    Local,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum SocketKind {
    #[default]
    Stream,
    Datagram,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
#[non_exhaustive]
pub struct SocketOptions {
    pub domain: SocketDomain,
    pub kind: SocketKind,
    pub connect_timeout_ms: u64,
    pub keep_alive: bool,
    pub keep_alive_interval_secs: u16,
    pub keep_alive_timeout_secs: u16,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            domain: SocketDomain::Ipv4,
            kind: SocketKind::Stream,
            connect_timeout_ms: 3_000,
            keep_alive: false,
            keep_alive_interval_secs: 0,
            keep_alive_timeout_secs: 0,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
#[non_exhaustive]
pub struct TlsOptions {
    pub server_name: Option<String>,
    pub ca_file: Option<PathBuf>,
    pub alpn: Vec<String>,
    pub verify_peer: bool,
}

/// Everything a [`crate::Connection`] needs to reach a server.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
#[non_exhaustive]
pub struct ConnectionConfig {
    pub host_name: Option<String>,
    pub port: Option<u16>,
    pub socket_options: SocketOptions,
    pub tls: Option<TlsOptions>,
    pub connect_amendment: MessageAmendment,
}

impl ConnectionConfig {
    pub fn new(host_name: impl Into<String>, port: u16) -> Self {
        Self { host_name: Some(host_name.into()), port: Some(port), ..Self::default() }
    }

    pub fn with_socket_options(mut self, socket_options: SocketOptions) -> Self {
        self.socket_options = socket_options;
        self
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_connect_amendment(mut self, amendment: MessageAmendment) -> Self {
        self.connect_amendment = amendment;
        self
    }

    /// Host name and port are both required before connecting.
    pub fn validate(&self) -> Result<(), RpcError> {
        match (&self.host_name, self.port) {
            (Some(host), Some(_)) if !host.is_empty() => Ok(()),
            _ => Err(RpcError::new(RpcStatus::NullParameter)),
        }
    }

    pub fn from_toml_str(source: &str) -> Result<Self, TransportError> {
        toml::from_str(source)
            .map_err(|err| TransportError::InvalidConfig { message: err.to_string() })
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, TransportError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Local IPC defaults for a component running under a Greengrass nucleus.
    pub fn greengrass_default() -> Self {
        Self::greengrass_from(|name| std::env::var(name).ok())
    }

    pub fn greengrass_from(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self {
            host_name: lookup(GREENGRASS_SOCKET_PATH_ENV),
            port: Some(0),
            socket_options: SocketOptions {
                domain: SocketDomain::Local,
                ..SocketOptions::default()
            },
            ..Self::default()
        };
        if let Some(token) = lookup(GREENGRASS_AUTH_TOKEN_ENV) {
            let payload = serde_json::json!({ "authToken": token });
            config.connect_amendment =
                MessageAmendment::with_payload(payload.to_string().into_bytes());
        }
        config
    }
}
