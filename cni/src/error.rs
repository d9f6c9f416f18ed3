use std::io;

use ptproute_config::ConfigError;
use ptproute_netlink::NetlinkError;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::table::TableError;

const CODE_INTERNAL: u32 = 999;

/// Errors reported back to the container runtime.
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("incompatible CNI version {0}")]
    IncompatibleVersion(String),

    #[error("{0}")]
    InvalidEnvironment(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    InvalidConfig(String),
}

impl PluginError {
    pub fn code(&self) -> u32 {
        match self {
            PluginError::IncompatibleVersion(_) => 1,
            PluginError::InvalidEnvironment(_) => 4,
            PluginError::Io(_) => 5,
            PluginError::Decode(_) => 6,
            PluginError::InvalidConfig(_) => 7,
        }
    }
}

impl From<ConfigError> for PluginError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Decode(e) => PluginError::Decode(e),
            e => PluginError::InvalidConfig(e.to_string()),
        }
    }
}

/// Code of the outermost cause in the chain that carries one.
pub fn code_of(err: &anyhow::Error) -> u32 {
    err.chain()
        .find_map(|cause| {
            if let Some(e) = cause.downcast_ref::<PluginError>() {
                return Some(e.code());
            }
            if let Some(e) = cause.downcast_ref::<TableError>() {
                return Some(e.code());
            }
            if let Some(e) = cause.downcast_ref::<ConfigError>() {
                return Some(match e {
                    ConfigError::Decode(_) => 6,
                    _ => 7,
                });
            }
            if cause.is::<NetlinkError>() {
                return Some(101);
            }
            if cause.is::<serde_json::Error>() {
                return Some(6);
            }
            if cause.is::<io::Error>() {
                return Some(5);
            }
            None
        })
        .unwrap_or(CODE_INTERNAL)
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReply {
    pub cni_version: String,
    pub code: u32,
    pub msg: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub details: String,
}

impl ErrorReply {
    pub fn new(err: &anyhow::Error, cni_version: &str) -> Self {
        let msg = err.to_string();
        let details = format!("{err:#}");

        Self {
            cni_version: cni_version.to_string(),
            code: code_of(err),
            details: if details == msg { String::new() } else { details },
            msg,
        }
    }
}

/// Version to answer errors with, taken from whatever config arrived.
pub fn reply_version(stdin: &str) -> String {
    serde_json::from_str::<serde_json::Value>(stdin)
        .ok()
        .and_then(|v| v.get("cniVersion")?.as_str().map(str::to_string))
        .unwrap_or_else(|| crate::command::version::CURRENT_VERSION.to_string())
}

/// Logs and discards a failure that must not abort the command.
pub fn best_effort<T>(what: &str, result: anyhow::Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{what} failed, ignoring: {e:#}");
            None
        }
    }
}
