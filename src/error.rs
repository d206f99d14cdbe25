//! Error taxonomy for portal operations
//!
//! Per-address failures are never fatal on their own. Fan-out operations
//! collect them into an [`AggregatedError`] keyed by the local address that
//! observed the failure.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("network interface named {0} was not found")]
    InterfaceNotFound(String),

    #[error("no usable IPv4 address on interface {0}")]
    NoUsableAddress(String),

    #[error("could not connect to authentication server: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("authentication server returned {status}: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("malformed response from authentication server: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("failure response code {0} from authentication server")]
    UnexpectedCode(i64),

    #[error("error parsing channel ID from response (raw: {raw}): {source}")]
    InvalidChannelId {
        raw: String,
        source: std::num::ParseIntError,
    },

    #[error("responded with unknown online state {0}")]
    UnknownOnlineState(String),

    #[error("invalid cipher key length {0}")]
    InvalidKey(usize),

    #[error("ping failed: {0}")]
    Ping(#[source] std::io::Error),

    #[error("failed to set {interface} {action}: {reason}")]
    LinkControl {
        interface: String,
        action: &'static str,
        reason: String,
    },

    #[error("operation timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("no address produced a response")]
    NoResponse,

    #[error(transparent)]
    Aggregated(#[from] AggregatedError),
}

/// Failures observed on individual local addresses
#[derive(Debug)]
pub struct AggregatedError {
    errors: HashMap<Ipv4Addr, PortalError>,
}

impl AggregatedError {
    /// Returns `None` for an empty map: nothing failed.
    pub fn from_map(errors: HashMap<Ipv4Addr, PortalError>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self { errors })
        }
    }

    pub fn errors(&self) -> &HashMap<Ipv4Addr, PortalError> {
        &self.errors
    }

    pub fn get(&self, addr: &Ipv4Addr) -> Option<&PortalError> {
        self.errors.get(addr)
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }
}

impl fmt::Display for AggregatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self
            .errors
            .iter()
            .map(|(addr, err)| format!("{} on {}", err, addr))
            .collect();
        f.write_str(&lines.join("\n"))
    }
}

impl std::error::Error for AggregatedError {}
