//! Captive portal abstraction layer
//!
//! The dial orchestrator only talks to a [`CaptivePortal`]; the concrete
//! client lives in [`nuist`]. Tests substitute scripted portals.

pub mod fanout;
pub mod nuist;

pub use nuist::NuistPortal;

use crate::error::{AggregatedError, PortalError};
use crate::models::{Account, SigninSession};
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Outcome of one signin across every local address
#[derive(Debug)]
pub struct SigninReport {
    pub sessions: HashMap<Ipv4Addr, SigninSession>,
    pub failures: Option<AggregatedError>,
}

impl SigninReport {
    /// One working route is enough
    pub fn is_success(&self) -> bool {
        !self.sessions.is_empty()
    }
}

#[async_trait]
pub trait CaptivePortal: Send + Sync {
    /// Authenticate every local address. `Err` means no address could even
    /// be attempted, e.g. channel discovery failed.
    async fn signin(&self, account: &Account, shutdown: &Shutdown)
        -> Result<SigninReport, PortalError>;

    /// Ask the portal whether this host is already authenticated
    async fn is_online(&self, shutdown: &Shutdown) -> Result<bool, PortalError>;
}
