//! JSON login portal with per-field encryption (i-NUIST style)
//!
//! The portal tracks authentication per client address, so every request
//! is fanned out over all usable addresses of one interface.

use crate::config::HttpConfig;
use crate::error::PortalError;
use crate::http::HttpClient;
use crate::models::{Account, ChannelMapping, LoginRequest, StateQueryRequest};
use crate::net;
use crate::parser;
use crate::portal::fanout::{collect_all, race_first};
use crate::portal::{CaptivePortal, SigninReport};
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

const ONLINE_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct NuistPortal {
    interface: String,
    login_url: Arc<str>,
    pre_login_url: Arc<str>,
    clients: HashMap<Ipv4Addr, HttpClient>,
}

impl NuistPortal {
    /// Resolve the usable addresses of `interface` and pin a connector to each
    pub fn new(server_url: &str, interface: &str, http: &HttpConfig) -> Result<Self, PortalError> {
        let addrs = net::resolve(interface)?;
        Self::with_addresses(server_url, interface, addrs, http)
    }

    pub fn with_addresses(
        server_url: &str,
        interface: &str,
        addrs: impl IntoIterator<Item = Ipv4Addr>,
        http: &HttpConfig,
    ) -> Result<Self, PortalError> {
        let clients = addrs
            .into_iter()
            .map(|addr| Ok((addr, HttpClient::new(addr, http)?)))
            .collect::<Result<HashMap<_, _>, PortalError>>()?;

        if clients.is_empty() {
            return Err(PortalError::NoUsableAddress(interface.to_string()));
        }

        let base = server_url.trim_end_matches('/');
        Ok(Self {
            interface: interface.to_string(),
            login_url: format!("{}/api/v1/login", base).into(),
            pre_login_url: format!("{}/api/v1/pre_login", base).into(),
            clients,
        })
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Ipv4Addr> {
        self.clients.keys()
    }

    /// Query the ISP -> channel id table. Any one address answering is
    /// enough; the others are cancelled.
    pub async fn channel_mapping(
        &self,
        account: &Account,
        shutdown: &Shutdown,
    ) -> Result<ChannelMapping, PortalError> {
        let url = self.login_url.clone();
        let (addr, mapping) = race_first(&self.clients, shutdown, |addr, client| {
            let req = LoginRequest::discovery(account, addr);
            let url = url.clone();
            async move {
                let body = client.post_json(&url, &req).await?;
                parser::parse_channel_mapping(&body)
            }
        })
        .await?;

        tracing::debug!(
            "[{}] Channel mapping from {}: {:?}",
            self.interface,
            addr,
            mapping
        );
        Ok(mapping)
    }

    async fn signin_with(
        &self,
        account: &Account,
        mapping: &ChannelMapping,
        shutdown: &Shutdown,
    ) -> SigninReport {
        let channel = match mapping.get(&account.isp) {
            Some(id) => *id,
            None => {
                tracing::warn!(
                    "[{}] Portal offers no channel for ISP '{}', sending channel 0",
                    self.interface,
                    account.isp
                );
                0
            }
        };

        let url = self.login_url.clone();
        let (sessions, failures) = collect_all(&self.clients, shutdown, |addr, client| {
            let req = LoginRequest::signin(account, channel, addr).encrypt();
            let url = url.clone();
            async move {
                let req = req?;
                let body = client.post_json(&url, &req).await?;
                parser::parse_signin(&body)
            }
        })
        .await;

        for (addr, session) in &sessions {
            tracing::info!(
                "[{}] Signed in {} on {} as {} (outport: {}, balance: {}, duration: {}, total: {})",
                self.interface,
                session.username,
                addr,
                session.usripadd,
                session.outport,
                session.balance,
                session.duration,
                session.totaltimespan
            );
        }
        if let Some(failures) = &failures {
            tracing::debug!(
                "[{}] {} of {} address(es) failed to sign in",
                self.interface,
                failures.len(),
                self.clients.len()
            );
        }

        SigninReport { sessions, failures }
    }
}

#[async_trait]
impl CaptivePortal for NuistPortal {
    async fn signin(
        &self,
        account: &Account,
        shutdown: &Shutdown,
    ) -> Result<SigninReport, PortalError> {
        let mapping = self.channel_mapping(account, shutdown).await?;
        Ok(self.signin_with(account, &mapping, shutdown).await)
    }

    async fn is_online(&self, shutdown: &Shutdown) -> Result<bool, PortalError> {
        let url = self.pre_login_url.clone();
        let race = race_first(&self.clients, shutdown, |addr, client| {
            let req = StateQueryRequest::encrypted(addr);
            let url = url.clone();
            async move {
                let req = req?;
                let body = client.post_json(&url, &req).await?;
                parser::parse_online_state(&body)
            }
        });

        let (addr, online) = tokio::time::timeout(ONLINE_CHECK_TIMEOUT, race)
            .await
            .map_err(|_| PortalError::Timeout)??;

        tracing::debug!(
            "[{}] Portal reports {} as {}",
            self.interface,
            addr,
            if online { "online" } else { "offline" }
        );
        Ok(online)
    }
}
