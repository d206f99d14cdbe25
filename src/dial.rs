//! Per-interface dial state machine
//!
//! `CheckingOnline -> SigningIn -> (RetryWait -> SigningIn)* -> RestartingLink`.
//! An online host ends the dial without consuming a trial. The link restart
//! is a single escalation; no signin follows it.

use crate::config::GlobalConfig;
use crate::error::PortalError;
use crate::link::LinkController;
use crate::models::Account;
use crate::online::OnlineProber;
use crate::portal::CaptivePortal;
use crate::shutdown::Shutdown;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialPolicy {
    /// Extra trials after the first
    pub retry: u32,
    pub retry_interval: Duration,
    pub restart_link: bool,
}

impl From<&GlobalConfig> for DialPolicy {
    fn from(cfg: &GlobalConfig) -> Self {
        Self {
            retry: cfg.retry,
            retry_interval: cfg.retry_interval(),
            restart_link: cfg.restart_link,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialOutcome {
    AlreadyOnline,
    SignedIn { trials: u32 },
    Exhausted { trials: u32, link_restarted: bool },
    Cancelled,
}

pub struct Dialer<'a> {
    pub interface: &'a str,
    pub portal: &'a dyn CaptivePortal,
    pub prober: Option<OnlineProber<'a>>,
    pub link: &'a dyn LinkController,
    pub policy: DialPolicy,
}

impl Dialer<'_> {
    /// `Err` only when the link restart itself fails.
    pub async fn dial(&self, account: &Account, shutdown: &Shutdown) -> Result<DialOutcome, PortalError> {
        if self.check_online(shutdown).await {
            tracing::info!("Already online on {}", self.interface);
            return Ok(DialOutcome::AlreadyOnline);
        }

        let total = self.policy.retry.saturating_add(1);
        let mut trials = 0;
        while trials < total {
            if shutdown.is_cancelled() {
                return Ok(DialOutcome::Cancelled);
            }

            trials += 1;
            if self.signin_once(account, shutdown).await {
                tracing::info!("Dial succeeded on {}", self.interface);
                return Ok(DialOutcome::SignedIn { trials });
            }
            // A trial cut short by shutdown is not a failed trial
            if shutdown.is_cancelled() {
                return Ok(DialOutcome::Cancelled);
            }

            let remaining = total - trials;
            tracing::info!("{} retrial(s) remaining on {}", remaining, self.interface);
            if remaining > 0 {
                tracing::info!("Waiting {:?} before next retry", self.policy.retry_interval);
                tokio::select! {
                    _ = tokio::time::sleep(self.policy.retry_interval) => {}
                    _ = shutdown.cancelled() => return Ok(DialOutcome::Cancelled),
                }
            }
        }

        if shutdown.is_cancelled() {
            return Ok(DialOutcome::Cancelled);
        }
        if !self.policy.restart_link {
            return Ok(DialOutcome::Exhausted {
                trials,
                link_restarted: false,
            });
        }

        tracing::info!("Retry expired, interface {} is restarting", self.interface);
        self.restart_link().await?;
        Ok(DialOutcome::Exhausted {
            trials,
            link_restarted: true,
        })
    }

    /// Probe failures fail open: the signin still happens.
    async fn check_online(&self, shutdown: &Shutdown) -> bool {
        let Some(prober) = &self.prober else {
            return false;
        };
        match prober.is_online(shutdown).await {
            Ok(online) => online,
            Err(e) => {
                tracing::warn!("Cannot query dial state on {}: {}", self.interface, e);
                false
            }
        }
    }

    async fn signin_once(&self, account: &Account, shutdown: &Shutdown) -> bool {
        match self.portal.signin(account, shutdown).await {
            Ok(report) => {
                let success = report.is_success();
                if let Some(failures) = report.failures {
                    let mut addrs: Vec<_> = failures.errors().keys().copied().collect();
                    addrs.sort();
                    for addr in addrs {
                        let Some(err) = failures.get(&addr) else {
                            continue;
                        };
                        if success {
                            tracing::warn!(
                                "Failed to dial via {} using {}: {} on {}",
                                self.interface,
                                account.username,
                                err,
                                addr
                            );
                        } else {
                            tracing::error!(
                                "Failed to dial via {} using {}: {} on {}",
                                self.interface,
                                account.username,
                                err,
                                addr
                            );
                        }
                    }
                }
                success
            }
            Err(e) => {
                tracing::error!(
                    "Failed to dial via {} using {}: {}",
                    self.interface,
                    account.username,
                    e
                );
                false
            }
        }
    }

    async fn restart_link(&self) -> Result<(), PortalError> {
        if let Err(e) = self.link.set_down(self.interface).await {
            tracing::error!("{}", e);
            return Err(e);
        }
        if let Err(e) = self.link.set_up(self.interface).await {
            tracing::error!("{}", e);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OnlineCheckConfig;
    use crate::error::AggregatedError;
    use crate::models::{Isp, SigninSession};
    use crate::online::PingProbe;
    use crate::portal::SigninReport;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Signin succeeds from the `succeed_from`-th call on (1-based)
    struct ScriptedPortal {
        succeed_from: Option<usize>,
        online: Result<bool, ()>,
        calls: Mutex<Vec<Instant>>,
        state_queries: AtomicUsize,
    }

    impl ScriptedPortal {
        fn new(succeed_from: Option<usize>) -> Self {
            Self {
                succeed_from,
                online: Ok(false),
                calls: Mutex::new(Vec::new()),
                state_queries: AtomicUsize::new(0),
            }
        }

        fn signin_calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CaptivePortal for ScriptedPortal {
        async fn signin(&self, _: &Account, _: &Shutdown) -> Result<SigninReport, PortalError> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(Instant::now());
                calls.len()
            };

            let ok = Ipv4Addr::new(10, 0, 0, 1);
            let bad = Ipv4Addr::new(10, 0, 0, 2);
            let mut failures = HashMap::new();
            failures.insert(bad, PortalError::UnexpectedCode(500));

            match self.succeed_from {
                Some(from) if n >= from => {
                    let mut sessions = HashMap::new();
                    sessions.insert(ok, SigninSession::default());
                    Ok(SigninReport {
                        sessions,
                        failures: AggregatedError::from_map(failures),
                    })
                }
                _ if n % 2 == 0 => Err(PortalError::NoResponse),
                _ => {
                    failures.insert(ok, PortalError::Timeout);
                    Ok(SigninReport {
                        sessions: HashMap::new(),
                        failures: AggregatedError::from_map(failures),
                    })
                }
            }
        }

        async fn is_online(&self, _: &Shutdown) -> Result<bool, PortalError> {
            self.state_queries.fetch_add(1, Ordering::SeqCst);
            self.online.map_err(|_| PortalError::Timeout)
        }
    }

    #[derive(Default)]
    struct RecordingLink {
        fail_down: bool,
        actions: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LinkController for RecordingLink {
        async fn set_down(&self, interface: &str) -> Result<(), PortalError> {
            self.actions.lock().unwrap().push(format!("{} down", interface));
            if self.fail_down {
                return Err(PortalError::LinkControl {
                    interface: interface.to_string(),
                    action: "down",
                    reason: "Operation not permitted".to_string(),
                });
            }
            Ok(())
        }

        async fn set_up(&self, interface: &str) -> Result<(), PortalError> {
            self.actions.lock().unwrap().push(format!("{} up", interface));
            Ok(())
        }
    }

    struct NoPing;

    #[async_trait]
    impl PingProbe for NoPing {
        async fn probe(&self, _: &str, _: u16, _: Duration) -> Result<Vec<bool>, PortalError> {
            unreachable!("portal strategy only")
        }
    }

    fn account() -> Account {
        Account {
            username: "20231234567".to_string(),
            password: "secret".to_string(),
            isp: Isp::Mobile,
        }
    }

    fn policy(retry: u32, restart_link: bool) -> DialPolicy {
        DialPolicy {
            retry,
            retry_interval: Duration::from_secs(30),
            restart_link,
        }
    }

    fn portal_check() -> OnlineCheckConfig {
        OnlineCheckConfig {
            enabled: true,
            method: "portal".to_string(),
            ..OnlineCheckConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_restarts_link_once() {
        let portal = ScriptedPortal::new(None);
        let link = RecordingLink::default();
        let (_trigger, shutdown) = Shutdown::new();
        let dialer = Dialer {
            interface: "eth0",
            portal: &portal,
            prober: None,
            link: &link,
            policy: policy(2, true),
        };

        let start = Instant::now();
        let outcome = dialer.dial(&account(), &shutdown).await.unwrap();
        assert_eq!(
            outcome,
            DialOutcome::Exhausted {
                trials: 3,
                link_restarted: true
            }
        );

        let calls = portal.signin_calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0] - start, Duration::ZERO);
        assert_eq!(calls[1] - calls[0], Duration::from_secs(30));
        assert_eq!(calls[2] - calls[1], Duration::from_secs(30));
        // No wait after the final trial
        assert_eq!(Instant::now() - calls[2], Duration::ZERO);

        assert_eq!(*link.actions.lock().unwrap(), vec!["eth0 down", "eth0 up"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_without_restart() {
        let portal = ScriptedPortal::new(None);
        let link = RecordingLink::default();
        let (_trigger, shutdown) = Shutdown::new();
        let dialer = Dialer {
            interface: "eth0",
            portal: &portal,
            prober: None,
            link: &link,
            policy: policy(0, false),
        };

        let outcome = dialer.dial(&account(), &shutdown).await.unwrap();
        assert_eq!(
            outcome,
            DialOutcome::Exhausted {
                trials: 1,
                link_restarted: false
            }
        );
        assert_eq!(portal.signin_calls().len(), 1);
        assert!(link.actions.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_restart_is_fatal() {
        let portal = ScriptedPortal::new(None);
        let link = RecordingLink {
            fail_down: true,
            ..RecordingLink::default()
        };
        let (_trigger, shutdown) = Shutdown::new();
        let dialer = Dialer {
            interface: "eth1",
            portal: &portal,
            prober: None,
            link: &link,
            policy: policy(1, true),
        };

        let err = dialer.dial(&account(), &shutdown).await.unwrap_err();
        assert!(matches!(err, PortalError::LinkControl { action: "down", .. }));
        assert_eq!(portal.signin_calls().len(), 2);
        assert_eq!(*link.actions.lock().unwrap(), vec!["eth1 down"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_success_ends_dial() {
        let portal = ScriptedPortal::new(Some(2));
        let link = RecordingLink::default();
        let (_trigger, shutdown) = Shutdown::new();
        let dialer = Dialer {
            interface: "eth0",
            portal: &portal,
            prober: None,
            link: &link,
            policy: policy(5, true),
        };

        let outcome = dialer.dial(&account(), &shutdown).await.unwrap();
        assert_eq!(outcome, DialOutcome::SignedIn { trials: 2 });
        assert_eq!(portal.signin_calls().len(), 2);
        assert!(link.actions.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_online_skips_signin() {
        let mut portal = ScriptedPortal::new(None);
        portal.online = Ok(true);
        let link = RecordingLink::default();
        let cfg = portal_check();
        let (_trigger, shutdown) = Shutdown::new();
        let dialer = Dialer {
            interface: "eth0",
            portal: &portal,
            prober: Some(OnlineProber::new(&cfg, &portal, &NoPing)),
            link: &link,
            policy: policy(2, true),
        };

        let outcome = dialer.dial(&account(), &shutdown).await.unwrap();
        assert_eq!(outcome, DialOutcome::AlreadyOnline);
        assert_eq!(portal.state_queries.load(Ordering::SeqCst), 1);
        assert!(portal.signin_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_error_fails_open() {
        let mut portal = ScriptedPortal::new(Some(1));
        portal.online = Err(());
        let link = RecordingLink::default();
        let cfg = portal_check();
        let (_trigger, shutdown) = Shutdown::new();
        let dialer = Dialer {
            interface: "eth0",
            portal: &portal,
            prober: Some(OnlineProber::new(&cfg, &portal, &NoPing)),
            link: &link,
            policy: policy(0, false),
        };

        let outcome = dialer.dial(&account(), &shutdown).await.unwrap();
        assert_eq!(outcome, DialOutcome::SignedIn { trials: 1 });
        assert_eq!(portal.state_queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_retry_wait() {
        let portal = ScriptedPortal::new(None);
        let link = RecordingLink::default();
        let (trigger, shutdown) = Shutdown::new();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            trigger.cancel();
        });

        let dialer = Dialer {
            interface: "eth0",
            portal: &portal,
            prober: None,
            link: &link,
            policy: policy(3, true),
        };
        let start = Instant::now();
        let outcome = dialer.dial(&account(), &shutdown).await.unwrap();
        canceller.await.unwrap();

        assert_eq!(outcome, DialOutcome::Cancelled);
        assert_eq!(Instant::now() - start, Duration::from_secs(10));
        assert_eq!(portal.signin_calls().len(), 1);
        assert!(link.actions.lock().unwrap().is_empty());
    }

    /// Signin never finishes on its own; it only observes shutdown
    struct StallingPortal;

    #[async_trait]
    impl CaptivePortal for StallingPortal {
        async fn signin(&self, _: &Account, shutdown: &Shutdown) -> Result<SigninReport, PortalError> {
            shutdown.cancelled().await;
            Err(PortalError::Cancelled)
        }

        async fn is_online(&self, _: &Shutdown) -> Result<bool, PortalError> {
            Ok(false)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_last_trial_keeps_link() {
        let portal = StallingPortal;
        let link = RecordingLink::default();
        let (trigger, shutdown) = Shutdown::new();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let dialer = Dialer {
            interface: "eth0",
            portal: &portal,
            prober: None,
            link: &link,
            policy: policy(0, true),
        };
        let outcome = dialer.dial(&account(), &shutdown).await.unwrap();
        canceller.await.unwrap();

        assert_eq!(outcome, DialOutcome::Cancelled);
        assert!(link.actions.lock().unwrap().is_empty());
    }

    #[test]
    fn test_policy_from_config() {
        let cfg = GlobalConfig {
            retry: 4,
            retry_interval: 12,
            restart_link: true,
            ..GlobalConfig::default()
        };
        let policy = DialPolicy::from(&cfg);
        assert_eq!(policy.retry, 4);
        assert_eq!(policy.retry_interval, Duration::from_secs(12));
        assert!(policy.restart_link);
    }
}
