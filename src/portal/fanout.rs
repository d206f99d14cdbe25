//! Per-address fan-out
//!
//! One task per local address. [`collect_all`] waits for every task;
//! [`race_first`] returns on the first success and aborts the rest. Both
//! join their tasks before returning and stop early on external shutdown.

use crate::error::{AggregatedError, PortalError};
use crate::shutdown::Shutdown;
use std::collections::HashMap;
use std::future::Future;
use std::net::Ipv4Addr;
use tokio::task::JoinSet;

fn spawn_all<C, T, F, Fut>(
    targets: &HashMap<Ipv4Addr, C>,
    shutdown: &Shutdown,
    call: F,
) -> JoinSet<(Ipv4Addr, Result<T, PortalError>)>
where
    C: Clone + Send + 'static,
    T: Send + 'static,
    F: Fn(Ipv4Addr, C) -> Fut,
    Fut: Future<Output = Result<T, PortalError>> + Send + 'static,
{
    let mut set = JoinSet::new();
    for (addr, conn) in targets {
        let addr = *addr;
        let fut = call(addr, conn.clone());
        let shutdown = shutdown.clone();
        set.spawn(async move {
            let res = tokio::select! {
                res = fut => res,
                _ = shutdown.cancelled() => Err(PortalError::Cancelled),
            };
            (addr, res)
        });
    }
    set
}

/// Every address's outcome. The error half is `None` when nothing failed.
pub async fn collect_all<C, T, F, Fut>(
    targets: &HashMap<Ipv4Addr, C>,
    shutdown: &Shutdown,
    call: F,
) -> (HashMap<Ipv4Addr, T>, Option<AggregatedError>)
where
    C: Clone + Send + 'static,
    T: Send + 'static,
    F: Fn(Ipv4Addr, C) -> Fut,
    Fut: Future<Output = Result<T, PortalError>> + Send + 'static,
{
    let mut set = spawn_all(targets, shutdown, call);
    let mut results = HashMap::new();
    let mut errors = HashMap::new();

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((addr, Ok(value))) => {
                results.insert(addr, value);
            }
            Ok((addr, Err(e))) => {
                errors.insert(addr, e);
            }
            Err(e) => tracing::error!("Fan-out task failed: {}", e),
        }
    }

    (results, AggregatedError::from_map(errors))
}

/// First success wins. Fails with the aggregate of every error once all
/// addresses have failed.
pub async fn race_first<C, T, F, Fut>(
    targets: &HashMap<Ipv4Addr, C>,
    shutdown: &Shutdown,
    call: F,
) -> Result<(Ipv4Addr, T), PortalError>
where
    C: Clone + Send + 'static,
    T: Send + 'static,
    F: Fn(Ipv4Addr, C) -> Fut,
    Fut: Future<Output = Result<T, PortalError>> + Send + 'static,
{
    let mut set = spawn_all(targets, shutdown, call);
    let mut errors = HashMap::new();

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((addr, Ok(value))) => {
                // Losers are aborted and awaited; their results are dropped
                set.shutdown().await;
                return Ok((addr, value));
            }
            Ok((addr, Err(e))) => {
                errors.insert(addr, e);
            }
            Err(e) => tracing::error!("Fan-out task failed: {}", e),
        }
    }

    Err(AggregatedError::from_map(errors).map_or(PortalError::NoResponse, PortalError::Aggregated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn targets(n: u8) -> HashMap<Ipv4Addr, u8> {
        (1..=n).map(|i| (Ipv4Addr::new(10, 0, 0, i), i)).collect()
    }

    #[tokio::test]
    async fn test_collect_all_reports_everything() {
        let (_trigger, shutdown) = Shutdown::new();
        let (ok, err) = collect_all(&targets(4), &shutdown, |_, i| async move {
            if i % 2 == 0 {
                Ok(i)
            } else {
                Err(PortalError::UnexpectedCode(i as i64))
            }
        })
        .await;

        assert_eq!(ok.len(), 2);
        assert_eq!(ok[&Ipv4Addr::new(10, 0, 0, 2)], 2);
        let err = err.unwrap();
        assert_eq!(err.len(), 2);
        assert!(matches!(
            err.get(&Ipv4Addr::new(10, 0, 0, 3)),
            Some(PortalError::UnexpectedCode(3))
        ));
    }

    #[tokio::test]
    async fn test_collect_all_without_failures_has_no_error() {
        let (_trigger, shutdown) = Shutdown::new();
        let (ok, err) = collect_all(&targets(3), &shutdown, |_, i| async move { Ok(i) }).await;
        assert_eq!(ok.len(), 3);
        assert!(err.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_first_success_cancels_siblings() {
        let (_trigger, shutdown) = Shutdown::new();
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = finished.clone();

        let (addr, value) = race_first(&targets(3), &shutdown, move |_, i| {
            let counter = counter.clone();
            async move {
                if i == 2 {
                    return Ok(i);
                }
                tokio::time::sleep(Duration::from_secs(60)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Err(PortalError::Timeout)
            }
        })
        .await
        .unwrap();

        assert_eq!(addr, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(value, 2);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_race_first_success_after_failures() {
        let (_trigger, shutdown) = Shutdown::new();
        for winner in 1..=4u8 {
            let (addr, _) = race_first(&targets(4), &shutdown, move |_, i| async move {
                if i == winner {
                    Ok(())
                } else {
                    Err(PortalError::UnexpectedCode(500))
                }
            })
            .await
            .unwrap();
            assert_eq!(addr, Ipv4Addr::new(10, 0, 0, winner));
        }
    }

    #[tokio::test]
    async fn test_race_first_all_fail() {
        let (_trigger, shutdown) = Shutdown::new();
        let err = race_first(&targets(5), &shutdown, |_, _| async move {
            Err::<(), _>(PortalError::UnexpectedCode(500))
        })
        .await
        .unwrap_err();

        match err {
            PortalError::Aggregated(agg) => assert_eq!(agg.len(), 5),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_race_first_without_targets() {
        let (_trigger, shutdown) = Shutdown::new();
        let empty: HashMap<Ipv4Addr, u8> = HashMap::new();
        let err = race_first(&empty, &shutdown, |_, i| async move { Ok(i) })
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::NoResponse));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_in_flight_calls() {
        let (trigger, shutdown) = Shutdown::new();
        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                collect_all(&targets(2), &shutdown, |_, i| async move {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(i)
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
        let (ok, err) = handle.await.unwrap();
        assert!(ok.is_empty());
        let err = err.unwrap();
        assert_eq!(err.len(), 2);
        assert!(err
            .errors()
            .values()
            .all(|e| matches!(e, PortalError::Cancelled)));
    }
}
