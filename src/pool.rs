//! Bounded pool of device sessions.
//!
//! The pool does not keep sessions around. It only bounds how many are open
//! at once: each query takes a slot, opens a fresh session, runs the caller's
//! work against it, closes it and gives the slot back. The slot is an RAII
//! semaphore permit, so it is returned on every exit path, including errors,
//! panics and the caller dropping the future.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::OltModel;
use crate::driver::{driver_for, C320Driver, OltDriver};
use crate::error::{GatewayError, Result};
use crate::models::PoolStats;
use crate::snmp::{Connector, SnmpTarget};

pub const DEFAULT_MAX_SESSIONS: usize = 100;

#[derive(Debug)]
pub struct ConnectionPool {
    model: OltModel,
    max: usize,
    slots: Semaphore,
}

impl ConnectionPool {
    pub fn new(model: OltModel, max: usize) -> Self {
        Self {
            model,
            max,
            slots: Semaphore::new(max),
        }
    }

    /// Runs `work` against a freshly connected driver.
    ///
    /// Fails with [`GatewayError::Capacity`] when `cancel` fires before a slot
    /// frees up; no session is opened in that case.
    pub async fn query<C, T, F>(
        &self,
        cancel: &CancellationToken,
        connector: &C,
        target: &SnmpTarget,
        work: F,
    ) -> Result<T>
    where
        C: Connector + Clone,
        F: for<'a> FnOnce(&'a C320Driver<C>) -> BoxFuture<'a, Result<T>>,
    {
        let _slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(GatewayError::Capacity(format!(
                    "no session slot for {} before the deadline",
                    target.host
                )));
            }
            permit = self.slots.acquire() => permit
                .map_err(|_| GatewayError::Capacity("pool is shut down".to_string()))?,
        };
        debug!(
            host = %target.host,
            available = self.slots.available_permits(),
            "session slot acquired"
        );

        let driver = driver_for(self.model, connector.clone(), target.clone())?;
        driver.connect().await?;
        let result = work(&driver).await;
        if let Err(e) = driver.close().await {
            warn!(host = %target.host, error = %e, "closing session failed");
        }
        result
    }

    /// Point-in-time snapshot, not synchronized with in-flight queries.
    pub fn stats(&self) -> PoolStats {
        let available = self.slots.available_permits();
        PoolStats {
            max: self.max,
            active: self.max.saturating_sub(available),
            available,
        }
    }
}

/// A cancellation token that fires on its own after a timeout.
///
/// The timer task is aborted when the deadline is dropped.
#[derive(Debug)]
pub struct Deadline {
    token: CancellationToken,
    timer: JoinHandle<()>,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        let token = CancellationToken::new();
        let fire = token.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            fire.cancel();
        });
        Self { token, timer }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::testing::{target, text, FakeConnector, FakeDevice};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn slow_device() -> FakeDevice {
        FakeDevice {
            latency: Duration::from_millis(200),
            ..FakeDevice::default()
        }
        .with_value(codec::SYS_NAME_OID, text("olt"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeds_max() {
        let pool = Arc::new(ConnectionPool::new(OltModel::C320, 3));
        let connector = FakeConnector::new(slow_device());

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let pool = Arc::clone(&pool);
            let connector = connector.clone();
            tasks.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                let reads = cancel.clone();
                pool.query(&cancel, &connector, &target(), move |driver| {
                    Box::pin(async move { driver.system_info(&reads).await })
                })
                .await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().name, "olt");
        }

        let counters = &connector.counters;
        assert!(counters.peak_open.load(Ordering::SeqCst) <= 3);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 10);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 10);
        assert_eq!(
            pool.stats(),
            PoolStats {
                max: 3,
                active: 0,
                available: 3
            }
        );
    }

    #[tokio::test]
    async fn test_work_error_releases_slot_and_closes_session() {
        let pool = ConnectionPool::new(OltModel::C320, 1);
        let connector = FakeConnector::new(FakeDevice::default());
        let cancel = CancellationToken::new();

        let result: Result<()> = pool
            .query(&cancel, &connector, &target(), |_| {
                Box::pin(async { Err(GatewayError::Protocol("boom".to_string())) })
            })
            .await;
        assert!(matches!(result, Err(GatewayError::Protocol(_))));
        assert_eq!(connector.counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().available, 1);
    }

    #[tokio::test]
    async fn test_connect_failure_releases_slot() {
        let pool = ConnectionPool::new(OltModel::C320, 1);
        let connector = FakeConnector::new(FakeDevice {
            refuse_connect: true,
            ..FakeDevice::default()
        });
        let cancel = CancellationToken::new();
        let result = pool
            .query(&cancel, &connector, &target(), |driver| {
                Box::pin(async move { driver.all_boards(&CancellationToken::new()).await })
            })
            .await;
        assert!(matches!(result, Err(GatewayError::Connection(_))));
        assert_eq!(pool.stats().available, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting_is_capacity_error() {
        let pool = Arc::new(ConnectionPool::new(OltModel::C320, 1));
        let connector = FakeConnector::new(FakeDevice {
            latency: Duration::from_secs(10),
            ..slow_device()
        });

        let holder = {
            let pool = Arc::clone(&pool);
            let connector = connector.clone();
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                let reads = cancel.clone();
                pool.query(&cancel, &connector, &target(), move |driver| {
                    Box::pin(async move { driver.system_info(&reads).await })
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.stats().available, 0);

        let deadline = Deadline::after(Duration::from_millis(100));
        let result = pool
            .query(deadline.token(), &connector, &target(), |driver| {
                Box::pin(async move { driver.system_info(&CancellationToken::new()).await })
            })
            .await;
        assert!(matches!(result, Err(GatewayError::Capacity(_))));
        assert_eq!(connector.opened(), 1);

        holder.await.unwrap().unwrap();
        assert_eq!(pool.stats().available, 1);
    }

    #[tokio::test]
    async fn test_unsupported_model_opens_nothing() {
        let pool = ConnectionPool::new(OltModel::C300, 2);
        let connector = FakeConnector::new(FakeDevice::default());
        let cancel = CancellationToken::new();
        let result = pool
            .query(&cancel, &connector, &target(), |driver| {
                Box::pin(async move { driver.system_info(&CancellationToken::new()).await })
            })
            .await;
        assert!(matches!(result, Err(GatewayError::UnsupportedModel(_))));
        assert_eq!(connector.opened(), 0);
        assert_eq!(pool.stats().available, 2);
    }
}
