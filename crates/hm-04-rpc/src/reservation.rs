//! Connection configuration and channel permit pools.
//!
//! Every outgoing request first reserves a permit from the pool of its
//! channel class. Permits bound concurrent channel use; a reservation
//! suspends the caller until a permit frees up. Shutdown closes the pools,
//! failing all waiters.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::errors::FailReason;

/// Transport class of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Long-lived TCP (relay connections, streaming direct sends).
    PermanentTcp,
    /// One-shot TCP.
    Tcp,
    /// One datagram per message.
    Udp,
}

/// Connection-level tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Per-RPC idle budget before the promise fails with `Timeout`.
    pub idle_timeout_millis: u64,
    pub max_permits_permanent_tcp: usize,
    pub max_permits_tcp: usize,
    pub max_permits_udp: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_millis: 5_000,
            max_permits_permanent_tcp: 250,
            max_permits_tcp: 250,
            max_permits_udp: 250,
        }
    }
}

impl ConnectionConfig {
    pub fn for_testing() -> Self {
        Self {
            idle_timeout_millis: 500,
            max_permits_permanent_tcp: 16,
            max_permits_tcp: 16,
            max_permits_udp: 16,
        }
    }
}

/// The three counted permit pools.
pub struct ChannelReservation {
    permanent_tcp: Arc<Semaphore>,
    tcp: Arc<Semaphore>,
    udp: Arc<Semaphore>,
}

impl ChannelReservation {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            permanent_tcp: Arc::new(Semaphore::new(config.max_permits_permanent_tcp)),
            tcp: Arc::new(Semaphore::new(config.max_permits_tcp)),
            udp: Arc::new(Semaphore::new(config.max_permits_udp)),
        }
    }

    fn pool(&self, kind: ChannelKind) -> &Arc<Semaphore> {
        match kind {
            ChannelKind::PermanentTcp => &self.permanent_tcp,
            ChannelKind::Tcp => &self.tcp,
            ChannelKind::Udp => &self.udp,
        }
    }

    /// Reserve one permit; suspends until one frees up. Fails with
    /// [`FailReason::ChannelReservationFailed`] once the pool is closed.
    pub async fn reserve(&self, kind: ChannelKind) -> Result<OwnedSemaphorePermit, FailReason> {
        self.pool(kind)
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| FailReason::ChannelReservationFailed)
    }

    /// Permits currently available in a pool.
    pub fn available(&self, kind: ChannelKind) -> usize {
        self.pool(kind).available_permits()
    }

    /// Close all pools; every waiting and future reservation fails.
    pub fn shutdown(&self) {
        self.permanent_tcp.close();
        self.tcp.close();
        self.udp.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permits_are_counted_and_released() {
        let reservation = ChannelReservation::new(&ConnectionConfig {
            max_permits_udp: 2,
            ..ConnectionConfig::for_testing()
        });

        let a = reservation.reserve(ChannelKind::Udp).await.unwrap();
        let _b = reservation.reserve(ChannelKind::Udp).await.unwrap();
        assert_eq!(reservation.available(ChannelKind::Udp), 0);

        drop(a);
        assert_eq!(reservation.available(ChannelKind::Udp), 1);
    }

    #[tokio::test]
    async fn test_shutdown_fails_reservations() {
        let reservation = ChannelReservation::new(&ConnectionConfig::for_testing());
        reservation.shutdown();

        assert_eq!(
            reservation
                .reserve(ChannelKind::Tcp)
                .await
                .map(|_| ())
                .unwrap_err(),
            FailReason::ChannelReservationFailed
        );
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let reservation = Arc::new(ChannelReservation::new(&ConnectionConfig {
            max_permits_tcp: 1,
            ..ConnectionConfig::for_testing()
        }));

        let held = reservation.reserve(ChannelKind::Tcp).await.unwrap();
        let waiter = {
            let reservation = reservation.clone();
            tokio::spawn(async move { reservation.reserve(ChannelKind::Tcp).await.map(|_| ()) })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!waiter.is_finished(), "waiter blocks while pool exhausted");

        drop(held);
        assert_eq!(waiter.await.unwrap(), Ok(()));
    }
}
