//! The request sender: permits, timeout, promise plumbing.
//!
//! `send` never blocks the caller: it hands back a promise and moves the
//! permit acquisition, the wire exchange and the timeout onto a task. The
//! sender also owns the peer's advertised address, which the relay subsystem
//! rewrites when the relay set changes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use shared_types::PeerAddress;
use tracing::trace;

use crate::errors::FailReason;
use crate::future::Promise;
use crate::message::{Command, Message, MessageBody};
use crate::ports::Wire;
use crate::reservation::{ChannelKind, ChannelReservation, ConnectionConfig};

/// Shared handle for building and sending requests.
pub struct RequestSender {
    wire: Arc<dyn Wire>,
    reservation: Arc<ChannelReservation>,
    config: ConnectionConfig,
    self_address: RwLock<PeerAddress>,
    shutdown: AtomicBool,
}

impl RequestSender {
    pub fn new(wire: Arc<dyn Wire>, config: ConnectionConfig, self_address: PeerAddress) -> Self {
        Self {
            wire,
            reservation: Arc::new(ChannelReservation::new(&config)),
            config,
            self_address: RwLock::new(self_address),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn wire(&self) -> Arc<dyn Wire> {
        Arc::clone(&self.wire)
    }

    pub fn reservation(&self) -> Arc<ChannelReservation> {
        Arc::clone(&self.reservation)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The currently advertised own address.
    pub fn self_address(&self) -> PeerAddress {
        self.self_address
            .read()
            .expect("address lock poisoned")
            .clone()
    }

    /// Rewrite the advertised address (relay set changes).
    pub fn set_self_address(&self, address: PeerAddress) {
        *self.self_address.write().expect("address lock poisoned") = address;
    }

    /// Stop accepting sends and fail waiting reservations.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.reservation.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Send a request to `recipient`; the returned promise resolves with
    /// the peer's response or a failure reason.
    pub fn send(
        &self,
        recipient: &PeerAddress,
        command: Command,
        body: MessageBody,
        kind: ChannelKind,
    ) -> Promise<Message> {
        let message = Message::request(command, self.self_address(), recipient.peer_id, body);
        self.send_message(recipient, message, kind)
    }

    /// Send a pre-built message (relay forwarding reuses this).
    pub fn send_message(
        &self,
        recipient: &PeerAddress,
        message: Message,
        kind: ChannelKind,
    ) -> Promise<Message> {
        let promise: Promise<Message> = Promise::new();
        if self.is_shutdown() {
            promise.fail(FailReason::Shutdown);
            return promise;
        }

        let wire = Arc::clone(&self.wire);
        let reservation = Arc::clone(&self.reservation);
        let recipient = recipient.clone();
        let idle = Duration::from_millis(self.config.idle_timeout_millis);
        let completion = promise.clone();
        tokio::spawn(async move {
            let permit = match reservation.reserve(kind).await {
                Ok(permit) => permit,
                Err(reason) => {
                    completion.fail(reason);
                    return;
                }
            };
            if completion.is_done() {
                // Cancelled while waiting for a permit.
                return;
            }
            trace!(command = ?message.command, to = ?recipient.peer_id, "sending request");
            let outcome = tokio::time::timeout(idle, wire.call(&recipient, message)).await;
            drop(permit);
            match outcome {
                Ok(Ok(response)) => completion.complete(response),
                Ok(Err(reason)) => completion.fail(reason),
                Err(_) => completion.fail(FailReason::Timeout),
            }
        });
        promise
    }
}
