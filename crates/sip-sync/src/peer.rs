//! # Peer Bridge
//!
//! The paired-device link. Two channels with different guarantees:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  send_context(map)     best effort, last value wins                     │
//! │                        ──► PeerMessage::Snapshot on the other side      │
//! │                                                                         │
//! │  send_user_info(map)   queued, ordered, delivered exactly once          │
//! │                        ──► PeerMessage::Event on the other side         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A device that cannot reach the remote store relays its events to the
//! paired device over `send_user_info`; the paired device pushes them (or
//! holds them until it is ready). Counters travel the other way as
//! snapshots.
//!
//! [`ChannelPeerLink`] connects two engines inside one process. A real
//! device transport implements [`PeerLink`] and feeds inbound messages to
//! [`SyncEngine::merge_peer_message`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sip_core::Payload;

use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};

/// Message arriving from the paired device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PeerMessage {
    /// An event recorded on the peer that it could not push itself.
    Event(Payload),
    /// The peer's latest application counters.
    Snapshot(Payload),
}

/// Outbound side of the paired-device transport.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Replaces the peer's view of the shared context. May be dropped.
    async fn send_context(&self, context: Payload) -> SyncResult<()>;

    /// Queues a payload for guaranteed, in-order delivery.
    async fn send_user_info(&self, info: Payload) -> SyncResult<()>;
}

// =============================================================================
// In-Process Channel Link
// =============================================================================

/// [`PeerLink`] over tokio channels.
#[derive(Debug)]
pub struct ChannelPeerLink {
    context_tx: watch::Sender<Option<Payload>>,
    user_info_tx: mpsc::UnboundedSender<Payload>,
}

/// Receiving side of a [`ChannelPeerLink`].
#[derive(Debug)]
pub struct PeerInbox {
    context_rx: watch::Receiver<Option<Payload>>,
    user_info_rx: mpsc::UnboundedReceiver<Payload>,
}

/// One device's end of a paired link.
#[derive(Debug)]
pub struct PeerEndpoint {
    pub link: ChannelPeerLink,
    pub inbox: PeerInbox,
}

impl ChannelPeerLink {
    /// Creates a one-directional link and its inbox.
    pub fn channel() -> (ChannelPeerLink, PeerInbox) {
        let (context_tx, context_rx) = watch::channel(None);
        let (user_info_tx, user_info_rx) = mpsc::unbounded_channel();

        (
            ChannelPeerLink {
                context_tx,
                user_info_tx,
            },
            PeerInbox {
                context_rx,
                user_info_rx,
            },
        )
    }

    /// Creates two endpoints wired to each other.
    pub fn pair() -> (PeerEndpoint, PeerEndpoint) {
        let (a_link, b_inbox) = Self::channel();
        let (b_link, a_inbox) = Self::channel();

        (
            PeerEndpoint {
                link: a_link,
                inbox: a_inbox,
            },
            PeerEndpoint {
                link: b_link,
                inbox: b_inbox,
            },
        )
    }
}

#[async_trait]
impl PeerLink for ChannelPeerLink {
    async fn send_context(&self, context: Payload) -> SyncResult<()> {
        self.context_tx.send_replace(Some(context));
        Ok(())
    }

    async fn send_user_info(&self, info: Payload) -> SyncResult<()> {
        self.user_info_tx
            .send(info)
            .map_err(|_| SyncError::PeerUnavailable)
    }
}

impl PeerInbox {
    /// Next message from the peer, or `None` once the peer is gone.
    ///
    /// Queued user info is delivered before a pending context update.
    pub async fn recv(&mut self) -> Option<PeerMessage> {
        loop {
            tokio::select! {
                biased;

                Some(info) = self.user_info_rx.recv() => {
                    return Some(PeerMessage::Event(info));
                }
                Ok(()) = self.context_rx.changed() => {
                    if let Some(context) = self.context_rx.borrow_and_update().clone() {
                        return Some(PeerMessage::Snapshot(context));
                    }
                }
                else => return None,
            }
        }
    }
}

/// Feeds every message from `inbox` into `engine` until the peer goes away.
pub fn spawn_peer_listener(engine: SyncEngine, mut inbox: PeerInbox) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Peer listener started");

        while let Some(message) = inbox.recv().await {
            debug!(?message, "Peer message received");
            if let Err(err) = engine.merge_peer_message(message).await {
                warn!(error = %err, "Failed to merge peer message");
            }
        }

        info!("Peer listener stopped");
    })
}
