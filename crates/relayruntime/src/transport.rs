//! In-process message passing between engines.
//!
//! Every process listens on a [`Switchboard`] under its [`Destination`].
//! Messages and replies cross the board as JSON strings so the envelope
//! is exercised exactly as it would be between real processes.

use crate::hook::Hook;
use async_trait::async_trait;
use parking_lot::RwLock;
use relaycore::{Destination, HookMessage, HookReply, MessageSender, Transport, TransportError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const CHANNEL_CAPACITY: usize = 64;

struct Envelope {
    message: String,
    sender: MessageSender,
    reply: oneshot::Sender<String>,
}

/// Routes messages to the listener registered for each destination.
pub struct Switchboard {
    listeners: RwLock<HashMap<Destination, mpsc::Sender<Envelope>>>,
}

impl Switchboard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            listeners: RwLock::new(HashMap::new()),
        })
    }

    /// Serve messages for `destination` with `hook`, replacing any
    /// previous listener.
    ///
    /// Each message is handled on its own task, so a handler may itself
    /// send messages (and wait for them) without stalling the listener.
    pub fn listen(&self, destination: Destination, hook: Hook) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::channel::<Envelope>(CHANNEL_CAPACITY);
        if self.listeners.write().insert(destination, tx).is_some() {
            tracing::warn!("Replacing listener for {}", destination);
        }
        tracing::debug!("Listening for {}", destination);

        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let hook = hook.clone();
                tokio::spawn(async move {
                    let reply = hook.handle_json(&envelope.message, envelope.sender).await;
                    if envelope.reply.send(reply).is_err() {
                        tracing::debug!("Reply dropped, sender went away");
                    }
                });
            }
        })
    }

    /// Stop serving `destination`. Returns whether a listener was registered.
    pub fn unlisten(&self, destination: Destination) -> bool {
        self.listeners.write().remove(&destination).is_some()
    }

    pub fn is_listening(&self, destination: Destination) -> bool {
        self.listeners.read().contains_key(&destination)
    }

    /// Transport for a process that identifies itself as `sender`.
    pub fn endpoint(self: &Arc<Self>, sender: MessageSender) -> ChannelTransport {
        ChannelTransport {
            switchboard: Arc::clone(self),
            sender,
        }
    }

    fn channel(&self, destination: Destination) -> Option<mpsc::Sender<Envelope>> {
        self.listeners.read().get(&destination).cloned()
    }
}

/// [`Transport`] backed by a [`Switchboard`].
#[derive(Clone)]
pub struct ChannelTransport {
    switchboard: Arc<Switchboard>,
    sender: MessageSender,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(
        &self,
        destination: Destination,
        message: HookMessage,
    ) -> Result<HookReply, TransportError> {
        let payload =
            serde_json::to_string(&message).map_err(|e| TransportError::Malformed(e.to_string()))?;
        let channel = self
            .switchboard
            .channel(destination)
            .ok_or(TransportError::NoListener(destination))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        channel
            .send(Envelope {
                message: payload,
                sender: self.sender,
                reply: reply_tx,
            })
            .await
            .map_err(|_| TransportError::Closed(destination))?;

        let reply = reply_rx
            .await
            .map_err(|_| TransportError::Closed(destination))?;
        serde_json::from_str(&reply).map_err(|e| TransportError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use relaycore::{ProbeRequest, ProcessRole, TargetId};

    #[tokio::test]
    async fn test_missing_listener() {
        let board = Switchboard::new();
        let transport = board.endpoint(MessageSender::default());

        let err = transport
            .send(
                Destination::Background,
                HookMessage::Probe(ProbeRequest::GetCurrentTabId),
            )
            .await
            .unwrap_err();

        assert_eq!(err, TransportError::NoListener(Destination::Background));
    }

    #[tokio::test]
    async fn test_probe_round_trip_and_unlisten() {
        let board = Switchboard::new();
        let background = Engine::new(EngineConfig::for_role(ProcessRole::Background));
        board.listen(Destination::Background, background.create_hook());
        let transport = board.endpoint(MessageSender {
            tab: Some(TargetId::new(3)),
        });
        let probe = HookMessage::Probe(ProbeRequest::GetCurrentTabId);

        let reply = transport
            .send(Destination::Background, probe.clone())
            .await
            .unwrap();
        assert_eq!(reply, HookReply::TabId(TargetId::new(3)));

        assert!(board.unlisten(Destination::Background));
        assert!(!board.is_listening(Destination::Background));
        assert!(matches!(
            transport.send(Destination::Background, probe).await,
            Err(TransportError::NoListener(_))
        ));
    }
}
