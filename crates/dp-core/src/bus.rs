//! Run-scoped message bus
//!
//! One FIFO inbox per registered agent. Every `send` is checked against the
//! registry's directed edge set before anything is queued; a rejected
//! message is dropped and never reaches the transcript.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::{debug, warn};

use crate::agents::AgentId;
use crate::error::Error;
use crate::message::{Message, Recipient};
use crate::registry::Registry;

struct Inbox {
    tx: mpsc::UnboundedSender<Message>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Message>>,
}

impl Inbox {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: AsyncMutex::new(rx),
        }
    }
}

/// Message bus for one run
pub struct MessageBus {
    registry: Arc<Registry>,
    inboxes: HashMap<AgentId, Inbox>,
    /// Accepted messages in acceptance order
    transcript: Mutex<Vec<Message>>,
}

impl MessageBus {
    pub fn new(registry: Arc<Registry>) -> Self {
        let inboxes = registry
            .agents()
            .map(|agent| (agent.id.clone(), Inbox::new()))
            .collect();

        Self {
            registry,
            inboxes,
            transcript: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue a message for its recipient(s)
    ///
    /// A broadcast goes to every declared peer of the sender and is recorded
    /// once in the transcript.
    pub fn send(&self, message: Message) -> crate::Result<()> {
        let targets = match message.recipient() {
            Recipient::Agent(to) => {
                if !self.registry.edge_allowed(message.sender(), to) {
                    warn!(from = %message.sender(), to = %to, kind = ?message.kind(), "Policy violation, message dropped");
                    return Err(Error::PolicyViolation {
                        from: message.sender().to_string(),
                        to: to.to_string(),
                    });
                }
                vec![to.clone()]
            }
            Recipient::Broadcast => {
                if self.registry.agent(message.sender()).is_none() {
                    return Err(Error::UnknownAgent(message.sender().to_string()));
                }
                self.registry.peers_of(message.sender())
            }
        };

        let inboxes = targets
            .iter()
            .map(|id| {
                self.inboxes
                    .get(id)
                    .ok_or_else(|| Error::UnknownAgent(id.to_string()))
            })
            .collect::<crate::Result<Vec<_>>>()?;

        // Queue while holding the transcript lock so both orders agree
        let mut transcript = self.transcript.lock().unwrap_or_else(|e| e.into_inner());
        for inbox in inboxes {
            // The receiver lives as long as the bus, so this cannot fail
            let _ = inbox.tx.send(message.clone());
        }
        debug!(
            id = %message.id(),
            from = %message.sender(),
            to = %message.recipient(),
            kind = ?message.kind(),
            "Message queued"
        );
        transcript.push(message);

        Ok(())
    }

    /// Wait for the next message addressed to `id`
    ///
    /// Returns `None` for agents the registry does not know.
    pub async fn receive(&self, id: &AgentId) -> Option<Message> {
        let inbox = self.inboxes.get(id)?;
        let mut rx = inbox.rx.lock().await;
        rx.recv().await
    }

    /// Take the next message for `id` without waiting
    pub fn try_receive(&self, id: &AgentId) -> Option<Message> {
        let inbox = self.inboxes.get(id)?;
        let mut rx = inbox.rx.try_lock().ok()?;
        rx.try_recv().ok()
    }

    /// Snapshot of every accepted message, in order
    pub fn transcript(&self) -> Vec<Message> {
        self.transcript
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}
