//! Conversation-scoped flows with idle expiry.
//!
//! Each flow sits behind its own async mutex, so steps of one conversation
//! run one at a time while different conversations proceed in parallel.
//! Flows whose compensation failed stay registered and are retried on every
//! sweep, expired or not.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, interval};
use tracing::{debug, info};

use super::flow::{Flow, Input, Step};
use super::provisioner::{ProvisionError, Provisioner};
use super::reply::{CancelReason, Reply};

/// Key of a conversation with the front-end.
pub type ConversationId = i64;

/// Messages that can be sent to the sweeper.
#[derive(Debug, Clone)]
pub enum SweeperMessage {
    /// Sweep immediately.
    SweepNow,
    /// Stop the sweeper.
    Shutdown,
}

#[derive(Debug)]
struct Entry {
    flow: Flow,
    touched: Instant,
}

type Slot = Arc<Mutex<Entry>>;

/// Live flows keyed by conversation.
pub struct FlowRegistry {
    provisioner: Arc<Provisioner>,
    flows: Mutex<HashMap<ConversationId, Slot>>,
    ttl: Duration,
}

impl FlowRegistry {
    /// Creates a registry expiring flows after the provisioner's configured TTL.
    #[must_use]
    pub fn new(provisioner: Arc<Provisioner>) -> Self {
        let ttl = provisioner.settings().flow_ttl();
        Self {
            provisioner,
            flows: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Starts a flow for the conversation.
    ///
    /// A flow already open in the same conversation is cancelled first. If
    /// that cancellation cannot be compensated, the old flow stays in place
    /// and its failure reply is returned instead.
    pub async fn start(
        &self,
        conversation: ConversationId,
        user_id: i64,
    ) -> Result<Reply, ProvisionError> {
        let previous = self.flows.lock().await.get(&conversation).cloned();
        if let Some(slot) = previous {
            let mut entry = slot.lock().await;
            if !entry.flow.step().is_terminal() {
                let reply = self
                    .provisioner
                    .abort(&mut entry.flow, CancelReason::Replaced)
                    .await;
                if entry.flow.step() == Step::Compensating {
                    entry.touched = Instant::now();
                    return Ok(reply);
                }
            }
            drop(entry);
            self.remove_if_same(conversation, &slot).await;
        }

        let (flow, reply) = self.provisioner.start(user_id).await?;
        let entry = Entry {
            flow,
            touched: Instant::now(),
        };
        self.flows
            .lock()
            .await
            .insert(conversation, Arc::new(Mutex::new(entry)));
        Ok(reply)
    }

    /// Routes an input to the conversation's flow.
    ///
    /// Returns `None` when the conversation has no open flow.
    pub async fn handle(&self, conversation: ConversationId, input: Input) -> Option<Reply> {
        let slot = self.flows.lock().await.get(&conversation).cloned()?;
        let mut entry = slot.lock().await;

        let reply = self.provisioner.handle(&mut entry.flow, input).await;
        entry.touched = Instant::now();

        if entry.flow.step().is_terminal() {
            drop(entry);
            self.remove_if_same(conversation, &slot).await;
        }
        Some(reply)
    }

    /// Cancels and drops flows idle for longer than the TTL, and retries
    /// pending compensations.
    ///
    /// Returns the number of flows dropped.
    pub async fn sweep_expired(&self) -> usize {
        let slots: Vec<(ConversationId, Slot)> = self
            .flows
            .lock()
            .await
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect();

        let mut expired = 0;
        for (conversation, slot) in slots {
            let mut entry = slot.lock().await;
            let pending = entry.flow.step() == Step::Compensating;
            if !pending && entry.touched.elapsed() < self.ttl {
                continue;
            }
            self.provisioner
                .abort(&mut entry.flow, CancelReason::Expired)
                .await;
            if entry.flow.step() == Step::Compensating {
                debug!(conversation, "compensation still pending");
                continue;
            }
            drop(entry);
            self.remove_if_same(conversation, &slot).await;
            debug!(conversation, "flow expired");
            expired += 1;
        }
        if expired > 0 {
            info!(expired, "expired flows swept");
        }
        expired
    }

    /// Sweeps on a fixed interval until told to stop.
    pub async fn run_sweeper(&self, every: Duration, mut rx: mpsc::Receiver<SweeperMessage>) {
        info!(ttl_secs = self.ttl.as_secs(), "flow sweeper started");

        let mut timer = interval(every);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.sweep_expired().await;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(SweeperMessage::SweepNow) => {
                            self.sweep_expired().await;
                        }
                        Some(SweeperMessage::Shutdown) | None => {
                            info!("flow sweeper shutting down");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Number of open flows.
    pub async fn len(&self) -> usize {
        self.flows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn remove_if_same(&self, conversation: ConversationId, slot: &Slot) {
        let mut flows = self.flows.lock().await;
        if flows
            .get(&conversation)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            flows.remove(&conversation);
        }
    }
}

impl std::fmt::Debug for FlowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowRegistry")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
