use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use weft_core::definition::HumanChoice;
use weft_core::error::{Result, WeftError};
use weft_core::event::{EventBus, WorkflowEvent};
use weft_core::traits::HumanResponse;

/// A human-input request waiting for an answer.
#[derive(Debug, Clone, Serialize)]
pub struct HumanRequest {
    /// `<node_id>#<execution_count>`, unique per node invocation.
    pub id: String,
    pub node_id: String,
    pub prompt: String,
    pub choices: Vec<HumanChoice>,
    pub context: Value,
    pub requested_at: DateTime<Utc>,
}

impl HumanRequest {
    pub fn new(
        node_id: impl Into<String>,
        execution_count: u32,
        prompt: impl Into<String>,
        choices: Vec<HumanChoice>,
        context: Value,
    ) -> Self {
        let node_id = node_id.into();
        Self {
            id: format!("{}#{}", node_id, execution_count),
            node_id,
            prompt: prompt.into(),
            choices,
            context,
            requested_at: Utc::now(),
        }
    }

    pub(crate) fn requested_event(&self) -> WorkflowEvent {
        WorkflowEvent::HumanRequested {
            request_id: self.id.clone(),
            node_id: self.node_id.clone(),
            prompt: self.prompt.clone(),
            choices: self.choices.clone(),
            context: self.context.clone(),
        }
    }

    pub(crate) fn responded_event(&self, response: &HumanResponse) -> WorkflowEvent {
        WorkflowEvent::HumanResponded {
            request_id: self.id.clone(),
            node_id: self.node_id.clone(),
            choice: response.choice.clone(),
            free_text: response.free_text.clone(),
        }
    }
}

type Waiter = oneshot::Sender<Result<HumanResponse>>;

/// Holds suspended human-input requests, each with its own resolution
/// channel. Any number may be pending at once; they are kept in arrival
/// order so `respond_oldest` is deterministic.
pub struct HumanBroker {
    pending: Mutex<Vec<(HumanRequest, Waiter)>>,
    event_bus: Arc<EventBus>,
}

impl HumanBroker {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            event_bus,
        }
    }

    /// Register a request, publish `human:requested`, and return the
    /// receiver to await.
    pub async fn request(&self, req: HumanRequest) -> oneshot::Receiver<Result<HumanResponse>> {
        let (tx, rx) = oneshot::channel();
        self.event_bus.publish(req.requested_event());
        let mut pending = self.pending.lock().await;
        if let Some(pos) = pending.iter().position(|(r, _)| r.id == req.id) {
            // A re-entered node replaces its stale request.
            let (_, stale) = pending.remove(pos);
            let _ = stale.send(Err(WeftError::HumanInput(format!(
                "request {} superseded",
                req.id
            ))));
        }
        pending.push((req, tx));
        rx
    }

    /// Resolve the request with `request_id`.
    pub async fn respond(&self, request_id: &str, response: HumanResponse) -> Result<()> {
        let entry = {
            let mut pending = self.pending.lock().await;
            let pos = pending.iter().position(|(r, _)| r.id == request_id);
            pos.map(|p| pending.remove(p))
        };
        match entry {
            Some((req, tx)) => {
                self.resolve(req, tx, response);
                Ok(())
            }
            None => {
                tracing::warn!(request_id, "Human response for unknown request");
                Err(WeftError::NoPendingHuman(format!(" with id {}", request_id)))
            }
        }
    }

    /// Resolve the oldest pending request; returns its id.
    pub async fn respond_oldest(&self, response: HumanResponse) -> Result<String> {
        let entry = {
            let mut pending = self.pending.lock().await;
            if pending.is_empty() {
                None
            } else {
                Some(pending.remove(0))
            }
        };
        let (req, tx) = entry.ok_or_else(|| WeftError::NoPendingHuman(String::new()))?;
        let id = req.id.clone();
        self.resolve(req, tx, response);
        Ok(id)
    }

    fn resolve(&self, req: HumanRequest, tx: Waiter, response: HumanResponse) {
        self.event_bus.publish(req.responded_event(&response));
        // Receiver may be gone if the run was cancelled meanwhile.
        let _ = tx.send(Ok(response));
    }

    /// Reject every pending request with `Cancelled`. Returns how many were
    /// pending.
    pub async fn reject_all(&self) -> usize {
        let drained: Vec<_> = self.pending.lock().await.drain(..).collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(WeftError::Cancelled));
        }
        count
    }

    /// Remove a request without answering it.
    pub(crate) async fn withdraw(&self, request_id: &str) {
        self.pending.lock().await.retain(|(r, _)| r.id != request_id);
    }

    pub async fn pending_requests(&self) -> Vec<HumanRequest> {
        self.pending
            .lock()
            .await
            .iter()
            .map(|(req, _)| req.clone())
            .collect()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}
