//! Node invocation and downstream dispatch.
//!
//! After a node succeeds its outgoing edges are split by the chosen port:
//! inactive edges skip their targets, active edges deliver the output. Merge
//! targets accumulate deliveries until every incoming edge is resolved.
//! Targets of a split run concurrently and are joined; all others run one
//! after another.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::{join_all, BoxFuture};
use serde_json::{Map, Value};
use tracing::debug;

use weft_core::definition::{NodeType, WorkflowNode};
use weft_core::error::{Result, WeftError};
use weft_core::instance::NodeStatus;

use crate::context::{NodeExecutionContext, NodeOutcome};
use crate::run::{Run, RunState};

type Invocation = (String, Map<String, Value>);

impl Run {
    /// Run one node and, on success, everything downstream of it.
    pub(crate) fn execute_node(
        self: &Arc<Self>,
        node_id: String,
        inputs: Map<String, Value>,
    ) -> BoxFuture<'static, Result<()>> {
        let run = self.clone();
        Box::pin(async move { run.run_node(node_id, inputs).await })
    }

    async fn run_node(self: Arc<Self>, node_id: String, inputs: Map<String, Value>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(WeftError::Cancelled);
        }
        let node = self
            .definition
            .node(&node_id)
            .cloned()
            .ok_or_else(|| WeftError::UnknownNode(node_id.clone()))?;

        let execution_count = self.begin_node(&node, &inputs).await;
        let started = Instant::now();
        let result = match self.services.registry.get(node.node_type()) {
            None => Err(WeftError::NoExecutor(node.node_type().to_string())),
            Some(executor) => {
                let ctx = NodeExecutionContext::new(node.clone(), inputs, execution_count, self.clone());
                tokio::select! {
                    r = executor.execute(&ctx) => r,
                    _ = self.cancel.cancelled() => Err(WeftError::Cancelled),
                }
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(NodeOutcome {
                error: Some(message),
                ..
            }) => {
                self.fail_node(&node, &message, elapsed_ms).await;
                return Err(WeftError::NodeFailed {
                    node_id: node.id.clone(),
                    message,
                });
            }
            Ok(outcome) => outcome,
            Err(WeftError::Cancelled) => {
                self.fail_node(&node, &WeftError::Cancelled.to_string(), elapsed_ms)
                    .await;
                return Err(WeftError::Cancelled);
            }
            Err(e) => {
                let message = e.to_string();
                self.fail_node(&node, &message, elapsed_ms).await;
                return Err(WeftError::NodeFailed {
                    node_id: node.id.clone(),
                    message,
                });
            }
        };

        self.complete_node(&node, &outcome, elapsed_ms).await;
        self.dispatch(&node, outcome.output, outcome.output_port).await
    }

    async fn dispatch(self: &Arc<Self>, node: &WorkflowNode, output: Value, port: Option<String>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(WeftError::Cancelled);
        }
        let edges: Vec<_> = self
            .definition
            .edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.source_node_id == node.id)
            .collect();
        if edges.is_empty() {
            debug!(node_id = %node.id, "No outgoing edges, branch complete");
            return Ok(());
        }

        let (active, inactive): (Vec<_>, Vec<_>) = edges
            .into_iter()
            .partition(|(_, e)| port.as_deref().map_or(true, |p| e.matches_port(p)));
        let active_targets: HashSet<&str> = active.iter().map(|(_, e)| e.target_node_id.as_str()).collect();

        let mut invocations: Vec<Invocation> = Vec::new();

        // A loop fires its other port on a later round, so its idle edges
        // neither skip targets nor settle merges.
        let inactive = if node.node_type() == NodeType::Loop { Vec::new() } else { inactive };
        for (idx, edge) in &inactive {
            let target = edge.target_node_id.as_str();
            debug!(
                from = %node.id,
                to = target,
                port = port.as_deref().unwrap_or("-"),
                "Edge inactive"
            );
            if self.is_merge(target) {
                if let Some(inputs) = self.resolve_merge_edges(target, &[*idx], None).await {
                    invocations.push((target.to_string(), inputs));
                }
            } else if !active_targets.contains(target) && self.skip_node(target).await {
                invocations.extend(self.settle_merges_after_skip(target).await);
            }
        }

        // Group active edges by target, keeping first-seen order.
        let mut batches: Vec<(String, Vec<usize>, Map<String, Value>)> = Vec::new();
        for (idx, edge) in &active {
            let pos = match batches.iter().position(|(t, _, _)| *t == edge.target_node_id) {
                Some(pos) => pos,
                None => {
                    batches.push((edge.target_node_id.clone(), Vec::new(), Map::new()));
                    batches.len() - 1
                }
            };
            let key = if self.is_merge(&edge.target_node_id) {
                edge.merge_input_key()
            } else {
                edge.input_key()
            };
            let (_, idxs, inputs) = &mut batches[pos];
            idxs.push(*idx);
            inputs.insert(key.to_string(), output.clone());
        }

        for (target, idxs, inputs) in batches {
            if !self.is_merge(&target) {
                invocations.push((target, inputs));
                continue;
            }
            match self.resolve_merge_edges(&target, &idxs, Some(inputs)).await {
                Some(all) => invocations.push((target, all)),
                None => debug!(merge = %target, from = %node.id, "Merge waiting for siblings"),
            }
        }

        if node.node_type() == NodeType::Split {
            debug!(node_id = %node.id, branches = invocations.len(), "Fanning out");
            let results = join_all(
                invocations
                    .into_iter()
                    .map(|(target, inputs)| self.execute_node(target, inputs)),
            )
            .await;
            // Siblings are never cancelled by a failing branch; report the
            // first failure once all have finished.
            results.into_iter().collect::<Result<Vec<()>>>()?;
        } else {
            for (target, inputs) in invocations {
                self.execute_node(target, inputs).await?;
            }
        }
        Ok(())
    }

    fn is_merge(&self, node_id: &str) -> bool {
        self.definition
            .node(node_id)
            .is_some_and(|n| n.node_type() == NodeType::Merge)
    }

    /// Record that edges `idxs` into merge `merge_id` are resolved, storing
    /// any delivered inputs. Returns the combined inputs when this makes the
    /// merge ready; the check and take happen under one lock so a merge
    /// fires once per round.
    async fn resolve_merge_edges(
        &self,
        merge_id: &str,
        idxs: &[usize],
        delivered: Option<Map<String, Value>>,
    ) -> Option<Map<String, Value>> {
        let mut state = self.state.lock().await;
        if let Some(batch) = delivered {
            if let Some(ns) = state.instance.node_state_mut(merge_id) {
                ns.inputs.extend(batch);
            }
        }
        state
            .merge_arrivals
            .entry(merge_id.to_string())
            .or_default()
            .extend(idxs.iter().copied());
        self.take_if_ready(&mut state, merge_id)
    }

    /// A skipped node never delivers; merges it feeds may now be complete.
    async fn settle_merges_after_skip(&self, skipped_id: &str) -> Vec<Invocation> {
        let merges: Vec<String> = self
            .definition
            .outgoing(skipped_id)
            .filter(|e| self.is_merge(&e.target_node_id))
            .map(|e| e.target_node_id.clone())
            .collect();
        let mut ready = Vec::new();
        for merge_id in merges {
            let mut state = self.state.lock().await;
            if let Some(inputs) = self.take_if_ready(&mut state, &merge_id) {
                ready.push((merge_id, inputs));
            }
        }
        ready
    }

    fn take_if_ready(&self, state: &mut RunState, merge_id: &str) -> Option<Map<String, Value>> {
        let arrivals = state.merge_arrivals.get(merge_id)?;
        let complete = self
            .definition
            .edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.target_node_id == merge_id)
            .all(|(i, e)| {
                arrivals.contains(&i)
                    || state
                        .instance
                        .node_state(&e.source_node_id)
                        .is_some_and(|s| s.status == NodeStatus::Skipped)
            });
        let has_inputs = state
            .instance
            .node_state(merge_id)
            .is_some_and(|s| !s.inputs.is_empty());
        if !complete || !has_inputs {
            return None;
        }
        state.merge_arrivals.remove(merge_id);
        let ns = state.instance.node_state_mut(merge_id)?;
        Some(std::mem::take(&mut ns.inputs))
    }
}
