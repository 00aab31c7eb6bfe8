use std::collections::HashMap;
use std::sync::Arc;

use weft_core::definition::NodeType;

use crate::context::NodeExecutor;
use crate::executors;

/// Node executors by type. Each engine owns its own registry.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    executors: HashMap<NodeType, Arc<dyn NodeExecutor>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor, replacing any existing one for its type.
    pub fn register(&mut self, executor: impl NodeExecutor) {
        self.executors.insert(executor.node_type(), Arc::new(executor));
    }

    pub fn unregister(&mut self, node_type: NodeType) -> bool {
        self.executors.remove(&node_type).is_some()
    }

    pub fn get(&self, node_type: NodeType) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(&node_type).cloned()
    }

    pub fn contains(&self, node_type: NodeType) -> bool {
        self.executors.contains_key(&node_type)
    }

    /// Registered types in declaration order.
    pub fn types(&self) -> Vec<NodeType> {
        let mut types: Vec<_> = self.executors.keys().copied().collect();
        types.sort();
        types
    }

    /// A registry with every built-in executor.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(executors::trigger::TriggerExecutor);
        registry.register(executors::agent::AgentExecutor);
        registry.register(executors::condition::ConditionExecutor);
        registry.register(executors::transform::TransformExecutor);
        registry.register(executors::merge::MergeExecutor);
        registry.register(executors::split::SplitExecutor);
        registry.register(executors::loop_node::LoopExecutor);
        registry.register(executors::vote::VoteExecutor);
        registry.register(executors::human::HumanExecutor);
        registry.register(executors::output::OutputExecutor);
        registry
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_every_node_type() {
        let registry = NodeRegistry::with_builtins();
        assert_eq!(registry.types(), NodeType::ALL.to_vec());
        for t in NodeType::ALL {
            assert_eq!(registry.get(t).map(|e| e.node_type()), Some(t));
        }
    }

    #[test]
    fn unregister_removes_executor() {
        let mut registry = NodeRegistry::with_builtins();
        assert!(registry.unregister(NodeType::Vote));
        assert!(!registry.contains(NodeType::Vote));
        assert!(!registry.unregister(NodeType::Vote));
        assert!(NodeRegistry::new().types().is_empty());
    }
}
