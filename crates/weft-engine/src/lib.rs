pub mod context;
pub mod engine;
pub mod executors;
pub mod human;
pub mod registry;

mod dispatcher;
mod run;

pub use context::{NodeExecutionContext, NodeExecutor, NodeOutcome};
pub use engine::{WorkflowEngine, WorkflowEngineBuilder};
pub use human::{HumanBroker, HumanRequest};
pub use registry::NodeRegistry;
