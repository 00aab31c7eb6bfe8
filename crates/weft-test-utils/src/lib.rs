//! Test doubles and fixture builders shared by the weft crates' tests.

pub mod fixtures;
pub mod human;
pub mod llm;

pub use fixtures::{definition, edge, node, port_edge, trigger};
pub use human::ScriptedHuman;
pub use llm::{MockLlm, RecordedCall};
