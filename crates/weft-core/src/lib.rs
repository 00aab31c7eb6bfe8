pub mod config;
pub mod definition;
pub mod error;
pub mod event;
pub mod instance;
pub mod traits;

pub use config::WeftConfig;
pub use definition::*;
pub use error::{Result, WeftError};
pub use event::{EventBus, WorkflowEvent};
pub use instance::*;
pub use traits::*;
