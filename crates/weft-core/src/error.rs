use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // Definition errors
    #[error("Invalid workflow definition: {0}")]
    Definition(String),

    #[error("Node not found: {0}")]
    UnknownNode(String),

    #[error("No executor registered for node type: {0}")]
    NoExecutor(String),

    // Execution errors
    #[error("Node {node_id} failed: {message}")]
    NodeFailed { node_id: String, message: String },

    #[error("Loop node {node_id} exceeded maximum iterations ({max})")]
    MaxIterationsExceeded { node_id: String, max: u32 },

    #[error("Workflow cancelled")]
    Cancelled,

    // Transform errors
    #[error("Template error: {0}")]
    Template(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Script exceeded time limit of {0}ms")]
    ScriptTimeout(u64),

    #[error("Forbidden identifier in script: {0}")]
    ForbiddenIdentifier(String),

    #[error("JQ error: {0}")]
    Jq(String),

    #[error("Mapping error: {0}")]
    Mapping(String),

    // Collaborator errors
    #[error("LLM invocation failed: {0}")]
    Llm(String),

    #[error("Webhook failed: {0}")]
    Webhook(String),

    #[error("Human input failed: {0}")]
    HumanInput(String),

    #[error("No pending human input request{0}")]
    NoPendingHuman(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WeftError>;
