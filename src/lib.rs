use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Embedding failure: {0}")]
    EmbeddingFailure(String),

    #[error("Generation failure: {0}")]
    GenerationFailure(String),

    #[error("Document not found: {id}")]
    NotFound { id: i64 },

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Tool execution failed for {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool loop exceeded {max_rounds} rounds without a final answer")]
    ToolLoopExceeded { max_rounds: usize },

    #[error("Similarity undefined: {0}")]
    SimilarityUndefined(String),

    #[error("Tool registered twice: {name}")]
    DuplicateTool { name: String },

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod chat;
pub mod commands;
pub mod config;
pub mod database;
pub mod llm;
pub mod rag;
pub mod tools;
