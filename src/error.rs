//! Error types for Flyer Bot.

use uuid::Uuid;

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Temporal error: {0}")]
    Temporal(#[from] TemporalError),

    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Messaging gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Gateway {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send on gateway {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Completion provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Extraction adapter errors — all surfaced to the poster as a retry
/// prompt, never fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Extraction service unavailable: {reason}")]
    ServiceUnavailable { reason: String },

    #[error("No JSON object found in extraction response")]
    NoJsonFound,

    #[error("Extraction response contained malformed JSON: {reason}")]
    MalformedJson { reason: String },
}

/// Required-field validation failure. Lists exactly the fields that are
/// absent or empty after trimming.
#[derive(Debug, thiserror::Error)]
#[error("Missing required fields: {}", missing.join(", "))]
pub struct ValidationError {
    pub missing: Vec<&'static str>,
}

/// Date/time normalization failure.
#[derive(Debug, thiserror::Error)]
pub enum TemporalError {
    #[error("Could not parse date/time from input: {input:?}")]
    Unparseable { input: String },
}

/// Pending-announcement state transition errors.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("Announcement {id} is not in state {expected} (currently {actual})")]
    Conflict {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("No pending announcement with id {id}")]
    NotFound { id: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Scheduled-job errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} not found")]
    NotFound { id: Uuid },

    #[error("Job {id} already resolved, cannot cancel")]
    AlreadyResolved { id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;
