//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::GenerationError;

/// Map domain errors to a string for CLI output.
pub fn map_error(e: &GenerationError) -> String {
    match e {
        GenerationError::Config(message) => format!("Configuration error: {}", message),
        other => other.to_string(),
    }
}
