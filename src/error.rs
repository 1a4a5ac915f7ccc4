use thiserror::Error;

/// Errors produced by a renderer while turning a target into an image.
///
/// The variant decides whether the queue retries the request:
/// see [`RenderError::is_retryable`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// No surface capable of drawing could be obtained (fatal)
    #[error("Rendering unavailable: {reason}")]
    RenderingUnavailable { reason: String },

    /// Temporary failure, e.g. a dependent fetch failed
    #[error("Transient render failure: {message}")]
    Transient { message: String },

    /// The render did not settle within the configured timeout
    #[error("Render timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// Logic or data error that will not go away on retry
    #[error("Render failed: {message}")]
    Permanent { message: String },
}

impl RenderError {
    /// Create a transient (retryable) failure.
    pub fn transient(message: impl Into<String>) -> Self {
        RenderError::Transient {
            message: message.into(),
        }
    }

    /// Create a permanent (non-retryable) failure.
    pub fn permanent(message: impl Into<String>) -> Self {
        RenderError::Permanent {
            message: message.into(),
        }
    }

    /// Create a rendering-unavailable failure.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        RenderError::RenderingUnavailable {
            reason: reason.into(),
        }
    }

    /// Whether the queue may retry a request that failed with this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RenderError::Transient { .. } | RenderError::Timeout { .. }
        )
    }
}

/// Errors returned to callers waiting on a preview.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreviewError {
    /// Rendering failed and retries (if any) were exhausted
    #[error("Preview generation failed after {attempts} attempt(s): {source}")]
    Render {
        attempts: u32,
        #[source]
        source: RenderError,
    },

    /// The request was dropped before it was rendered (queue cleared)
    #[error("Preview request cancelled")]
    Cancelled,
}

impl PreviewError {
    /// The underlying render error, if any.
    pub fn render_error(&self) -> Option<&RenderError> {
        match self {
            PreviewError::Render { source, .. } => Some(source),
            PreviewError::Cancelled => None,
        }
    }
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A numeric setting must be strictly positive
    #[error("{field} must be greater than 0")]
    Zero { field: &'static str },

    /// A setting is outside its allowed range
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: u64,
        max: u64,
        value: u64,
    },
}
