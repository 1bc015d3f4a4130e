use std::time::Duration;

use cadence_core::errors::GatewayError;
use cadence_core::tools::ToolError;

/// Reasons a turn ends without committing.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("malformed input message {index}: {reason}")]
    MalformedInput { index: usize, reason: String },

    #[error("stream failure: {0}")]
    Stream(#[from] GatewayError),

    #[error("completion timeout after {0:?}")]
    CompletionTimeout(Duration),
}

impl TurnError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MalformedInput { .. } => "malformed_input",
            Self::Stream(_) => "stream_failure",
            Self::CompletionTimeout(_) => "completion_timeout",
        }
    }
}

/// A tool call that produced no follow-up. Recorded on the turn report;
/// never aborts the turn.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ToolDispatchError {
    #[error("tool {tool} failed: {source}")]
    Failed { tool: String, source: ToolError },

    #[error("tool {tool} returned an unusable result: {source}")]
    UnknownResult { tool: String, source: ToolError },

    #[error("no registered tool named {0}")]
    NoMatchingTool(String),

    #[error("tool task panicked: {0}")]
    TaskPanicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_error_kinds() {
        let malformed = TurnError::MalformedInput {
            index: 0,
            reason: "no content".into(),
        };
        assert_eq!(malformed.error_kind(), "malformed_input");
        assert_eq!(
            malformed.to_string(),
            "malformed input message 0: no content"
        );

        let stream: TurnError = GatewayError::RateLimited.into();
        assert_eq!(stream.error_kind(), "stream_failure");

        let timeout = TurnError::CompletionTimeout(Duration::from_secs(30));
        assert_eq!(timeout.to_string(), "completion timeout after 30s");
    }

    #[test]
    fn dispatch_error_display_names_tool() {
        let err = ToolDispatchError::Failed {
            tool: "get_weather".into(),
            source: ToolError::Failed {
                status: "ERROR".into(),
                detail: "upstream down".into(),
            },
        };
        assert!(err.to_string().starts_with("tool get_weather failed"));
        assert_eq!(
            ToolDispatchError::NoMatchingTool("x".into()).to_string(),
            "no registered tool named x"
        );
    }
}
