use thiserror::Error;

/// Failure category attached to dead-letter records. The wire tag is what
/// operators filter on downstream, so the strings are part of the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterKind {
    InvalidTopicFormat,
    JsonParse,
    Validation,
    DatabaseSave,
    Unexpected,
}

impl DeadLetterKind {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::InvalidTopicFormat => "INVALID_TOPIC_FORMAT",
            Self::JsonParse => "JSON_PARSE_ERROR",
            Self::Validation => "VALIDATION_ERROR",
            Self::DatabaseSave => "DATABASE_SAVE_ERROR",
            Self::Unexpected => "UNEXPECTED_ERROR",
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("unrecognized topic: {0}")]
    InvalidTopic(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("reading rejected by validation: {0}")]
    ValidationRejected(String),

    #[error("persistence failed after {attempts} attempts: {source}")]
    PersistenceExhausted {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("repository error: {0}")]
    Repository(#[from] anyhow::Error),

    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl PipelineError {
    pub fn dead_letter_kind(&self) -> DeadLetterKind {
        match self {
            Self::InvalidTopic(_) => DeadLetterKind::InvalidTopicFormat,
            Self::MalformedPayload(_) => DeadLetterKind::JsonParse,
            Self::ValidationRejected(_) => DeadLetterKind::Validation,
            Self::PersistenceExhausted { .. } => DeadLetterKind::DatabaseSave,
            Self::PublishFailed(_) | Self::Repository(_) | Self::Unexpected(_) => {
                DeadLetterKind::Unexpected
            }
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tags_are_stable() {
        assert_eq!(
            DeadLetterKind::InvalidTopicFormat.as_wire(),
            "INVALID_TOPIC_FORMAT"
        );
        assert_eq!(DeadLetterKind::JsonParse.as_wire(), "JSON_PARSE_ERROR");
        assert_eq!(DeadLetterKind::Validation.as_wire(), "VALIDATION_ERROR");
        assert_eq!(DeadLetterKind::DatabaseSave.as_wire(), "DATABASE_SAVE_ERROR");
        assert_eq!(DeadLetterKind::Unexpected.as_wire(), "UNEXPECTED_ERROR");
    }

    #[test]
    fn errors_map_to_their_dead_letter_kind() {
        let err = PipelineError::PersistenceExhausted {
            attempts: 3,
            source: anyhow::anyhow!("connection refused"),
        };
        assert_eq!(err.dead_letter_kind(), DeadLetterKind::DatabaseSave);

        let err = PipelineError::InvalidTopic("nope".to_string());
        assert_eq!(err.dead_letter_kind(), DeadLetterKind::InvalidTopicFormat);
    }
}
