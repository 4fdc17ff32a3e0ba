use async_nats::HeaderMap;
use bytes::Bytes;

/// One message to be consumed, converted to an owned value so it can move
/// through Tower middleware without borrowing from the fetch batch.
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    /// The subject the message was published to
    pub subject: String,
    /// The message payload
    pub payload: Bytes,
    /// Headers as delivered by the broker, if any
    pub headers: Option<HeaderMap>,
}

impl ConsumeRequest {
    pub fn new(subject: String, payload: Bytes, headers: Option<HeaderMap>) -> Self {
        Self {
            subject,
            payload,
            headers,
        }
    }
}

/// Outcome of consuming one message: acknowledge it, or reject it so the
/// broker redelivers.
#[derive(Debug, Clone)]
pub enum ConsumeResponse {
    Ack,
    Nak(Option<String>),
}

impl ConsumeResponse {
    pub fn ack() -> Self {
        Self::Ack
    }

    pub fn nak(reason: impl Into<String>) -> Self {
        Self::Nak(Some(reason.into()))
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }

    pub fn nak_reason(&self) -> Option<&str> {
        match self {
            Self::Nak(reason) => reason.as_deref(),
            Self::Ack => None,
        }
    }
}
