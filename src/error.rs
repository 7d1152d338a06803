use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by the remote state gateway and the stores behind it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// No route to the hub, or the hub device is not registered.
    #[error("hub unreachable: {0}")]
    Unreachable(String),

    /// The bounded wait for a response elapsed.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The payload did not carry the fields a snapshot or response needs.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The transport answered but refused the operation (HTTP error status,
    /// permission denied, stream cancelled).
    #[error("transport failure: {0}")]
    Transport(String),
}

impl GatewayError {
    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::Unreachable(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Classify a reqwest failure. `timeout` is the bound the request ran with.
    ///
    /// The request URL is stripped from the detail; it may carry an auth
    /// token in its query string.
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            return Self::Timeout(timeout);
        }
        let unreachable =
            err.is_connect() || err.status() == Some(reqwest::StatusCode::NOT_FOUND);
        let malformed = err.is_decode();
        let detail = err.without_url().to_string();

        if unreachable {
            Self::Unreachable(detail)
        } else if malformed {
            Self::Malformed(detail)
        } else {
            Self::Transport(detail)
        }
    }

    /// Message suitable for showing next to stale or missing readings.
    pub fn user_message(&self) -> String {
        match self {
            Self::Unreachable(_) | Self::Timeout(_) => {
                "Hub offline: the environment controller did not answer. \
                 Readings shown may be out of date."
                    .to_owned()
            }
            Self::Malformed(_) => {
                "The hub sent data this app could not read. Readings shown may be out of date."
                    .to_owned()
            }
            Self::Transport(detail) => {
                format!("Network or credential problem talking to the hub ({detail}).")
            }
        }
    }
}

/// Failures surfaced by the AI advisory bridge.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdvisoryError {
    /// Network failure or non-success HTTP status from the vision endpoint.
    #[error("advisory service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The response was well formed but contained no usable answer.
    #[error("advisory service returned no answer")]
    EmptyResponse,

    /// The response body did not have the expected structure.
    #[error("could not parse advisory response: {0}")]
    ParseError(String),
}

impl AdvisoryError {
    pub fn user_message(&self) -> String {
        match self {
            Self::ServiceUnavailable(_) => {
                "Could not reach the advisory service. Check your internet connection and API key."
                    .to_owned()
            }
            Self::EmptyResponse | Self::ParseError(_) => {
                "The advisory service gave no usable answer for this photo. Try a clearer image."
                    .to_owned()
            }
        }
    }
}

/// Rejected operator input for threshold bounds.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ThresholdError {
    #[error("{name} minimum {min} exceeds maximum {max}")]
    Inverted { name: &'static str, min: f64, max: f64 },

    #[error("{name} bound is not a finite number")]
    NotFinite { name: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_and_timeout_share_the_hub_offline_message() {
        let a = GatewayError::unreachable("no route").user_message();
        let b = GatewayError::Timeout(Duration::from_secs(10)).user_message();
        assert_eq!(a, b);
        assert!(a.contains("Hub offline"));
    }

    #[test]
    fn transport_message_mentions_credentials() {
        let msg = GatewayError::transport("401 Unauthorized").user_message();
        assert!(msg.contains("credential"));
        assert!(msg.contains("401"));
    }

    #[test]
    fn advisory_messages_distinguish_network_from_no_answer() {
        let net = AdvisoryError::ServiceUnavailable("503".into()).user_message();
        let empty = AdvisoryError::EmptyResponse.user_message();
        assert_ne!(net, empty);
        assert!(empty.contains("no usable answer"));
    }

    #[test]
    fn threshold_error_display() {
        let err = ThresholdError::Inverted { name: "temperature", min: 30.0, max: 20.0 };
        assert_eq!(err.to_string(), "temperature minimum 30 exceeds maximum 20");
    }
}
