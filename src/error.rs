//! Typed errors for venue connections and frame decoding

use std::time::Duration;
use thiserror::Error;

use crate::feed::venues::AdapterState;
use crate::feed::SubscriptionKind;
use crate::types::Venue;

/// Failure of a venue adapter operation
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{venue}: connect failed: {reason}")]
    Connect { venue: Venue, reason: String },

    #[error("{0}: not connected")]
    NotConnected(Venue),

    #[error("{venue}: cannot {operation} while {state:?}")]
    InvalidState {
        venue: Venue,
        operation: &'static str,
        state: AdapterState,
    },

    #[error("{venue}: {kind} subscription with no instruments")]
    EmptySubscription { venue: Venue, kind: SubscriptionKind },

    #[error("{venue}: {kind} subscriptions are not supported")]
    UnsupportedSubscription { venue: Venue, kind: SubscriptionKind },

    #[error("{venue}: signing auth frame failed: {reason}")]
    Auth { venue: Venue, reason: String },

    #[error("{venue}: connection closed: {reason}")]
    ConnectionClosed { venue: Venue, reason: String },

    #[error("{venue}: no inbound frame for {silent_for:?}")]
    KeepaliveTimeout { venue: Venue, silent_for: Duration },

    #[error("{venue}: transport error: {reason}")]
    Transport { venue: Venue, reason: String },
}

impl AdapterError {
    pub fn venue(&self) -> Venue {
        match self {
            AdapterError::Connect { venue, .. }
            | AdapterError::InvalidState { venue, .. }
            | AdapterError::EmptySubscription { venue, .. }
            | AdapterError::UnsupportedSubscription { venue, .. }
            | AdapterError::Auth { venue, .. }
            | AdapterError::ConnectionClosed { venue, .. }
            | AdapterError::KeepaliveTimeout { venue, .. }
            | AdapterError::Transport { venue, .. } => *venue,
            AdapterError::NotConnected(venue) => *venue,
        }
    }

    /// True when the underlying connection is gone and a reconnect is needed
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            AdapterError::Connect { .. }
                | AdapterError::NotConnected(_)
                | AdapterError::ConnectionClosed { .. }
                | AdapterError::KeepaliveTimeout { .. }
                | AdapterError::Transport { .. }
        )
    }
}

/// A venue frame that could not be turned into an event
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` is not a number: {value}")]
    InvalidNumber { field: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_carry_their_venue() {
        let err = AdapterError::KeepaliveTimeout {
            venue: Venue::Gate,
            silent_for: Duration::from_secs(45),
        };
        assert_eq!(err.venue(), Venue::Gate);
        assert!(err.is_connection_loss());

        let err = AdapterError::EmptySubscription {
            venue: Venue::Cex,
            kind: SubscriptionKind::Ticker,
        };
        assert!(!err.is_connection_loss());
        assert_eq!(err.to_string(), "cex: ticker subscription with no instruments");
    }
}
