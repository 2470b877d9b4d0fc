//! Error types for messaging operations

use crate::circuit_breaker::CircuitBreakerError;
use crate::error::AppError;

/// Result type for messaging operations
pub type MessagingResult<T> = std::result::Result<T, MessagingError>;

/// Errors that can occur during messaging operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessagingError {
    /// Broker unreachable or transport failure
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Broker rejected or failed to deliver a message
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Fetch or handler failure on the consuming side
    #[error("Consume failed: {0}")]
    Consume(String),

    /// Offset commit failed
    #[error("Commit failed: {0}")]
    Commit(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Reader or writer has been closed
    #[error("Closed")]
    Closed,

    /// Circuit breaker rejected the call
    #[error("Circuit breaker open: {0}")]
    BreakerOpen(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A handler or callback panicked
    #[error("Panicked: {0}")]
    Panicked(String),
}

impl MessagingError {
    /// Transport-level failures; these are the only errors that count against a breaker
    pub fn is_network(&self) -> bool {
        matches!(self, MessagingError::Connection(_) | MessagingError::Timeout(_))
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        MessagingError::Serialization(err.to_string())
    }
}

impl From<CircuitBreakerError> for MessagingError {
    fn from(err: CircuitBreakerError) -> Self {
        match err {
            CircuitBreakerError::Open(name) => MessagingError::BreakerOpen(name),
            CircuitBreakerError::InvalidConfig(msg) => MessagingError::Configuration(msg),
        }
    }
}

impl From<rdkafka::error::KafkaError> for MessagingError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        use rdkafka::error::{KafkaError, RDKafkaErrorCode};

        let code = err.rdkafka_error_code();
        let network = matches!(
            code,
            Some(
                RDKafkaErrorCode::BrokerTransportFailure
                    | RDKafkaErrorCode::AllBrokersDown
                    | RDKafkaErrorCode::NetworkException
                    | RDKafkaErrorCode::Resolve
                    | RDKafkaErrorCode::BrokerNotAvailable
                    | RDKafkaErrorCode::LeaderNotAvailable
                    | RDKafkaErrorCode::NotLeaderForPartition
            )
        );
        let timed_out = matches!(
            code,
            Some(RDKafkaErrorCode::MessageTimedOut | RDKafkaErrorCode::RequestTimedOut | RDKafkaErrorCode::OperationTimedOut)
        );

        match err {
            _ if network => MessagingError::Connection(err.to_string()),
            _ if timed_out => MessagingError::Timeout(err.to_string()),
            KafkaError::ClientConfig(..) | KafkaError::ClientCreation(_) => {
                MessagingError::Configuration(err.to_string())
            }
            KafkaError::ConsumerCommit(_) | KafkaError::StoreOffset(_) => {
                MessagingError::Commit(err.to_string())
            }
            KafkaError::MessageConsumption(_) => MessagingError::Consume(err.to_string()),
            _ => MessagingError::Publish(err.to_string()),
        }
    }
}

impl From<MessagingError> for AppError {
    fn from(err: MessagingError) -> Self {
        match err {
            MessagingError::Configuration(msg) => AppError::Configuration(msg),
            MessagingError::Serialization(msg) => AppError::Serialization(msg),
            MessagingError::Connection(msg) => AppError::Network(msg),
            MessagingError::Timeout(msg) => AppError::Timeout(msg),
            _ => AppError::Messaging(err.to_string()),
        }
    }
}
