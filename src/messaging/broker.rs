//! Broker client contracts used by [`Reader`](super::Reader) and [`Writer`](super::Writer)

use crate::messaging::error::MessagingResult;
use crate::messaging::message::Message;
use async_trait::async_trait;

/// Consuming side of a broker client
#[async_trait]
pub trait BrokerReader: Send + Sync {
    /// Block until the next message is available.
    ///
    /// Returns [`MessagingError::Closed`](super::MessagingError::Closed) once the
    /// reader has been closed; fetchers stop on that error and retry on any other.
    async fn fetch_message(&self) -> MessagingResult<Message>;

    /// Mark the given messages as processed
    async fn commit_messages(&self, messages: &[Message]) -> MessagingResult<()>;

    /// Stop fetching; pending and future `fetch_message` calls return `Closed`.
    ///
    /// Commits must still succeed after this, since buffered messages are drained
    /// and committed before [`finalize`](Self::finalize).
    async fn close(&self) -> MessagingResult<()>;

    /// Called once after every consumer has drained, before the pipeline returns.
    /// No commit follows it.
    async fn finalize(&self) -> MessagingResult<()> {
        Ok(())
    }
}

/// Producing side of a broker client
#[async_trait]
pub trait BrokerWriter: Send + Sync {
    /// Deliver a batch. On success each message's partition and offset are filled in.
    async fn write_messages(&self, messages: &mut [Message]) -> MessagingResult<()>;

    /// Flush and release the client
    async fn close(&self) -> MessagingResult<()>;
}
