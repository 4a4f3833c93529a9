//! Watch error abstractions.

use crate::identity::ConsumerIdentity;

/// Error variants of the watch lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// No consumer identity is bound, so no subscription may be active.
    #[error("no consumer identity is bound")]
    IdentityMissing,
    /// The remote rejected the subscription or could not be reached.
    #[error("error establishing watch for consumer {consumer}")]
    SubscribeFailed {
        consumer: ConsumerIdentity,
        #[source]
        source: anyhow::Error,
    },
    /// The remote closed an established watch stream.
    #[error("watch stream for consumer {consumer} terminated: {reason}")]
    StreamTerminated { consumer: ConsumerIdentity, reason: String },
    /// An event arrived for a writer epoch which has since been superseded.
    #[error("event discarded, writer epoch {epoch} has been superseded by epoch {current}")]
    StaleEventDiscarded { epoch: u64, current: u64 },
}

/// A result type where the error is a `WatchError`.
pub type WatchResult<T> = ::std::result::Result<T, WatchError>;
