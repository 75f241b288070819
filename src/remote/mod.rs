//! Boundaries to the remote services
//!
//! The update engine only talks to the outside world through three traits:
//! a [`SessionClient`] to log in, one or more [`AssignmentSource`]s to fetch
//! new work, and a [`ResultSink`] to submit finished results. The HTTP
//! implementations for Primenet and GPU72 live in the submodules; tests plug
//! in their own implementations or point these at a mock server.

use crate::config::DeviceProfile;
use crate::error::Result;
use async_trait::async_trait;

mod gpu72;
mod primenet;

pub use gpu72::Gpu72Client;
pub use primenet::PrimenetClient;

/// Token the manual result page prints when it accepted a submission
pub const SUBMIT_ACK_TOKEN: &str = "processing:";

/// Something that can establish an authenticated session
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Log in; `Ok(())` means later requests run authenticated
    ///
    /// # Errors
    ///
    /// [`Error::NotAuthenticated`](crate::Error::NotAuthenticated) when the
    /// service answered but did not confirm the login, or a transport error.
    async fn login(&self) -> Result<()>;
}

/// A provider of new assignments
#[async_trait]
pub trait AssignmentSource: Send + Sync {
    /// Request up to `count` assignments suited to `profile`
    ///
    /// Returns the raw assignment lines found in the response, possibly none
    /// and possibly with repeats.
    async fn fetch(&self, count: usize, profile: &DeviceProfile) -> Result<Vec<String>>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Receiver of completed results
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Submit one batch of newline-separated result lines
    ///
    /// `Ok(())` only if the service explicitly acknowledged the batch.
    async fn submit(&self, batch: &str) -> Result<()>;
}
