//! Work cache: keeps `worktodo.txt` topped off
//!
//! A top-off reads the queue under its lock, counts the assignment records in
//! it and, if there are fewer than the device's target depth, asks the
//! configured providers for the difference. Providers are tried in order and
//! the first one that yields any records wins. New records are appended
//! behind the existing ones; existing records are never removed or reordered.
//! Records are stored as the provider delivered them; any rewriting of a
//! record is the provider's business.

use crate::config::DeviceProfile;
use crate::error::{Error, Result};
use crate::lock::LockManager;
use crate::records::{RecordGrammar, dedup_exact, normalize_line_endings};
use crate::remote::AssignmentSource;
use crate::utils::{join_lines, read_text_or_empty, rewrite_file};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a successful top-off
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopOff {
    /// The queue already held enough work; nothing was fetched or written
    AlreadyFull {
        /// Records found in the queue
        depth: usize,
    },
    /// New records were fetched and the queue rewritten
    Refilled {
        /// Records in the queue before the refill
        before: usize,
        /// Records appended
        added: usize,
        /// Provider the records came from
        source: &'static str,
    },
}

/// Owner of the work queue file
pub struct WorkCache {
    locks: LockManager,
    grammar: RecordGrammar,
    sources: Vec<Arc<dyn AssignmentSource>>,
}

impl WorkCache {
    /// Create a work cache fetching from `sources`, most preferred first
    pub fn new(
        locks: LockManager,
        grammar: RecordGrammar,
        sources: Vec<Arc<dyn AssignmentSource>>,
    ) -> Self {
        Self {
            locks,
            grammar,
            sources,
        }
    }

    /// Bring the device's queue up to its configured depth
    ///
    /// # Errors
    ///
    /// Lock contention, I/O failures, a short write, or
    /// [`Error::NoWork`] when no provider returned anything. The queue file is
    /// only ever rewritten in one go after all new records are in hand.
    pub async fn top_off(&self, profile: &DeviceProfile) -> Result<TopOff> {
        let guard = self.locks.acquire(&[&profile.files.todo]).await?;
        let result = self.top_off_locked(profile).await;
        guard.release().await;
        result
    }

    async fn top_off_locked(&self, profile: &DeviceProfile) -> Result<TopOff> {
        let todo = &profile.files.todo;
        let text = normalize_line_endings(&read_text_or_empty(todo).await?);
        let current = self.grammar.assignments(&text);

        if current.len() >= profile.cache {
            debug!(
                device = profile.device,
                depth = current.len(),
                target = profile.cache,
                "work queue full"
            );
            return Ok(TopOff::AlreadyFull {
                depth: current.len(),
            });
        }

        let wanted = profile.cache - current.len();
        info!(device = profile.device, wanted, "fetching assignments");
        let (fetched, source) = self.fetch(wanted, profile).await?;

        let mut fresh = dedup_exact(fetched);
        if fresh.len() > wanted {
            debug!(
                received = fresh.len(),
                wanted, "provider sent more than requested, keeping the first"
            );
            fresh.truncate(wanted);
        }

        let merged: Vec<&str> = current
            .iter()
            .copied()
            .chain(fresh.iter().map(String::as_str))
            .collect();
        let contents = join_lines(&merged);

        if let Err(e) = rewrite_file(todo, &contents).await {
            warn!(
                path = %todo.display(),
                error = %e,
                contents = %String::from_utf8_lossy(&contents),
                "work queue write failed"
            );
            return Err(e);
        }

        info!(
            device = profile.device,
            before = current.len(),
            added = fresh.len(),
            source,
            "work queue refilled"
        );
        Ok(TopOff::Refilled {
            before: current.len(),
            added: fresh.len(),
            source,
        })
    }

    async fn fetch(
        &self,
        count: usize,
        profile: &DeviceProfile,
    ) -> Result<(Vec<String>, &'static str)> {
        for source in &self.sources {
            match source.fetch(count, profile).await {
                Ok(work) if !work.is_empty() => return Ok((work, source.name())),
                Ok(_) => debug!(source = source.name(), "no usable assignments"),
                Err(e) => warn!(source = source.name(), error = %e, "assignment request failed"),
            }
        }
        Err(Error::NoWork { requested: count })
    }
}
