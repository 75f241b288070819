//! Result reconciliation
//!
//! Decides which lines of `results.txt` can be sent to the server and which
//! must stay. A result whose exponent still appears in `worktodo.txt` belongs
//! to work the client has not finished (typically an intermediate line of a
//! multi-stage run) and is kept. Everything else is submitted, recorded in
//! the `results_sent.txt` ledger chunk by chunk, and removed from
//! `results.txt` once every chunk has been acknowledged.
//!
//! The GIMPS client does not honour the marker files and may append to
//! `results.txt` while a submission is in flight. Before the file is
//! rewritten it is read again, and whatever arrived since the first read is
//! written back after the retained records.

use crate::config::DeviceProfile;
use crate::error::Result;
use crate::lock::LockManager;
use crate::records::{RecordGrammar, normalize_line_ending_bytes, normalize_line_endings};
use crate::submit::BatchSubmitter;
use crate::utils::{
    append_to_file, join_lines, read_bytes_or_empty, read_text_or_empty, rewrite_file,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// What to do with one result record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Work is still queued; keep the record locally
    Retain,
    /// Work is finished; send the record
    Submit,
}

/// Result records split by [`Disposition`], each side in file order
#[derive(Debug, PartialEq, Eq)]
pub struct Classified<R> {
    /// Records to keep in the results file
    pub retain: Vec<R>,
    /// Records to submit
    pub submit: Vec<R>,
}

/// Classify result `records` against the queue text
///
/// The first record seen for a key decides the disposition of every later
/// record with the same key. A record for which `key_of` finds no key is
/// retained, since it cannot be proven finished.
pub fn classify_results<'a, R, K>(records: &[R], key_of: K, queue: &str) -> Classified<R>
where
    R: Copy + AsRef<[u8]>,
    K: Fn(R) -> Option<&'a str>,
{
    let mut decided: HashMap<&'a str, Disposition> = HashMap::new();
    let mut out = Classified {
        retain: Vec::new(),
        submit: Vec::new(),
    };

    for &record in records {
        let disposition = match key_of(record) {
            Some(key) => *decided.entry(key).or_insert_with(|| {
                if queue.contains(key) {
                    Disposition::Retain
                } else {
                    Disposition::Submit
                }
            }),
            None => {
                debug!(
                    record = %String::from_utf8_lossy(record.as_ref()),
                    "result without key, keeping it"
                );
                Disposition::Retain
            }
        };

        match disposition {
            Disposition::Retain => out.retain.push(record),
            Disposition::Submit => out.submit.push(record),
        }
    }

    out
}

/// Summary of one reconcile pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Result records kept in the results file
    pub retained: usize,
    /// Result records sent and removed
    pub submitted: usize,
    /// Chunks the service acknowledged
    pub chunks: usize,
}

impl ReconcileOutcome {
    /// True if the results file held no result records at all
    pub fn is_noop(&self) -> bool {
        self.retained == 0 && self.submitted == 0
    }
}

/// Owner of the results file and the submission ledger
pub struct ResultReconciler {
    locks: LockManager,
    grammar: RecordGrammar,
    submitter: BatchSubmitter,
}

impl ResultReconciler {
    /// Create a reconciler
    pub fn new(locks: LockManager, grammar: RecordGrammar, submitter: BatchSubmitter) -> Self {
        Self {
            locks,
            grammar,
            submitter,
        }
    }

    /// Submit the finished results of one device
    ///
    /// Holds the results, ledger and queue locks for the whole pass. If any
    /// chunk is rejected the call fails and `results.txt` is left untouched;
    /// chunks accepted before the failure stay in the ledger. Retained
    /// records are written back byte for byte.
    pub async fn reconcile(&self, profile: &DeviceProfile) -> Result<ReconcileOutcome> {
        let files = &profile.files;
        let guard = self
            .locks
            .acquire(&[&files.results, &files.sent, &files.todo])
            .await?;
        let result = self.reconcile_locked(profile).await;
        guard.release().await;
        result
    }

    async fn reconcile_locked(&self, profile: &DeviceProfile) -> Result<ReconcileOutcome> {
        let files = &profile.files;
        let queue = normalize_line_endings(&read_text_or_empty(&files.todo).await?);
        let snapshot = read_bytes_or_empty(&files.results).await?;
        let results = normalize_line_ending_bytes(&snapshot);

        let records = self.grammar.results(&results);
        if records.is_empty() {
            debug!(device = profile.device, "no results to reconcile");
            return Ok(ReconcileOutcome::default());
        }

        let classified = classify_results(&records, |r| self.grammar.result_key(r), &queue);
        let mut outcome = ReconcileOutcome {
            retained: classified.retain.len(),
            submitted: 0,
            chunks: 0,
        };
        if classified.submit.is_empty() {
            debug!(
                device = profile.device,
                retained = outcome.retained,
                "all results belong to queued work"
            );
            return Ok(outcome);
        }

        let blob = String::from_utf8_lossy(&join_lines(&classified.submit)).into_owned();
        let blob = blob.trim_end();

        let ledger = &files.sent;
        outcome.chunks = self
            .submitter
            .submit(blob, move |chunk| async move {
                append_to_file(ledger, format!("{chunk}\n"))
                    .await
                    .inspect_err(|e| {
                        warn!(path = %ledger.display(), error = %e, "ledger append failed");
                    })
            })
            .await?;
        outcome.submitted = classified.submit.len();

        let current = read_bytes_or_empty(&files.results).await?;
        let late = self.written_since(&snapshot, &records, &current);
        if !late.is_empty() {
            info!(
                device = profile.device,
                bytes = late.len(),
                "keeping results written during submission"
            );
        }
        let mut contents = join_lines(&classified.retain);
        contents.extend_from_slice(&late);

        rewrite_file(&files.results, &contents)
            .await
            .inspect_err(|e| {
                warn!(
                    path = %files.results.display(),
                    error = %e,
                    "results rewrite failed after submission"
                );
            })?;

        info!(
            device = profile.device,
            submitted = outcome.submitted,
            retained = outcome.retained,
            chunks = outcome.chunks,
            "results reconciled"
        );
        Ok(outcome)
    }

    /// What the results file gained between the `snapshot` read and `current`
    ///
    /// An appended file yields its new bytes verbatim. If the file was
    /// replaced instead, its result records not among `seen` are returned,
    /// one per line.
    fn written_since(&self, snapshot: &[u8], seen: &[&[u8]], current: &[u8]) -> Vec<u8> {
        if let Some(tail) = current.strip_prefix(snapshot) {
            return tail.to_vec();
        }

        let seen: HashSet<&[u8]> = seen.iter().copied().collect();
        let current = normalize_line_ending_bytes(current);
        let fresh: Vec<&[u8]> = self
            .grammar
            .results(&current)
            .into_iter()
            .filter(|record| !seen.contains(record))
            .collect();
        join_lines(&fresh)
    }
}
