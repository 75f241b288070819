//! Common test utilities for end-to-end tests

#[allow(dead_code)]
pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::*;

use primenet_manager::{
    BatchSubmitter, DeviceProfile, LockManager, ManagerMode, PrimenetClient, RecordGrammar,
    ResultReconciler, WorkCache, retry::FixedRetry,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use url::Url;
use wiremock::MockServer;

/// Primenet user the mock server expects
pub const USER: &str = "alice";

/// A device profile rooted in a fresh temporary directory
///
/// The directory lives as long as the returned [`TempDir`].
pub fn temp_device(depth: usize) -> (TempDir, DeviceProfile) {
    let temp_dir = TempDir::new().expect("temp dir");
    let profile = DeviceProfile {
        cache: depth,
        ..DeviceProfile::in_dir(temp_dir.path())
    };
    (temp_dir, profile)
}

/// Lock manager with short retry delays
pub fn quick_locks() -> LockManager {
    LockManager::new(FixedRetry::new(2, Duration::from_millis(10)))
}

/// Primenet client pointed at the mock server
pub fn primenet(server: &MockServer, mode: ManagerMode) -> Arc<PrimenetClient> {
    let grammar = RecordGrammar::for_mode(mode).expect("grammar");
    Arc::new(
        PrimenetClient::new(
            Url::parse(&server.uri()).expect("mock url"),
            USER,
            "secret",
            mode,
            grammar,
        )
        .expect("client"),
    )
}

/// Work cache fetching only from `client`
pub fn work_cache(client: Arc<PrimenetClient>, mode: ManagerMode) -> WorkCache {
    let grammar = RecordGrammar::for_mode(mode).expect("grammar");
    WorkCache::new(quick_locks(), grammar, vec![client])
}

/// Reconciler submitting to `client` in chunks of at most `limit` bytes
pub fn reconciler(
    client: Arc<PrimenetClient>,
    mode: ManagerMode,
    limit: usize,
) -> ResultReconciler {
    let grammar = RecordGrammar::for_mode(mode).expect("grammar");
    ResultReconciler::new(
        quick_locks(),
        grammar,
        BatchSubmitter::with_limit(client, limit),
    )
}

/// Read a file that must exist
pub fn read(path: &std::path::Path) -> String {
    std::fs::read_to_string(path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}
