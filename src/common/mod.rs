pub mod errors;

pub const MAX_DELETE_ATTEMPTS: u64 = 5;

pub const DEFAULT_STDERR_EXCERPT_CHARS: usize = 100;

pub const DEFAULT_MAX_FILES_PER_BATCH: usize = 10;

pub const DEFAULT_WORKER_TIMEOUT_SECS: u64 = 120;

pub const MAX_RECORD_ID_LEN: usize = 64;

pub const RECORD_EXTENSION: &str = "json";

pub const TEMP_RECORD_EXTENSION: &str = "tmp";

use std::sync::LazyLock;

use tokio::runtime::{Builder, Runtime};

// Dedicated runtime for the HTTP server and every batch it spawns.
// Worker waits are async, so one multi-threaded runtime is enough.
pub static SERVER_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .thread_name("phototrail-worker")
        .enable_all()
        .build()
        .expect("Failed to build server Tokio runtime")
});
