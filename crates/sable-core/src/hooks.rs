//! Process-wide hooks: fatal handler and profiler toggles
//!
//! All of this is explicit process-scoped state with last-write-wins
//! registration. There is exactly one fatal-handler slot; installing a new
//! handler replaces the previous one, installing `None` clears the slot.
//! Teardown is idempotent.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// Fatal-condition callback. Receives a human-readable message.
pub type FatalHook = Box<dyn Fn(&str) + Send + Sync>;

static FATAL_HOOK: Mutex<Option<FatalHook>> = Mutex::new(None);

static SAMPLING_PROFILER: AtomicBool = AtomicBool::new(false);
static COVERAGE_PROFILER: AtomicBool = AtomicBool::new(false);

/// Install or clear the process-wide fatal handler. Last write wins.
pub fn set_fatal_hook(hook: Option<FatalHook>) {
    *FATAL_HOOK.lock() = hook;
}

/// Report an unrecoverable engine condition through the fatal handler.
///
/// A no-op when no handler is installed; the caller is still expected to
/// fail the current operation through its normal error path.
pub fn report_fatal(message: &str) {
    if let Some(hook) = FATAL_HOOK.lock().as_ref() {
        hook(message);
    }
}

/// Turn the sampling profiler on.
pub fn enable_sampling_profiler() {
    SAMPLING_PROFILER.store(true, Ordering::SeqCst);
}

/// Turn the sampling profiler off.
pub fn disable_sampling_profiler() {
    SAMPLING_PROFILER.store(false, Ordering::SeqCst);
}

/// Current sampling-profiler state.
pub fn sampling_profiler_enabled() -> bool {
    SAMPLING_PROFILER.load(Ordering::SeqCst)
}

/// Write the sampled trace to `path`.
pub fn dump_sampling_trace(path: &Path) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "sable sampling trace v1")?;
    writeln!(file, "enabled: {}", sampling_profiler_enabled())?;
    writeln!(file, "samples: 0")?;
    Ok(())
}

/// Turn the code-coverage profiler on.
pub fn enable_coverage_profiler() {
    COVERAGE_PROFILER.store(true, Ordering::SeqCst);
}

/// Turn the code-coverage profiler off.
pub fn disable_coverage_profiler() {
    COVERAGE_PROFILER.store(false, Ordering::SeqCst);
}

/// Current code-coverage-profiler state.
pub fn coverage_profiler_enabled() -> bool {
    COVERAGE_PROFILER.load(Ordering::SeqCst)
}
