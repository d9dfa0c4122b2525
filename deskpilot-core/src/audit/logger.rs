//! Write side of the run audit.
//!
//! [`RunLogger`] keeps an in-memory cache of [`RunContext`]s keyed by run
//! id.  The cache is bounded by [`MAX_CACHED_RUNS`]; inserting past the
//! bound evicts the least-recently-accessed contexts and closes their log
//! files.  Eviction never touches data on disk.  An evicted context is
//! retired: it refuses further writes, so a caller still holding it goes
//! back through the cache and every run has at most one open writer.
//!
//! # Locking
//!
//! The cache map lock is held only for lookup, insert, and eviction.  File
//! writes happen under each context's own lock, so loggers for different
//! runs never wait on each other while lines for one run are never
//! interleaved.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{is_valid_id, StepLogEntry, SCREENSHOTS_DIR, STEPS_FILE};
use crate::capture::CaptureFormat;
use crate::errors::AutomationError;

/// Maximum number of run contexts kept in memory.
pub const MAX_CACHED_RUNS: usize = 50;

fn check_id(kind: &str, id: &str) -> Result<(), AutomationError> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(AutomationError::Validation(format!("invalid {kind} id {id:?}")))
    }
}

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StepLog {
    writer: Option<BufWriter<File>>,
    retired: bool,
}

fn retired(run_id: &str) -> AutomationError {
    AutomationError::NotFound(format!("run context {run_id} was evicted"))
}

/// Storage for one run: a lazily-opened append-only step log and a
/// screenshot directory.
#[derive(Debug)]
pub struct RunContext {
    run_id: String,
    dir: PathBuf,
    last_access: AtomicU64,
    steps: Mutex<StepLog>,
}

impl RunContext {
    fn new(run_id: &str, root: &Path, tick: u64) -> Self {
        Self {
            run_id: run_id.to_owned(),
            dir: root.join(run_id),
            last_access: AtomicU64::new(tick),
            steps: Mutex::new(StepLog::default()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn touch(&self, tick: u64) {
        self.last_access.fetch_max(tick, Ordering::Relaxed);
    }

    fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Append one JSON line.  The run directory and log file are created on
    /// first use.  Fails once the context has been evicted; use
    /// [`RunLogger::log_step`] to write through the current context.
    pub fn append_step(&self, entry: &StepLogEntry) -> Result<(), AutomationError> {
        if self.try_append(entry)? {
            Ok(())
        } else {
            Err(retired(&self.run_id))
        }
    }

    /// `Ok(false)` when retired; nothing is written.
    fn try_append(&self, entry: &StepLogEntry) -> Result<bool, AutomationError> {
        let mut steps = self.steps.lock();
        if steps.retired {
            return Ok(false);
        }
        if steps.writer.is_none() {
            fs::create_dir_all(&self.dir)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.dir.join(STEPS_FILE))?;
            steps.writer = Some(BufWriter::new(file));
        }
        if let Some(writer) = steps.writer.as_mut() {
            serde_json::to_writer(&mut *writer, entry)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        Ok(true)
    }

    /// Write `screenshots/step_<step_id>.<ext>` and return that relative
    /// path.
    pub fn save_screenshot(&self, step_id: &str, bytes: &[u8], format: CaptureFormat) -> Result<String, AutomationError> {
        check_id("step", step_id)?;

        let steps = self.steps.lock();
        if steps.retired {
            return Err(retired(&self.run_id));
        }
        let dir = self.dir.join(SCREENSHOTS_DIR);
        fs::create_dir_all(&dir)?;

        let file_name = format!("step_{step_id}.{}", format.extension());
        fs::write(dir.join(&file_name), bytes)?;
        Ok(format!("{SCREENSHOTS_DIR}/{file_name}"))
    }

    /// Flush and close the step log for good.  Waits for an in-flight
    /// append to finish.
    fn retire(&self) {
        let mut steps = self.steps.lock();
        steps.retired = true;
        if let Some(mut writer) = steps.writer.take() {
            if let Err(e) = writer.flush() {
                log::warn!("run {}: flush on close failed: {e}", self.run_id);
            }
        }
    }

    pub fn is_retired(&self) -> bool {
        self.steps.lock().retired
    }
}

// ---------------------------------------------------------------------------
// RunLogger
// ---------------------------------------------------------------------------

/// Bounded cache of run contexts over a runs root directory.
#[derive(Debug)]
pub struct RunLogger {
    root: PathBuf,
    runs: Mutex<HashMap<String, Arc<RunContext>>>,
    clock: AtomicU64,
}

impl RunLogger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            runs: Mutex::new(HashMap::new()),
            clock: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Cached context for `run_id`, created on first request.  Touches the
    /// context's access time.
    pub fn get_or_create_run(&self, run_id: &str) -> Result<Arc<RunContext>, AutomationError> {
        check_id("run", run_id)?;
        let tick = self.tick();

        let mut runs = self.runs.lock();
        if let Some(ctx) = runs.get(run_id) {
            ctx.touch(tick);
            return Ok(Arc::clone(ctx));
        }

        let ctx = Arc::new(RunContext::new(run_id, &self.root, tick));
        runs.insert(run_id.to_owned(), Arc::clone(&ctx));
        Self::evict_excess(&mut runs);
        Ok(ctx)
    }

    fn evict_excess(runs: &mut HashMap<String, Arc<RunContext>>) {
        if runs.len() <= MAX_CACHED_RUNS {
            return;
        }

        let mut by_age: Vec<(u64, String)> = runs
            .iter()
            .map(|(id, ctx)| (ctx.last_access(), id.clone()))
            .collect();
        by_age.sort_unstable();

        let excess = runs.len() - MAX_CACHED_RUNS;
        for (_, id) in by_age.into_iter().take(excess) {
            if let Some(ctx) = runs.remove(&id) {
                log::debug!("evicting run context {id}");
                ctx.retire();
            }
        }
    }

    /// Whether `run_id` is currently cached (not whether it exists on disk).
    pub fn has_run(&self, run_id: &str) -> bool {
        self.runs.lock().contains_key(run_id)
    }

    pub fn cached_runs(&self) -> usize {
        self.runs.lock().len()
    }

    pub fn log_step(&self, run_id: &str, entry: &StepLogEntry) -> Result<(), AutomationError> {
        // A context retired between lookup and append is replaced by the
        // next lookup.
        loop {
            if self.get_or_create_run(run_id)?.try_append(entry)? {
                return Ok(());
            }
        }
    }

    pub fn save_screenshot(
        &self,
        run_id: &str,
        step_id: &str,
        bytes: &[u8],
        format: CaptureFormat,
    ) -> Result<String, AutomationError> {
        loop {
            let ctx = self.get_or_create_run(run_id)?;
            match ctx.save_screenshot(step_id, bytes, format) {
                Err(_) if ctx.is_retired() => continue,
                result => return result,
            }
        }
    }
}

impl Drop for RunLogger {
    fn drop(&mut self) {
        for ctx in self.runs.get_mut().values() {
            ctx.retire();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
