//! Owning-process names via the `sysinfo` crate.
//!
//! Window enumeration only yields process ids.  Names are resolved in one
//! batch per enumeration against a shared process table.
//!
//! The table lives for the whole process and is created on first lookup.
//! Lookups from concurrent enumerations take turns on its lock, so each
//! one sees a fully refreshed table.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

// ---------------------------------------------------------------------------
// Singleton
// ---------------------------------------------------------------------------

static SYSTEM: OnceLock<Mutex<System>> = OnceLock::new();

fn get_system() -> &'static Mutex<System> {
    SYSTEM.get_or_init(|| Mutex::new(System::new()))
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Strip a trailing `.exe` (any case) so names compare the way users type
/// them (`notepad`, not `notepad.exe`).
pub fn normalize_process_name(name: &str) -> String {
    let trimmed = name.trim();
    let cut = trimmed.len().saturating_sub(4);
    match trimmed.get(cut..) {
        Some(suffix) if cut > 0 && suffix.eq_ignore_ascii_case(".exe") => trimmed[..cut].to_owned(),
        _ => trimmed.to_owned(),
    }
}

/// Resolve names for `pids` with a single process-table refresh.
///
/// Unknown or exited processes are absent from the returned map.  This
/// function is blocking (holds the sysinfo mutex).
pub fn lookup_process_names(pids: &[u32]) -> HashMap<u32, String> {
    let mut names = HashMap::with_capacity(pids.len());
    if pids.is_empty() {
        return names;
    }

    let mut sys = get_system().lock();
    sys.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::nothing());

    for &pid in pids {
        if pid == 0 || names.contains_key(&pid) {
            continue;
        }
        if let Some(process) = sys.process(Pid::from_u32(pid)) {
            names.insert(pid, normalize_process_name(&process.name().to_string_lossy()));
        }
    }
    names
}
