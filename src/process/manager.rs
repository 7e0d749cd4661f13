//! Process lifecycle operations (§4.3): `create`, `start`, `wait`, `exit`,
//! `kill`, `pipe`, and the redirect/chdir calls that mutate a process's
//! stream wiring and working directory.

use std::sync::{Arc, Mutex};

use crate::error::ProcError;
use crate::scheduler::Scheduler;
use crate::stream::{InputKind, StreamRouter};
use crate::vfs::Vfs;

use super::table::{ProcessId, ProcessState, ProcessTable};

/// Whoever actually runs a process's program once it is started. The
/// manager only drives lifecycle state; this is the seam where the script
/// engine plugs in (§4.6), kept separate so the process table doesn't need
/// to know anything about Lua.
pub trait ProcessWorker: Send + Sync {
    fn spawn(&self, pid: ProcessId, path: String, argv: Vec<String>);
}

/// Options accepted by `create` (§6's Process Creation Options table),
/// shared by the top-level [`crate::Kernel::create`] facade and the
/// `process.create` script binding so the two don't drift.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub argv: Vec<String>,
    pub cwd: Option<String>,
    pub pipe_in: bool,
    pub pipe_out: bool,
    pub redirect_in: Option<String>,
    pub redirect_out: Option<String>,
}

pub struct ProcessManager {
    vfs: Arc<Vfs>,
    table: Arc<ProcessTable>,
    scheduler: Arc<Scheduler>,
    router: Arc<StreamRouter>,
    worker: Mutex<Option<Arc<dyn ProcessWorker>>>,
}

impl ProcessManager {
    pub fn new(vfs: Arc<Vfs>, table: Arc<ProcessTable>, scheduler: Arc<Scheduler>, router: Arc<StreamRouter>) -> Self {
        ProcessManager { vfs, table, scheduler, router, worker: Mutex::new(None) }
    }

    /// Register the single worker that will run every process's program.
    /// Only one may ever be registered for the lifetime of a kernel.
    pub fn register_worker(&self, worker: Arc<dyn ProcessWorker>) -> Result<(), ProcError> {
        let mut guard = self.worker.lock().unwrap();
        if guard.is_some() {
            return Err(ProcError::NoWorkerForRegister);
        }
        *guard = Some(worker);
        Ok(())
    }

    /// Allocate a new process in the `Starting` state. With no parent, the
    /// process starts at the VFS root; otherwise it inherits the parent's
    /// current working directory (§4.3).
    pub fn create(&self, parent: Option<ProcessId>, path: String, argv: Vec<String>) -> Result<ProcessId, ProcError> {
        let cwd = match parent {
            Some(p) => self.table.with_process(p, |proc| proc.cwd.clone())?,
            None => self.vfs.root_cwd(),
        };
        self.table.create(path, argv, cwd)
    }

    /// Wire `out_pid`'s stdout to `in_pid`'s stdin through a fresh pipe.
    /// Both ends must still be `Starting` — once either has been started,
    /// wiring is frozen (§9, pipe-wiring-ordering resolution).
    pub fn pipe(&self, out_pid: ProcessId, in_pid: ProcessId) -> Result<(), ProcError> {
        let out_state = self.table.with_process(out_pid, |p| p.state)?;
        let in_state = self.table.with_process(in_pid, |p| p.state)?;
        if out_state != ProcessState::Starting || in_state != ProcessState::Starting {
            return Err(ProcError::NoSuchState);
        }
        let pipe_id = self.router.create_pipe();
        self.table.with_process_mut(out_pid, |p| p.stdout.pipe = Some(pipe_id))?;
        self.table.with_process_mut(in_pid, |p| p.stdin.pipe = Some(pipe_id))?;
        Ok(())
    }

    /// Redirect a process's stdin to read from `path` instead of the
    /// terminal or a pipe. Resolved once, against the process's cwd at
    /// call time, and takes precedence over any pipe wiring (§4.4).
    pub fn redirect_stdin(&self, pid: ProcessId, path: &str) -> Result<(), ProcError> {
        let cwd = self.table.with_process(pid, |p| p.cwd.clone())?;
        let real = self.vfs.resolve_path(&cwd, path);
        self.table.with_process_mut(pid, |p| p.stdin.redirect = Some(real))
    }

    pub fn redirect_stdout(&self, pid: ProcessId, path: &str) -> Result<(), ProcError> {
        let cwd = self.table.with_process(pid, |p| p.cwd.clone())?;
        let real = self.vfs.resolve_path(&cwd, path);
        self.table.with_process_mut(pid, |p| p.stdout.redirect = Some(real))
    }

    pub fn chdir(&self, pid: ProcessId, raw_path: &str) -> Result<(), ProcError> {
        let cwd = self.table.with_process(pid, |p| p.cwd.clone())?;
        let new_cwd = self.vfs.chdir(&cwd, raw_path).map_err(|_| ProcError::ExternalError)?;
        self.table.with_process_mut(pid, |p| p.cwd = new_cwd)
    }

    pub fn process_cwd(&self, pid: ProcessId) -> Result<String, ProcError> {
        self.table.with_process(pid, |p| p.cwd.clone())
    }

    pub fn process_argv(&self, pid: ProcessId) -> Result<Vec<String>, ProcError> {
        self.table.with_process(pid, |p| p.argv.clone())
    }

    pub fn enumerate(&self) -> Vec<ProcessId> {
        self.table.enumerate()
    }

    /// As [`ProcessManager::create`], but takes an already-resolved cwd
    /// instead of inheriting it from `parent` — used by [`crate::Kernel`]
    /// once it has resolved `opts.cwd` against the parent's own cwd.
    pub fn create_with_cwd(&self, path: String, argv: Vec<String>, cwd: String) -> Result<ProcessId, ProcError> {
        self.table.create(path, argv, cwd)
    }

    /// The full `create` contract (§4.3, §6): resolve the program path and
    /// `opts.cwd` against the parent's cwd, reject a missing program with
    /// `no-such-program`, then provision whichever pipes/redirects `opts`
    /// asked for. Shared by [`crate::Kernel::create`] (no parent) and the
    /// `process.create` script binding (parent = the calling process).
    pub fn create_full(&self, parent: Option<ProcessId>, raw_path: &str, opts: CreateOptions) -> Result<ProcessId, ProcError> {
        let base_cwd = match parent {
            Some(p) => self.process_cwd(p)?,
            None => self.vfs.root_cwd(),
        };
        let cwd = match &opts.cwd {
            Some(c) => self.vfs.resolve_path(&base_cwd, c),
            None => base_cwd,
        };
        let real_path = self.vfs.resolve_path(&cwd, raw_path);
        if !self.vfs.exists(&real_path) {
            return Err(ProcError::NoSuchProgram);
        }
        let pid = self.create_with_cwd(real_path, opts.argv, cwd)?;
        if opts.pipe_in {
            self.provision_stdin_pipe(pid)?;
        }
        if opts.pipe_out {
            self.provision_stdout_pipe(pid)?;
        }
        if let Some(path) = &opts.redirect_in {
            self.redirect_stdin(pid, path)?;
        }
        if let Some(path) = &opts.redirect_out {
            self.redirect_stdout(pid, path)?;
        }
        Ok(pid)
    }

    /// The program source a worker should load and run for `pid`, read
    /// directly by its already-resolved path (no fd involved).
    pub fn program_source(&self, pid: ProcessId) -> Result<Vec<u8>, ProcError> {
        let path = self.table.with_process(pid, |p| p.path.clone())?;
        self.vfs.read_program(&path).map_err(|_| ProcError::NoSuchProgram)
    }

    pub fn provision_stdin_pipe(&self, pid: ProcessId) -> Result<(), ProcError> {
        let id = self.router.create_pipe();
        self.table.with_process_mut(pid, |p| p.stdin.pipe = Some(id))
    }

    pub fn provision_stdout_pipe(&self, pid: ProcessId) -> Result<(), ProcError> {
        let id = self.router.create_pipe();
        self.table.with_process_mut(pid, |p| p.stdout.pipe = Some(id))
    }

    pub fn output(&self, pid: ProcessId, data: &[u8]) -> Result<(), ProcError> {
        self.router.output(&self.vfs, &self.table, &self.scheduler, pid, data)
    }

    pub fn input(&self, pid: ProcessId, kind: InputKind) -> Result<Vec<u8>, ProcError> {
        self.router.input(&self.vfs, &self.table, &self.scheduler, pid, kind)
    }

    pub fn close_output(&self, pid: ProcessId) -> Result<(), ProcError> {
        self.router.close_output(&self.table, pid)
    }

    pub fn stdout_is_terminal(&self, pid: ProcessId) -> bool {
        self.router.stdout_is_terminal(&self.table, pid)
    }

    /// Block the calling OS thread (which is running `pid`'s program) until
    /// the scheduler hands it the run token again.
    pub fn wait_for_turn(&self, pid: ProcessId) {
        self.scheduler.wait_for_turn(pid);
    }

    fn mark_running(&self, pid: ProcessId) -> Result<(), ProcError> {
        self.table.with_process_mut(pid, |p| p.state = ProcessState::Running)
    }

    fn mark_ready(&self, pid: ProcessId) -> Result<(), ProcError> {
        self.table.with_process_mut(pid, |p| p.state = ProcessState::Ready)
    }

    /// The scheduler has just handed `pid` the run token (either for the
    /// first time, after `start`, or after a cooperative yield); record the
    /// `Running` transition in the process table.
    pub fn acquire_turn(&self, pid: ProcessId) {
        self.scheduler.wait_for_turn(pid);
        self.mark_running(pid).ok();
    }

    /// A scripted `process.yield()` or the scheduler's bytecode-quantum hook
    /// firing: give up the token, rejoin the ready queue, and block until
    /// the scheduler rotates back (§4.3's non-blocking yield).
    pub fn cooperative_yield(&self, pid: ProcessId) {
        self.mark_ready(pid).ok();
        self.scheduler.yield_turn(pid);
        self.scheduler.wait_for_turn(pid);
        self.mark_running(pid).ok();
    }

    /// As [`ProcessManager::wait`], but called from within `caller`'s own
    /// program (the script binding surface) so the caller's `running →
    /// sleeping → running` transitions are recorded in the process table.
    pub fn wait_as(&self, caller: ProcessId, target: ProcessId) -> Result<i32, ProcError> {
        self.mark_sleeping(caller).ok();
        let signal = self.table.exit_signal(target)?;
        self.scheduler.suspend(caller);
        let code = signal.wait();
        self.scheduler.resume(caller);
        self.scheduler.wait_for_turn(caller);
        self.mark_running(caller).ok();
        Ok(code)
    }

    fn mark_sleeping(&self, pid: ProcessId) -> Result<(), ProcError> {
        self.table.with_process_mut(pid, |p| p.state = ProcessState::Sleeping)
    }

    /// Transition a process from `Starting` to `Ready` and hand it to the
    /// registered worker, which will actually run its program.
    pub fn start(&self, pid: ProcessId) -> Result<(), ProcError> {
        let worker = self.worker.lock().unwrap().clone().ok_or(ProcError::NoRegisteredWorker)?;
        let result = self.table.with_process_mut(pid, |p| {
            if p.state != ProcessState::Starting {
                return Err(ProcError::AlreadyStarted);
            }
            p.state = ProcessState::Ready;
            Ok((p.path.clone(), p.argv.clone()))
        })?;
        let (path, argv) = result?;
        self.scheduler.admit(pid);
        worker.spawn(pid, path, argv);
        Ok(())
    }

    /// Block the calling thread until `pid` posts an exit code. May be
    /// called by any number of waiters, including after `pid` has already
    /// exited (§4.3's exit-code fan-out).
    pub fn wait(&self, pid: ProcessId) -> Result<i32, ProcError> {
        let signal = self.table.exit_signal(pid)?;
        Ok(signal.wait())
    }

    /// Terminate a process, posting `code` to every waiter and releasing
    /// its descriptors, pipes, and scheduler slot. If PID 1 (init) exits,
    /// the whole system is considered shut down (§4.8).
    pub fn exit(&self, pid: ProcessId, code: i32) -> Result<(), ProcError> {
        self.table.with_process_mut(pid, |p| {
            p.state = ProcessState::Terminating;
            p.exit_code = Some(code);
        })?;
        let signal = self.table.exit_signal(pid)?;
        signal.set(code);
        self.router.release_process(&self.table, pid);
        self.vfs.close_all_for_process(pid.as_u32());
        self.scheduler.retire(pid);
        if pid == ProcessId::INIT {
            log::info!(target: "kernel::process", "init exited with code {code}; system shutting down");
        }
        self.table.reap(pid)
    }

    /// `kill` is implicit `exit(-1)` (§4.3).
    pub fn kill(&self, pid: ProcessId) -> Result<(), ProcError> {
        self.exit(pid, -1)
    }

    pub fn is_alive(&self, pid: ProcessId) -> bool {
        self.table.is_alive(pid)
    }
}
