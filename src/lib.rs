//! A user-space operating-system kernel hosting sandboxed Lua programs over
//! a permissioned VFS, a cooperative process manager, and pipe-routed I/O
//! (§1-§2). A host embeds this crate by calling [`Kernel::boot`] then
//! [`Kernel::run`]; everything a guest program sees is reachable only
//! through the three `file`/`process`/`errors` namespaces installed by
//! `script::bindings`.

pub mod config;
pub mod error;
pub mod path;
pub mod process;
pub mod scheduler;
pub mod script;
pub mod stream;
pub mod vfs;

use std::sync::Arc;

use config::KernelConfig;
use error::ProcError;
use process::{CreateOptions, ProcessId, ProcessManager};
use scheduler::Scheduler;
use script::LuaWorker;
use stream::StreamRouter;
use vfs::store::BlockStore;
use vfs::Vfs;

/// A single booted kernel instance: the VFS, process manager, scheduler,
/// and stream router wired together, with PID 1 already created and
/// started from `init_program` (§4.8).
pub struct Kernel {
    vfs: Arc<Vfs>,
    manager: Arc<ProcessManager>,
    init_pid: ProcessId,
}

impl Kernel {
    /// Boot a kernel: construct the VFS over `store`, pull any persisted
    /// state, install the compiled-in `/bin` bundle, then `create` and
    /// `start` PID 1 from `init_program` (§4.8).
    pub fn boot(config: KernelConfig, store: Arc<dyn BlockStore>, init_program: &str) -> Result<Kernel, ProcError> {
        let vfs = Arc::new(Vfs::new(config.clone(), store));
        vfs.pull_from_persist();
        vfs::bootstrap::install(&vfs);

        let table = Arc::new(process::table::ProcessTable::new(config.max_processes));
        let scheduler = Arc::new(Scheduler::new(config.scheduler_quantum));
        let router = Arc::new(StreamRouter::new(config.pipe_capacity));
        let manager = Arc::new(ProcessManager::new(vfs.clone(), table, scheduler, router));

        let worker = Arc::new(LuaWorker::new(vfs.clone(), manager.clone(), &config));
        manager.register_worker(worker)?;

        let init_pid = manager.create_full(None, init_program, CreateOptions::default())?;
        manager.start(init_pid)?;

        log::info!(target: "kernel::process", "booted with init program {init_program} as pid {init_pid}");

        Ok(Kernel { vfs, manager, init_pid })
    }

    /// Create a new top-level process (no parent): resolve `path`/`opts.cwd`
    /// against the VFS root, reject a missing program, and wire whichever
    /// pipes/redirects `opts` requested (§4.3, §6). Mirrors the
    /// `process.create` script binding, with `parent = None`.
    pub fn create(&self, path: &str, opts: CreateOptions) -> Result<ProcessId, ProcError> {
        self.manager.create_full(None, path, opts)
    }

    pub fn start(&self, pid: ProcessId) -> Result<(), ProcError> {
        self.manager.start(pid)
    }

    pub fn wait(&self, pid: ProcessId) -> Result<i32, ProcError> {
        self.manager.wait(pid)
    }

    pub fn kill(&self, pid: ProcessId) -> Result<(), ProcError> {
        self.manager.kill(pid)
    }

    pub fn pipe(&self, out_pid: ProcessId, in_pid: ProcessId) -> Result<(), ProcError> {
        self.manager.pipe(out_pid, in_pid)
    }

    /// Drive the kernel until PID 1 (init) terminates, then return its exit
    /// code — init's exit shuts down the whole system (§4.3, §4.8).
    pub fn run(&self) -> Result<i32, ProcError> {
        let code = self.manager.wait(self.init_pid)?;
        self.vfs.push_to_persist();
        Ok(code)
    }

    /// Request the store to durabilise pending writes without waiting for
    /// shutdown (§4.2's checkpointing).
    pub fn checkpoint(&self) {
        self.vfs.push_to_persist();
    }
}
