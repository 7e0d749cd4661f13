//! The registered [`ProcessWorker`] (§4.3, §4.6): one OS thread per
//! process, each driving its own `mlua` instance to completion. Kept
//! separate from [`ProcessManager`] so the process table never needs to
//! know anything about Lua.

use std::sync::Arc;
use std::thread;

use crate::config::KernelConfig;
use crate::process::{ProcessId, ProcessManager, ProcessWorker};
use crate::vfs::Vfs;

use super::bindings;
use super::terminal::TerminalBindings;

pub struct LuaWorker {
    vfs: Arc<Vfs>,
    manager: Arc<ProcessManager>,
    terminal: Arc<TerminalBindings>,
    quantum: u32,
}

impl LuaWorker {
    pub fn new(vfs: Arc<Vfs>, manager: Arc<ProcessManager>, config: &KernelConfig) -> Self {
        LuaWorker {
            vfs,
            manager,
            terminal: Arc::new(TerminalBindings::new(config.terminal_history_depth)),
            quantum: config.scheduler_quantum,
        }
    }
}

impl ProcessWorker for LuaWorker {
    fn spawn(&self, pid: ProcessId, path: String, argv: Vec<String>) {
        let vfs = self.vfs.clone();
        let manager = self.manager.clone();
        let terminal = self.terminal.clone();
        let quantum = self.quantum;

        let spawned = thread::Builder::new()
            .name(format!("proc-{pid}"))
            .spawn(move || run(vfs, manager, terminal, pid, path, argv, quantum));

        if let Err(e) = spawned {
            log::error!(target: "kernel::script", "failed to spawn thread for process {pid}: {e}");
            self.manager.exit(pid, 1).ok();
        }
    }
}

/// The body of a process's OS thread: acquire the scheduler token, load and
/// run its program, then exit with that run's result — unless the program
/// already called `process.exit`/`errors.ok` itself, in which case the
/// process table has already been reaped and this is a no-op.
fn run(
    vfs: Arc<Vfs>,
    manager: Arc<ProcessManager>,
    terminal: Arc<TerminalBindings>,
    pid: ProcessId,
    path: String,
    argv: Vec<String>,
    quantum: u32,
) {
    manager.acquire_turn(pid);

    let source = match manager.program_source(pid) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::error!(target: "kernel::script", "process {pid} could not load {path}: {e}");
            manager.exit(pid, 1).ok();
            return;
        }
    };

    let lua = match bindings::new_sandboxed_lua(vfs, manager.clone(), terminal, pid, quantum) {
        Ok(lua) => lua,
        Err(e) => {
            log::error!(target: "kernel::script", "process {pid} interpreter setup failed: {e}");
            manager.exit(pid, 1).ok();
            return;
        }
    };

    let result: mlua::Result<()> = lua
        .load(&source[..])
        .set_name(&path)
        .call(mlua::Variadic::from_iter(argv));

    if manager.is_alive(pid) {
        let code = match result {
            Ok(()) => 0,
            Err(e) => {
                log::warn!(target: "kernel::script", "process {pid} ({path}) failed: {e}");
                1
            }
        };
        manager.exit(pid, code).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::scheduler::Scheduler;
    use crate::stream::StreamRouter;
    use crate::vfs::node::Permissions;
    use crate::vfs::store::MemoryBlockStore;
    use crate::process::ProcessTable;

    fn setup() -> (Arc<Vfs>, Arc<ProcessManager>) {
        let cfg = KernelConfig::for_tests();
        let vfs = Arc::new(Vfs::new(cfg.clone(), MemoryBlockStore::new()));
        let table = Arc::new(ProcessTable::new(cfg.max_processes));
        let scheduler = Arc::new(Scheduler::new(cfg.scheduler_quantum));
        let router = Arc::new(StreamRouter::new(cfg.pipe_capacity));
        let manager = Arc::new(ProcessManager::new(vfs.clone(), table, scheduler, router));
        let worker = Arc::new(LuaWorker::new(vfs.clone(), manager.clone(), &cfg));
        manager.register_worker(worker).unwrap();
        (vfs, manager)
    }

    #[test]
    fn a_simple_script_runs_to_completion_and_exits_zero() {
        let (vfs, manager) = setup();
        vfs.install_system_file("/bin/noop", b"local x = 1 + 1", Permissions::owner_rwx());
        let pid = manager.create(None, "/bin/noop".into(), vec![]).unwrap();
        manager.start(pid).unwrap();
        let code = manager.wait(pid).unwrap();
        assert_eq!(code, 0);
    }

    #[test]
    fn a_script_error_exits_nonzero() {
        let (vfs, manager) = setup();
        vfs.install_system_file("/bin/bad", b"error('boom')", Permissions::owner_rwx());
        let pid = manager.create(None, "/bin/bad".into(), vec![]).unwrap();
        manager.start(pid).unwrap();
        let code = manager.wait(pid).unwrap();
        assert_eq!(code, 1);
    }

    #[test]
    fn process_exit_from_the_script_reports_its_own_code() {
        let (vfs, manager) = setup();
        vfs.install_system_file("/bin/exiter", b"process.exit(7)", Permissions::owner_rwx());
        let pid = manager.create(None, "/bin/exiter".into(), vec![]).unwrap();
        manager.start(pid).unwrap();
        let code = manager.wait(pid).unwrap();
        assert_eq!(code, 7);
    }

    #[test]
    fn a_script_can_write_then_read_back_its_own_file() {
        let (vfs, manager) = setup();
        let source = br#"
            local fd = file.open("/note.txt", "cw")
            file.write(fd, "hello")
            file.close(fd)
            local fd2 = file.open("/note.txt", "r")
            local data = file.read_all(fd2)
            if data ~= "hello" then error("round trip mismatch: " .. tostring(data)) end
        "#;
        vfs.install_system_file("/bin/roundtrip", source, Permissions::owner_rwx());
        let pid = manager.create(None, "/bin/roundtrip".into(), vec![]).unwrap();
        manager.start(pid).unwrap();
        assert_eq!(manager.wait(pid).unwrap(), 0);
    }

    #[test]
    fn a_script_cannot_remove_a_protected_system_file() {
        let (vfs, manager) = setup();
        vfs.install_system_file("/bin/guarded", b"local x = 1", Permissions::owner_rwx());
        let source = br#"
            local ok, err = file.remove("/bin/guarded")
            if ok then error("protected file was removed") end
            if errors.as_string(err) ~= "protected system file" then error("wrong error: " .. errors.as_string(err)) end
        "#;
        vfs.install_system_file("/bin/attacker", source, Permissions::owner_rwx());
        let pid = manager.create(None, "/bin/attacker".into(), vec![]).unwrap();
        manager.start(pid).unwrap();
        assert_eq!(manager.wait(pid).unwrap(), 0);
    }

    #[test]
    fn a_script_cannot_escape_the_confined_root_via_dot_dot() {
        let (vfs, manager) = setup();
        let source = br#"
            local fd, err = file.open("/../../etc/passwd", "r")
            if fd then error("escaped the confined root") end
            if errors.as_string(err) ~= "no such file or directory" then error("wrong error: " .. errors.as_string(err)) end
        "#;
        vfs.install_system_file("/bin/escaper", source, Permissions::owner_rwx());
        let pid = manager.create(None, "/bin/escaper".into(), vec![]).unwrap();
        manager.start(pid).unwrap();
        assert_eq!(manager.wait(pid).unwrap(), 0);
    }

    #[test]
    fn two_piped_scripts_fan_data_from_producer_to_consumer() {
        let (vfs, manager) = setup();
        vfs.install_system_file("/bin/producer", b"output(\"ping\")", Permissions::owner_rwx());
        vfs.install_system_file(
            "/bin/consumer",
            br#"
                local data = input_all()
                if data ~= "ping" then error("unexpected pipe payload: " .. tostring(data)) end
            "#,
            Permissions::owner_rwx(),
        );

        let producer = manager
            .create_full(None, "/bin/producer", crate::process::CreateOptions { pipe_out: true, ..Default::default() })
            .unwrap();
        let consumer = manager
            .create_full(None, "/bin/consumer", crate::process::CreateOptions { pipe_in: true, ..Default::default() })
            .unwrap();
        manager.pipe(producer, consumer).unwrap();
        manager.start(consumer).unwrap();
        manager.start(producer).unwrap();

        assert_eq!(manager.wait(producer).unwrap(), 0);
        assert_eq!(manager.wait(consumer).unwrap(), 0);
    }

    #[test]
    fn wait_propagates_through_a_chain_of_waiters() {
        // A waits on B; B waits on C; C exit(7) should wake B with 7, then
        // A with whatever exit code B chose to report (§8 scenario 5).
        let (vfs, manager) = setup();
        vfs.install_system_file("/bin/c", b"process.exit(7)", Permissions::owner_rwx());
        vfs.install_system_file(
            "/bin/b",
            br#"
                local child, err = process.create("/bin/c")
                errors.ok(err, "b: create c failed")
                local ok
                ok, err = process.start(child)
                errors.ok(err, "b: start c failed")
                local code
                code, err = process.wait(child)
                errors.ok(err, "b: wait c failed")
                if code ~= 7 then error("b observed wrong exit code from c: " .. tostring(code)) end
                process.exit(code)
            "#,
            Permissions::owner_rwx(),
        );
        vfs.install_system_file(
            "/bin/a",
            br#"
                local child, err = process.create("/bin/b")
                errors.ok(err, "a: create b failed")
                local ok
                ok, err = process.start(child)
                errors.ok(err, "a: start b failed")
                local code
                code, err = process.wait(child)
                errors.ok(err, "a: wait b failed")
                if code ~= 7 then error("a observed wrong exit code from b: " .. tostring(code)) end
            "#,
            Permissions::owner_rwx(),
        );

        let a = manager.create(None, "/bin/a".into(), vec![]).unwrap();
        manager.start(a).unwrap();
        assert_eq!(manager.wait(a).unwrap(), 0);
    }
}
