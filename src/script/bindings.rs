//! Installs the `file`, `process`, `errors`, and `terminal` namespaces
//! (§4.5-§4.7) on a freshly constructed `mlua::Lua` instance, plus the
//! prelude aliases and bytecode-quantum yield hook.
//!
//! Every host function here follows the same two-value discipline the
//! guest sees: `(value, err)`, with `err` nil on success. `Option<T>`
//! round-trips to Lua `nil` for free, so the Rust-side signatures return
//! `(Option<T>, Option<i32>)` and let mlua's multi-value conversion do the
//! rest.

use std::sync::Arc;

use mlua::{Lua, StdLib, Table, Value};

use crate::error::{ProcError, VfsError};
use crate::process::{CreateOptions, ProcessId, ProcessManager};
use crate::stream::InputKind;
use crate::vfs::fd::OpenFlags;
use crate::vfs::node::FileStat;
use crate::vfs::Vfs;

use super::terminal::TerminalBindings;

fn from_vfs<T>(r: Result<T, VfsError>) -> (Option<T>, Option<i32>) {
    match r {
        Ok(v) => (Some(v), None),
        Err(e) => (None, Some(e.code())),
    }
}

fn from_proc<T>(r: Result<T, ProcError>) -> (Option<T>, Option<i32>) {
    match r {
        Ok(v) => (Some(v), None),
        Err(e) => (None, Some(e.code())),
    }
}

fn stat_table(lua: &Lua, stat: FileStat) -> mlua::Result<Table> {
    let t = lua.create_table()?;
    t.set("size", stat.size)?;
    t.set("blocks", stat.blocks)?;
    t.set("block_size", stat.block_size)?;
    t.set("ino", stat.ino)?;
    t.set("perm", stat.perm)?;
    let is_dir = matches!(stat.node_type, crate::vfs::node::NodeType::Directory);
    t.set("node_type", if is_dir { "directory" } else { "file" })?;
    for (field, ts) in [("atime", stat.atime), ("mtime", stat.mtime), ("ctime", stat.ctime)] {
        let sub = lua.create_table()?;
        sub.set("sec", ts.sec)?;
        sub.set("nsec", ts.nsec)?;
        t.set(field, sub)?;
    }
    Ok(t)
}

fn names_table(lua: &Lua, names: Vec<String>) -> mlua::Result<Table> {
    let t = lua.create_table()?;
    for (i, name) in names.into_iter().enumerate() {
        t.set(i + 1, name)?;
    }
    Ok(t)
}

/// Build the `file.*` namespace: every VFS operation, cwd-scoped ones
/// resolved against the calling process's own `cwd` (§4.2).
fn install_file_table(lua: &Lua, vfs: Arc<Vfs>, manager: Arc<ProcessManager>, pid: ProcessId) -> mlua::Result<Table> {
    let file = lua.create_table()?;

    {
        let (vfs, manager) = (vfs.clone(), manager.clone());
        file.set(
            "open",
            lua.create_function(move |_, (path, flags): (String, String)| {
                let cwd = manager.process_cwd(pid).unwrap_or_default();
                Ok(from_vfs(vfs.open(pid.as_u32(), &cwd, &path, OpenFlags::parse(&flags))))
            })?,
        )?;
    }
    {
        let vfs = vfs.clone();
        file.set(
            "close",
            lua.create_function(move |_, fd: u32| Ok(from_vfs(vfs.close(pid.as_u32(), fd).map(|_| true))))?,
        )?;
    }
    {
        let vfs = vfs.clone();
        file.set(
            "write",
            lua.create_function(move |_, (fd, bytes): (u32, mlua::String)| {
                Ok(from_vfs(vfs.write(pid.as_u32(), fd, bytes.as_bytes())))
            })?,
        )?;
    }
    {
        let vfs = vfs.clone();
        file.set(
            "read",
            lua.create_function(move |lua, (fd, n): (u32, usize)| {
                let (data, err) = from_vfs(vfs.read(pid.as_u32(), fd, n));
                match data {
                    Some(bytes) => Ok((Some(lua.create_string(&bytes)?), err)),
                    None => Ok((None, err)),
                }
            })?,
        )?;
    }
    {
        let vfs = vfs.clone();
        file.set(
            "read_all",
            lua.create_function(move |lua, fd: u32| {
                let (data, err) = from_vfs(vfs.read_all(pid.as_u32(), fd));
                match data {
                    Some(bytes) => Ok((Some(lua.create_string(&bytes)?), err)),
                    None => Ok((None, err)),
                }
            })?,
        )?;
    }
    {
        let vfs = vfs.clone();
        file.set(
            "read_line",
            lua.create_function(move |lua, fd: u32| match vfs.read_line(pid.as_u32(), fd) {
                Ok(Some(bytes)) => Ok((Some(lua.create_string(&bytes)?), None)),
                Ok(None) => Ok((None, None)),
                Err(e) => Ok((None, Some(e.code()))),
            })?,
        )?;
    }
    {
        let vfs = vfs.clone();
        file.set(
            "shift",
            lua.create_function(move |_, (fd, delta): (u32, i64)| Ok(from_vfs(vfs.shift(pid.as_u32(), fd, delta))))?,
        )?;
    }
    {
        let vfs = vfs.clone();
        file.set(
            "seek",
            lua.create_function(move |_, (fd, pos): (u32, u64)| Ok(from_vfs(vfs.seek(pid.as_u32(), fd, pos))))?,
        )?;
    }
    {
        let vfs = vfs.clone();
        file.set(
            "truncate",
            lua.create_function(move |_, (fd, len): (u32, u64)| {
                Ok(from_vfs(vfs.truncate(pid.as_u32(), fd, len).map(|_| true)))
            })?,
        )?;
    }
    {
        let vfs = vfs.clone();
        file.set(
            "fdstat",
            lua.create_function(move |lua, fd: u32| {
                let (stat, err) = from_vfs(vfs.fdstat(pid.as_u32(), fd));
                match stat {
                    Some(s) => Ok((Some(stat_table(lua, s)?), err)),
                    None => Ok((None, err)),
                }
            })?,
        )?;
    }
    {
        let (vfs, manager) = (vfs.clone(), manager.clone());
        file.set(
            "stat",
            lua.create_function(move |lua, path: String| {
                let cwd = manager.process_cwd(pid).unwrap_or_default();
                let (stat, err) = from_vfs(vfs.stat_cwd(&cwd, &path));
                match stat {
                    Some(s) => Ok((Some(stat_table(lua, s)?), err)),
                    None => Ok((None, err)),
                }
            })?,
        )?;
    }
    {
        let (vfs, manager) = (vfs.clone(), manager.clone());
        file.set(
            "readdir",
            lua.create_function(move |lua, path: String| {
                let cwd = manager.process_cwd(pid).unwrap_or_default();
                let (names, err) = from_vfs(vfs.readdir_cwd(&cwd, &path));
                match names {
                    Some(n) => Ok((Some(names_table(lua, n)?), err)),
                    None => Ok((None, err)),
                }
            })?,
        )?;
    }
    {
        let (vfs, manager) = (vfs.clone(), manager.clone());
        file.set(
            "mkdir",
            lua.create_function(move |_, path: String| {
                let cwd = manager.process_cwd(pid).unwrap_or_default();
                Ok(from_vfs(vfs.mkdir(&cwd, &path).map(|_| true)))
            })?,
        )?;
    }
    {
        let (vfs, manager) = (vfs.clone(), manager.clone());
        file.set(
            "rmdir",
            lua.create_function(move |_, path: String| {
                let cwd = manager.process_cwd(pid).unwrap_or_default();
                Ok(from_vfs(vfs.rmdir(&cwd, &path).map(|_| true)))
            })?,
        )?;
    }
    {
        let (vfs, manager) = (vfs.clone(), manager.clone());
        file.set(
            "remove",
            lua.create_function(move |_, path: String| {
                let cwd = manager.process_cwd(pid).unwrap_or_default();
                Ok(from_vfs(vfs.remove(&cwd, &path).map(|_| true)))
            })?,
        )?;
    }
    {
        let (vfs, manager) = (vfs.clone(), manager.clone());
        file.set(
            "rename",
            lua.create_function(move |_, (from, to): (String, String)| {
                let cwd = manager.process_cwd(pid).unwrap_or_default();
                Ok(from_vfs(vfs.rename(&cwd, &from, &to).map(|_| true)))
            })?,
        )?;
    }
    {
        let (vfs, manager) = (vfs.clone(), manager.clone());
        file.set(
            "permit",
            lua.create_function(move |_, (path, flags): (String, String)| {
                let cwd = manager.process_cwd(pid).unwrap_or_default();
                let perm = crate::vfs::node::Permissions {
                    read: flags.contains('r'),
                    write: flags.contains('w'),
                    execute: flags.contains('x'),
                };
                Ok(from_vfs(vfs.permit(&cwd, &path, perm).map(|_| true)))
            })?,
        )?;
    }
    {
        let (vfs, manager) = (vfs.clone(), manager.clone());
        file.set(
            "opendir",
            lua.create_function(move |_, path: String| {
                let cwd = manager.process_cwd(pid).unwrap_or_default();
                Ok(from_vfs(vfs.opendir(pid.as_u32(), &cwd, &path)))
            })?,
        )?;
    }
    {
        let vfs = vfs.clone();
        file.set(
            "readdir_next",
            lua.create_function(move |_, handle: u32| match vfs.readdir_next(pid.as_u32(), handle) {
                Ok(name) => Ok((name, None)),
                Err(e) => Ok((None, Some(e.code()))),
            })?,
        )?;
    }
    {
        let vfs = vfs.clone();
        file.set(
            "closedir",
            lua.create_function(move |_, handle: u32| Ok(from_vfs(vfs.closedir(pid.as_u32(), handle).map(|_| true))))?,
        )?;
    }

    Ok(file)
}

/// Build the `process.*` namespace (§4.3, §4.4).
fn install_process_table(lua: &Lua, manager: Arc<ProcessManager>, pid: ProcessId) -> mlua::Result<Table> {
    let process = lua.create_table()?;

    {
        let manager = manager.clone();
        process.set(
            "create",
            lua.create_function(move |_, (path, opts): (String, Option<Table>)| {
                let mut create_opts = CreateOptions::default();
                if let Some(opts) = opts {
                    if let Some(argv) = opts.get::<_, Option<Vec<String>>>("argv")? {
                        create_opts.argv = argv;
                    }
                    create_opts.cwd = opts.get("cwd")?;
                    create_opts.pipe_in = opts.get::<_, Option<bool>>("pipe_in")?.unwrap_or(false);
                    create_opts.pipe_out = opts.get::<_, Option<bool>>("pipe_out")?.unwrap_or(false);
                    create_opts.redirect_in = opts.get("redirect_in")?;
                    create_opts.redirect_out = opts.get("redirect_out")?;
                }
                let result = manager.create_full(Some(pid), &path, create_opts);
                Ok(from_proc(result.map(|child| child.as_u32())))
            })?,
        )?;
    }
    {
        let manager = manager.clone();
        process.set(
            "start",
            lua.create_function(move |_, target: u32| Ok(from_proc(manager.start(ProcessId(target)).map(|_| true))))?,
        )?;
    }
    {
        let manager = manager.clone();
        process.set(
            "wait",
            lua.create_function(move |_, target: u32| Ok(from_proc(manager.wait_as(pid, ProcessId(target)))))?,
        )?;
    }
    {
        let manager = manager.clone();
        process.set(
            "kill",
            lua.create_function(move |_, target: u32| Ok(from_proc(manager.kill(ProcessId(target)).map(|_| true))))?,
        )?;
    }
    {
        let manager = manager.clone();
        process.set(
            "exit",
            lua.create_function(move |_, code: i32| {
                manager.exit(pid, code).ok();
                Err::<(), _>(mlua::Error::RuntimeError(format!("process {pid} exited with code {code}")))
            })?,
        )?;
    }
    {
        let manager = manager.clone();
        process.set(
            "pipe",
            lua.create_function(move |_, (out_pid, in_pid): (u32, u32)| {
                Ok(from_proc(manager.pipe(ProcessId(out_pid), ProcessId(in_pid)).map(|_| true)))
            })?,
        )?;
    }
    {
        let manager = manager.clone();
        process.set(
            "chdir",
            lua.create_function(move |_, path: String| Ok(from_proc(manager.chdir(pid, &path).map(|_| true))))?,
        )?;
    }
    {
        let manager = manager.clone();
        process.set("cwd", lua.create_function(move |_, ()| Ok(from_proc(manager.process_cwd(pid))))?)?;
    }
    {
        let manager = manager.clone();
        process.set(
            "argv",
            lua.create_function(move |lua, ()| {
                let (argv, err) = from_proc(manager.process_argv(pid));
                match argv {
                    Some(a) => Ok((Some(names_table(lua, a)?), err)),
                    None => Ok((None, err)),
                }
            })?,
        )?;
    }
    process.set("pid", lua.create_function(move |_, ()| Ok(pid.as_u32()))?)?;
    {
        let manager = manager.clone();
        process.set(
            "enumerate",
            lua.create_function(move |lua, ()| {
                let ids: Vec<u32> = manager.enumerate().into_iter().map(|p| p.as_u32()).collect();
                let t = lua.create_table()?;
                for (i, id) in ids.into_iter().enumerate() {
                    t.set(i + 1, id)?;
                }
                Ok(t)
            })?,
        )?;
    }
    {
        let manager = manager.clone();
        process.set(
            "output",
            lua.create_function(move |_, data: mlua::String| {
                Ok(from_proc(manager.output(pid, data.as_bytes()).map(|_| true)))
            })?,
        )?;
    }
    {
        let manager = manager.clone();
        process.set(
            "input",
            lua.create_function(move |lua, n: usize| {
                let (data, err) = from_proc(manager.input(pid, InputKind::Chunk(n)));
                match data {
                    Some(bytes) => Ok((Some(lua.create_string(&bytes)?), err)),
                    None => Ok((None, err)),
                }
            })?,
        )?;
    }
    {
        let manager = manager.clone();
        process.set(
            "input_all",
            lua.create_function(move |lua, ()| {
                let (data, err) = from_proc(manager.input(pid, InputKind::All));
                match data {
                    Some(bytes) => Ok((Some(lua.create_string(&bytes)?), err)),
                    None => Ok((None, err)),
                }
            })?,
        )?;
    }
    {
        let manager = manager.clone();
        process.set(
            "input_line",
            lua.create_function(move |lua, ()| {
                let (data, err) = from_proc(manager.input(pid, InputKind::Line));
                match data {
                    Some(bytes) => Ok((Some(lua.create_string(&bytes)?), err)),
                    None => Ok((None, err)),
                }
            })?,
        )?;
    }
    {
        let manager = manager.clone();
        process.set(
            "close_output",
            lua.create_function(move |_, ()| Ok(from_proc(manager.close_output(pid).map(|_| true))))?,
        )?;
    }
    {
        let manager = manager.clone();
        process.set(
            "yield",
            lua.create_function(move |_, ()| {
                manager.cooperative_yield(pid);
                Ok(())
            })?,
        )?;
    }

    Ok(process)
}

/// `errors.ok`/`errors.as_string` (§4.5, §7). `errors.ok` is the guest
/// fail-fast idiom: on a non-nil error it writes the formatted message to
/// stdout, runs the real exit(1) side effects, then raises a Lua error to
/// unwind the call stack (the worker driver treats this unwind as a normal
/// exit once it observes the process already terminated).
fn install_errors_table(lua: &Lua, manager: Arc<ProcessManager>, pid: ProcessId) -> mlua::Result<Table> {
    let errors = lua.create_table()?;

    errors.set(
        "ok",
        lua.create_function(move |_, (err, msg): (Option<i32>, String)| {
            if let Some(code) = err {
                let line = format!("{msg}: {}\n", crate::error::describe(code));
                manager.output(pid, line.as_bytes()).ok();
                manager.exit(pid, 1).ok();
                return Err(mlua::Error::RuntimeError(line));
            }
            Ok(())
        })?,
    )?;
    errors.set("as_string", lua.create_function(|_, code: i32| Ok(crate::error::describe(code)))?)?;

    Ok(errors)
}

/// `terminal.*` (§4.6). Present on every interpreter; each call still fails
/// `needs-pty` at the `TerminalBindings` layer if stdout isn't routed to
/// the real host terminal.
fn install_terminal_table(lua: &Lua, terminal: Arc<TerminalBindings>, manager: Arc<ProcessManager>, pid: ProcessId) -> mlua::Result<Table> {
    let table = lua.create_table()?;

    {
        let (terminal, manager) = (terminal.clone(), manager.clone());
        table.set(
            "read_line",
            lua.create_function(move |_, prompt: Option<String>| {
                if !manager.stdout_is_terminal(pid) {
                    return Ok(from_proc::<String>(Err(ProcError::NeedsPty)));
                }
                Ok(from_proc(terminal.read_line(&prompt.unwrap_or_default())))
            })?,
        )?;
    }
    {
        let (terminal, manager) = (terminal.clone(), manager.clone());
        table.set(
            "clear",
            lua.create_function(move |_, ()| {
                if !manager.stdout_is_terminal(pid) {
                    return Ok(from_proc(Err(ProcError::NeedsPty)));
                }
                Ok(from_proc(terminal.clear().map(|_| true)))
            })?,
        )?;
    }
    {
        let (terminal, manager) = (terminal.clone(), manager.clone());
        table.set(
            "size",
            lua.create_function(move |lua, ()| {
                if !manager.stdout_is_terminal(pid) {
                    return Ok((None, Some(ProcError::NeedsPty.code())));
                }
                match terminal.size() {
                    Ok((rows, cols)) => {
                        let t = lua.create_table()?;
                        t.set("rows", rows)?;
                        t.set("cols", cols)?;
                        Ok((Some(t), None))
                    }
                    Err(e) => Ok((None, Some(e.code()))),
                }
            })?,
        )?;
    }

    Ok(table)
}

/// Construct a sandboxed interpreter for `pid`: base + string/table/math
/// only (§4.5's pruned library set), the three host namespaces, the
/// `output`/`input*` prelude aliases, integer constants, and — if
/// `quantum > 0` — the bytecode-count hook that yields the scheduler token
/// cooperatively (§5).
pub fn new_sandboxed_lua(
    vfs: Arc<Vfs>,
    manager: Arc<ProcessManager>,
    terminal: Arc<TerminalBindings>,
    pid: ProcessId,
    quantum: u32,
) -> mlua::Result<Lua> {
    let lua = Lua::new_with(StdLib::STRING | StdLib::TABLE | StdLib::MATH, mlua::LuaOptions::new())?;

    // `io`/`os`/`package` are already absent (only base + string/table/math
    // were loaded above); the base library still carries these four, which
    // the pruned guest surface must not expose (§4.5).
    let globals = lua.globals();
    for removed in ["print", "dofile", "load", "loadfile"] {
        globals.set(removed, Value::Nil)?;
    }

    globals.set("STDIN", 0)?;
    globals.set("STDOUT", 1)?;
    globals.set("FILE", 0)?;
    globals.set("DIRECTORY", 1)?;

    let file = install_file_table(&lua, vfs, manager.clone(), pid)?;
    let process = install_process_table(&lua, manager.clone(), pid)?;
    let errors = install_errors_table(&lua, manager.clone(), pid)?;
    let terminal_table = install_terminal_table(&lua, terminal, manager.clone(), pid)?;

    globals.set("output", process.get::<_, mlua::Function>("output")?)?;
    globals.set("input", process.get::<_, mlua::Function>("input")?)?;
    globals.set("input_all", process.get::<_, mlua::Function>("input_all")?)?;
    globals.set("input_line", process.get::<_, mlua::Function>("input_line")?)?;

    globals.set("file", file)?;
    globals.set("process", process)?;
    globals.set("errors", errors)?;
    globals.set("terminal", terminal_table)?;

    if quantum > 0 {
        let hook_manager = manager;
        let triggers = mlua::HookTriggers {
            every_nth_instruction: Some(quantum),
            ..Default::default()
        };
        lua.set_hook(triggers, move |_lua, _debug| {
            hook_manager.cooperative_yield(pid);
            Ok(())
        });
    }

    Ok(lua)
}
