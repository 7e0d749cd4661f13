//! The Stream Router (§4.4): resolves each process's stdin/stdout against
//! the `redirect → pipe → terminal` precedence and dispatches reads and
//! writes to whichever backing the resolution picks.

pub mod pipe;

use std::collections::HashMap;
use std::io::Write as _;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::ProcError;
use crate::process::table::{ProcessId, ProcessTable, StreamMode};
use crate::scheduler::Scheduler;
use crate::vfs::fd::OpenFlags;
use crate::vfs::Vfs;

use pipe::Pipe;

/// What shape of read a caller wants from its stdin.
#[derive(Debug, Clone, Copy)]
pub enum InputKind {
    /// Up to `n` bytes.
    Chunk(usize),
    /// One line, including the trailing `\n` if present.
    Line,
    /// Everything up to end-of-stream.
    All,
}

pub struct StreamRouter {
    pipes: Mutex<HashMap<u32, Arc<Pipe>>>,
    next_pipe_id: AtomicU32,
    redirect_fds: Mutex<HashMap<(u32, bool), u32>>,
    pipe_capacity: usize,
}

impl StreamRouter {
    pub fn new(pipe_capacity: usize) -> Self {
        StreamRouter {
            pipes: Mutex::new(HashMap::new()),
            next_pipe_id: AtomicU32::new(1),
            redirect_fds: Mutex::new(HashMap::new()),
            pipe_capacity,
        }
    }

    /// Allocate a fresh pipe and return its id for wiring into a process's
    /// `StreamEndpoint`s.
    pub fn create_pipe(&self) -> u32 {
        let id = self.next_pipe_id.fetch_add(1, Ordering::Relaxed);
        self.pipes.lock().unwrap().insert(id, Pipe::new(self.pipe_capacity));
        id
    }

    pub fn get_pipe(&self, id: u32) -> Option<Arc<Pipe>> {
        self.pipes.lock().unwrap().get(&id).cloned()
    }

    fn redirect_fd(&self, vfs: &Vfs, pid: ProcessId, real_path: &str, write: bool) -> Result<u32, ProcError> {
        let key = (pid.as_u32(), write);
        if let Some(&fd) = self.redirect_fds.lock().unwrap().get(&key) {
            return Ok(fd);
        }
        let flags = if write {
            OpenFlags::WRITE | OpenFlags::CREATE
        } else {
            OpenFlags::READ
        };
        let fd = vfs
            .open_real(pid.as_u32(), real_path, flags)
            .map_err(|_| ProcError::ExternalError)?;
        self.redirect_fds.lock().unwrap().insert(key, fd);
        Ok(fd)
    }

    pub fn output(
        &self,
        vfs: &Vfs,
        table: &ProcessTable,
        scheduler: &Scheduler,
        pid: ProcessId,
        data: &[u8],
    ) -> Result<(), ProcError> {
        let mode = table.with_process(pid, |p| p.stdout.resolve())?;
        match mode {
            StreamMode::Terminal => {
                let mut stdout = std::io::stdout();
                let _ = stdout.write_all(data);
                let _ = stdout.flush();
                Ok(())
            }
            StreamMode::Redirect(real_path) => {
                let fd = self.redirect_fd(vfs, pid, &real_path, true)?;
                vfs.write(pid.as_u32(), fd, data).map_err(|_| ProcError::StdoutWriteFailed)?;
                Ok(())
            }
            StreamMode::Pipe(id) => {
                let pipe = self.get_pipe(id).ok_or(ProcError::StdoutNotPiped)?;
                // `Pipe::write` only commits a short write (up to however much
                // space is free); loop until every byte is committed so a
                // single `output` larger than the pipe's capacity doesn't
                // silently drop its tail (§7, §8 property 4).
                let mut offset = 0;
                while offset < data.len() {
                    scheduler.suspend(pid);
                    let written = pipe.write(&data[offset..]);
                    scheduler.resume(pid);
                    scheduler.wait_for_turn(pid);
                    match written {
                        Some(0) => break,
                        Some(n) => offset += n,
                        None => return Err(ProcError::StdoutWriteFailed),
                    }
                }
                Ok(())
            }
        }
    }

    /// Signal end-of-stream on a process's stdout: if it is pipe-backed,
    /// close the writer half so the reading process sees EOF rather than
    /// blocking forever.
    pub fn close_output(&self, table: &ProcessTable, pid: ProcessId) -> Result<(), ProcError> {
        let mode = table.with_process(pid, |p| p.stdout.resolve())?;
        if let StreamMode::Pipe(id) = mode {
            if let Some(pipe) = self.get_pipe(id) {
                pipe.close_writer();
            }
        }
        Ok(())
    }

    pub fn input(
        &self,
        vfs: &Vfs,
        table: &ProcessTable,
        scheduler: &Scheduler,
        pid: ProcessId,
        kind: InputKind,
    ) -> Result<Vec<u8>, ProcError> {
        let mode = table.with_process(pid, |p| p.stdin.resolve())?;
        match mode {
            StreamMode::Terminal => {
                use std::io::BufRead;
                let stdin = std::io::stdin();
                match kind {
                    InputKind::Line => {
                        let mut line = String::new();
                        stdin.lock().read_line(&mut line).map_err(|_| ProcError::StdinReadFailed)?;
                        Ok(line.into_bytes())
                    }
                    InputKind::All => {
                        use std::io::Read;
                        let mut buf = String::new();
                        stdin.lock().read_to_string(&mut buf).map_err(|_| ProcError::StdinReadFailed)?;
                        Ok(buf.into_bytes())
                    }
                    InputKind::Chunk(n) => {
                        let mut line = String::new();
                        stdin.lock().read_line(&mut line).map_err(|_| ProcError::StdinReadFailed)?;
                        line.truncate(n.min(line.len()));
                        Ok(line.into_bytes())
                    }
                }
            }
            StreamMode::Redirect(real_path) => {
                let fd = self.redirect_fd(vfs, pid, &real_path, false)?;
                match kind {
                    InputKind::Line => Ok(vfs
                        .read_line(pid.as_u32(), fd)
                        .map_err(|_| ProcError::StdinReadFailed)?
                        .unwrap_or_default()),
                    InputKind::All => vfs.read_all(pid.as_u32(), fd).map_err(|_| ProcError::StdinReadFailed),
                    InputKind::Chunk(n) => vfs.read(pid.as_u32(), fd, n).map_err(|_| ProcError::StdinReadFailed),
                }
            }
            StreamMode::Pipe(id) => {
                let pipe = self.get_pipe(id).ok_or(ProcError::StdinNotPiped)?;
                scheduler.suspend(pid);
                let data = match kind {
                    InputKind::Line => pipe.read_line(),
                    InputKind::All => pipe.read_all(),
                    InputKind::Chunk(n) => pipe.read(n),
                };
                scheduler.resume(pid);
                scheduler.wait_for_turn(pid);
                Ok(data)
            }
        }
    }

    /// Whether `pid`'s stdout currently resolves to the host terminal,
    /// gating the terminal query bindings (§4.7) which fail `needs-pty`
    /// otherwise.
    pub fn stdout_is_terminal(&self, table: &ProcessTable, pid: ProcessId) -> bool {
        table
            .with_process(pid, |p| matches!(p.stdout.resolve(), StreamMode::Terminal))
            .unwrap_or(false)
    }

    /// Release a terminated process's share of the router's bookkeeping:
    /// close its stdout pipe writer (so a downstream reader unblocks), close
    /// its stdin pipe's reader side (so an upstream writer blocked in
    /// `output` wakes with `broken-pipe` instead of hanging forever, §4.3),
    /// and forget its cached redirect descriptors (the `Vfs`'s own fd table
    /// is torn down separately by the process manager).
    pub fn release_process(&self, table: &ProcessTable, pid: ProcessId) {
        let _ = self.close_output(table, pid);
        let stdin_mode = table.with_process(pid, |p| p.stdin.resolve()).ok();
        if let Some(StreamMode::Pipe(id)) = stdin_mode {
            if let Some(pipe) = self.get_pipe(id) {
                pipe.close_reader();
            }
        }
        let mut fds = self.redirect_fds.lock().unwrap();
        fds.retain(|&(owner, _), _| owner != pid.as_u32());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::vfs::store::MemoryBlockStore;

    fn setup() -> (Vfs, ProcessTable, Scheduler, StreamRouter) {
        let cfg = KernelConfig::for_tests();
        let vfs = Vfs::new(cfg.clone(), MemoryBlockStore::new());
        let table = ProcessTable::new(cfg.max_processes);
        let scheduler = Scheduler::new(cfg.scheduler_quantum);
        let router = StreamRouter::new(cfg.pipe_capacity);
        (vfs, table, scheduler, router)
    }

    #[test]
    fn pipe_wiring_fans_output_into_input() {
        let (vfs, table, scheduler, router) = setup();
        let writer = table.create("/bin/echo".into(), vec![], vfs.root_cwd()).unwrap();
        let reader = table.create("/bin/cat".into(), vec![], vfs.root_cwd()).unwrap();
        scheduler.admit(writer);
        scheduler.admit(reader);

        let pipe_id = router.create_pipe();
        table.with_process_mut(writer, |p| p.stdout.pipe = Some(pipe_id)).unwrap();
        table.with_process_mut(reader, |p| p.stdin.pipe = Some(pipe_id)).unwrap();

        let pipe = router.get_pipe(pipe_id).unwrap();
        pipe.write(b"hello\n");
        pipe.close_writer();

        let data = router.input(&vfs, &table, &scheduler, reader, InputKind::All).unwrap();
        assert_eq!(data, b"hello\n".to_vec());
    }

    #[test]
    fn redirect_takes_precedence_over_pipe() {
        let (vfs, table, _scheduler, router) = setup();
        let pid = table.create("/bin/echo".into(), vec![], vfs.root_cwd()).unwrap();
        let pipe_id = router.create_pipe();
        table
            .with_process_mut(pid, |p| {
                p.stdout.pipe = Some(pipe_id);
                p.stdout.redirect = Some(format!("{}/out.txt", vfs.root_cwd()));
            })
            .unwrap();
        let mode = table.with_process(pid, |p| p.stdout.resolve()).unwrap();
        assert!(matches!(mode, StreamMode::Redirect(_)));
    }

    #[test]
    fn stdout_is_terminal_by_default() {
        let (vfs, table, _scheduler, router) = setup();
        let pid = table.create("/bin/echo".into(), vec![], vfs.root_cwd()).unwrap();
        assert!(router.stdout_is_terminal(&table, pid));
        let pipe_id = router.create_pipe();
        table.with_process_mut(pid, |p| p.stdout.pipe = Some(pipe_id)).unwrap();
        assert!(!router.stdout_is_terminal(&table, pid));
    }

    #[test]
    fn release_process_closes_pipe_writer() {
        let (vfs, table, _scheduler, router) = setup();
        let pid = table.create("/bin/echo".into(), vec![], vfs.root_cwd()).unwrap();
        let pipe_id = router.create_pipe();
        table.with_process_mut(pid, |p| p.stdout.pipe = Some(pipe_id)).unwrap();
        router.release_process(&table, pid);
        let pipe = router.get_pipe(pipe_id).unwrap();
        assert!(pipe.is_writer_closed());
    }

    #[test]
    fn release_process_closes_its_stdin_pipe_reader_side() {
        let (vfs, table, _scheduler, router) = setup();
        let writer = table.create("/bin/echo".into(), vec![], vfs.root_cwd()).unwrap();
        let reader = table.create("/bin/cat".into(), vec![], vfs.root_cwd()).unwrap();
        let pipe_id = router.create_pipe();
        table.with_process_mut(writer, |p| p.stdout.pipe = Some(pipe_id)).unwrap();
        table.with_process_mut(reader, |p| p.stdin.pipe = Some(pipe_id)).unwrap();

        router.release_process(&table, reader);

        let pipe = router.get_pipe(pipe_id).unwrap();
        assert!(pipe.is_reader_closed());
        assert_eq!(pipe.write(b"more"), None);
    }

    #[test]
    fn output_on_pipe_with_vanished_reader_fails_broken_pipe() {
        let (vfs, table, scheduler, router) = setup();
        let writer = table.create("/bin/echo".into(), vec![], vfs.root_cwd()).unwrap();
        let reader = table.create("/bin/cat".into(), vec![], vfs.root_cwd()).unwrap();
        scheduler.admit(writer);
        let pipe_id = router.create_pipe();
        table.with_process_mut(writer, |p| p.stdout.pipe = Some(pipe_id)).unwrap();
        table.with_process_mut(reader, |p| p.stdin.pipe = Some(pipe_id)).unwrap();

        router.release_process(&table, reader);

        let err = router.output(&vfs, &table, &scheduler, writer, b"hi").unwrap_err();
        assert_eq!(err, ProcError::StdoutWriteFailed);
    }
}
