//! The round-robin cooperative scheduler (§4.3, §5).
//!
//! Exactly one process is ever `Running` at a time. Rather than yielding a
//! Lua coroutine across the `mlua` FFI boundary, each process owns a
//! dedicated OS thread running its own isolated Lua VM; those threads are
//! gated by a single run token held here. A thread only proceeds past
//! [`Scheduler::wait_for_turn`] when the scheduler has chosen it, and it
//! gives the token back at every cooperative yield point: a scripted
//! `process.yield`, a blocking pipe read, or the bytecode-instruction
//! quantum expiring.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::process::table::ProcessId;

struct SchedulerState {
    ready: VecDeque<ProcessId>,
    current: Option<ProcessId>,
}

/// The kernel-wide scheduler. One instance per booted kernel, shared by
/// every process thread.
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    cv: Condvar,
    pub quantum: u32,
}

impl Scheduler {
    pub fn new(quantum: u32) -> Self {
        Scheduler {
            state: Mutex::new(SchedulerState { ready: VecDeque::new(), current: None }),
            cv: Condvar::new(),
            quantum,
        }
    }

    fn advance(&self, state: &mut SchedulerState) {
        state.current = state.ready.pop_front();
        self.cv.notify_all();
    }

    /// Add a newly-started process to the ready queue. If nothing is
    /// currently running, it is picked up immediately.
    pub fn admit(&self, pid: ProcessId) {
        let mut state = self.state.lock().unwrap();
        state.ready.push_back(pid);
        if state.current.is_none() {
            self.advance(&mut state);
        }
    }

    /// Block the calling thread until `pid` holds the run token.
    pub fn wait_for_turn(&self, pid: ProcessId) {
        let state = self.state.lock().unwrap();
        let _state = self.cv.wait_while(state, |s| s.current != Some(pid)).unwrap();
    }

    /// Cooperatively give up the token, re-joining the back of the ready
    /// queue (a scripted `process.yield` or the quantum hook firing).
    pub fn yield_turn(&self, pid: ProcessId) {
        let mut state = self.state.lock().unwrap();
        if state.current == Some(pid) {
            state.ready.push_back(pid);
            self.advance(&mut state);
        }
    }

    /// Give up the token without rejoining the ready queue — used when a
    /// process blocks on an empty pipe or a `wait` with no result yet.
    /// The blocker must call [`Scheduler::resume`] once unblocked.
    pub fn suspend(&self, pid: ProcessId) {
        let mut state = self.state.lock().unwrap();
        if state.current == Some(pid) {
            self.advance(&mut state);
        }
    }

    /// Make a previously-suspended process ready again.
    pub fn resume(&self, pid: ProcessId) {
        let mut state = self.state.lock().unwrap();
        state.ready.push_back(pid);
        if state.current.is_none() {
            self.advance(&mut state);
        }
    }

    /// A process has terminated: give up the token for good, never
    /// rejoining the ready queue.
    pub fn retire(&self, pid: ProcessId) {
        let mut state = self.state.lock().unwrap();
        if state.current == Some(pid) {
            self.advance(&mut state);
        }
        state.ready.retain(|&p| p != pid);
    }

    pub fn ready_len(&self) -> usize {
        self.state.lock().unwrap().ready.len()
    }

    pub fn current(&self) -> Option<ProcessId> {
        self.state.lock().unwrap().current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_admitted_process_runs_immediately() {
        let sched = Scheduler::new(1000);
        sched.admit(ProcessId(1));
        assert_eq!(sched.current(), Some(ProcessId(1)));
    }

    #[test]
    fn yield_rotates_to_next_ready_process() {
        let sched = Scheduler::new(1000);
        sched.admit(ProcessId(1));
        sched.admit(ProcessId(2));
        assert_eq!(sched.current(), Some(ProcessId(1)));
        sched.yield_turn(ProcessId(1));
        assert_eq!(sched.current(), Some(ProcessId(2)));
        sched.yield_turn(ProcessId(2));
        assert_eq!(sched.current(), Some(ProcessId(1)));
    }

    #[test]
    fn suspend_does_not_requeue_until_resumed() {
        let sched = Scheduler::new(1000);
        sched.admit(ProcessId(1));
        sched.admit(ProcessId(2));
        sched.suspend(ProcessId(1));
        assert_eq!(sched.current(), Some(ProcessId(2)));
        assert_eq!(sched.ready_len(), 0);
        sched.resume(ProcessId(1));
        assert_eq!(sched.ready_len(), 1);
    }

    #[test]
    fn retire_removes_process_from_rotation() {
        let sched = Scheduler::new(1000);
        sched.admit(ProcessId(1));
        sched.admit(ProcessId(2));
        sched.retire(ProcessId(2));
        sched.yield_turn(ProcessId(1));
        assert_eq!(sched.current(), Some(ProcessId(1)));
    }
}
