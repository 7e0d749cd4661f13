//! Kernel-wide tunables, constructed once at [`crate::Kernel::boot`] and
//! immutable thereafter.

/// Configuration for a single kernel instance.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// The immutable absolute path prefix every guest path is confined under.
    pub root_prefix: String,
    /// Maximum number of simultaneously live processes.
    pub max_processes: usize,
    /// Maximum number of open file descriptors, per process.
    pub max_fds_per_process: usize,
    /// Maximum number of open directory handles, per process.
    pub max_dir_handles_per_process: usize,
    /// Capacity, in bytes, of a pipe's bounded FIFO buffer.
    pub pipe_capacity: usize,
    /// Number of lines kept in a process's terminal line-edit history.
    pub terminal_history_depth: usize,
    /// Bytecode-instruction budget before the scheduler forces a cooperative
    /// yield on a long-running process (§4.3's "implementation-defined
    /// heuristic").
    pub scheduler_quantum: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            root_prefix: "/persistent".to_string(),
            max_processes: 1024,
            max_fds_per_process: 256,
            max_dir_handles_per_process: 64,
            pipe_capacity: 64 * 1024,
            terminal_history_depth: 10,
            scheduler_quantum: 200_000,
        }
    }
}

impl KernelConfig {
    /// A configuration tuned for fast, deterministic unit tests: a small
    /// process table and pipe capacity so exhaustion paths are reachable.
    pub fn for_tests() -> Self {
        Self {
            root_prefix: "/persistent".to_string(),
            max_processes: 16,
            max_fds_per_process: 16,
            max_dir_handles_per_process: 8,
            pipe_capacity: 4096,
            terminal_history_depth: 10,
            scheduler_quantum: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_root_prefix_has_no_trailing_slash() {
        let cfg = KernelConfig::default();
        assert!(!cfg.root_prefix.ends_with('/'));
        assert!(cfg.root_prefix.starts_with('/'));
    }
}
