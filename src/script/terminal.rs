//! Terminal query bindings (§4.7): line editing and geometry queries for
//! processes attached to a real terminal. Every call fails with
//! [`ProcError::NeedsPty`] when there is no controlling terminal, rather
//! than silently degrading.

use rustyline::DefaultEditor;

use crate::error::ProcError;

pub struct TerminalBindings {
    history_depth: usize,
}

impl TerminalBindings {
    pub fn new(history_depth: usize) -> Self {
        TerminalBindings { history_depth }
    }

    pub fn read_line(&self, prompt: &str) -> Result<String, ProcError> {
        let mut editor = DefaultEditor::new().map_err(|_| ProcError::NeedsPty)?;
        editor.history_mut().set_max_len(self.history_depth).ok();
        editor.readline(prompt).map_err(|_| ProcError::NeedsPty)
    }

    pub fn clear(&self) -> Result<(), ProcError> {
        if terminal_size::terminal_size().is_none() {
            return Err(ProcError::NeedsPty);
        }
        use std::io::Write;
        print!("\x1b[2J\x1b[H");
        std::io::stdout().flush().ok();
        Ok(())
    }

    /// Returns `(rows, cols)` per §6 — note `terminal_size` reports
    /// `(width, height)`, so the pair is swapped here.
    pub fn size(&self) -> Result<(u16, u16), ProcError> {
        terminal_size::terminal_size()
            .map(|(w, h)| (h.0, w.0))
            .ok_or(ProcError::NeedsPty)
    }
}
