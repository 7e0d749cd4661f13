//! The Script Binding Surface (§4.5, §4.6): marshals the VFS, process
//! manager, and terminal queries into callable APIs for sandboxed guest
//! programs running in their own `mlua` instance.

pub mod bindings;
pub mod terminal;
pub mod worker;

pub use terminal::TerminalBindings;
pub use worker::LuaWorker;
