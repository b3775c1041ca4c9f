//! Core engine for the hgdb debugger adapter: the WebSocket transport,
//! wire codec, session/breakpoint state and variable model shared by the
//! DAP-facing binary and the console-facing binary (spec.md §2).

pub mod adapter;
pub mod breakpoint;
pub mod console;
pub mod dap;
pub mod error;
pub mod filenames;
pub mod ids;
pub mod log;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod transport;
pub mod variable;
