//! Tool implementations for stepwise.
//!
//! - [`manifest`]: loads external tools from a JSON manifest into a
//!   `ToolRegistry` and fingerprints it
//! - [`runner`]: runs manifest tools as subprocesses
//! - [`builtin`]: the sandboxed, read-only in-process tools

pub mod builtin;
pub mod manifest;
pub mod runner;

pub use builtin::{BuiltinToolbox, Sandbox};
pub use manifest::ToolManifest;
pub use runner::SubprocessRunner;
