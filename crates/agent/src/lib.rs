//! The stepwise agent: a bounded step loop over a chat endpoint.
//!
//! 1. **Seed** a transcript (system + user, or a saved transcript)
//! 2. **Pre-stage** (optional): one preparatory call that may add hints and
//!    read-only tool results
//! 3. **Request**: hygiene-filter, optionally trim, validate, send
//! 4. **If tool calls**: dispatch them concurrently, append results, next step
//! 5. **If final-channel text**: route it to the output and stop
//!
//! The loop stops at a final answer or when the step budget runs out.

pub mod context;
pub mod dispatcher;
pub mod loop_runner;
pub mod output;
pub mod prestage;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use dispatcher::{BuiltinBackend, Dispatcher, ManifestBackend, ToolBackend};
pub use loop_runner::{AgentLoop, EXHAUSTED_DIAGNOSTIC, RunOutcome};
pub use output::{BufferSink, OutputSink, StdioSink};
pub use prestage::{Prestage, PrestageError, PrestageTools};
