//! Chat-completion client implementations for stepwise.
//!
//! All clients implement the `stepwise_core::ChatClient` trait. The
//! OpenAI-compatible client covers every endpoint stepwise talks to; retry
//! behavior is configured through [`RetryPolicy`].

pub mod openai_compat;
pub mod retry;
mod sse;

pub use openai_compat::OpenAiCompatClient;
pub use retry::{FixedJitter, JitterSource, RandomJitter, RetryPolicy};
