//! Where routed assistant text ends up.

use std::io::Write;
use stepwise_core::channel::Destination;

/// Receives routed text. `Omit` never reaches an implementation.
pub trait OutputSink: Send {
    fn write(&mut self, destination: Destination, text: &str) -> std::io::Result<()>;
}

/// Writes to the process's stdout and stderr, flushing after every write so
/// streamed deltas appear immediately.
#[derive(Debug, Default)]
pub struct StdioSink;

impl OutputSink for StdioSink {
    fn write(&mut self, destination: Destination, text: &str) -> std::io::Result<()> {
        match destination {
            Destination::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(text.as_bytes())?;
                out.flush()
            }
            Destination::Stderr => {
                let mut err = std::io::stderr().lock();
                err.write_all(text.as_bytes())?;
                err.flush()
            }
            Destination::Omit => Ok(()),
        }
    }
}

/// Collects output in memory.
#[derive(Debug, Default, Clone)]
pub struct BufferSink {
    pub stdout: String,
    pub stderr: String,
}

impl OutputSink for BufferSink {
    fn write(&mut self, destination: Destination, text: &str) -> std::io::Result<()> {
        match destination {
            Destination::Stdout => self.stdout.push_str(text),
            Destination::Stderr => self.stderr.push_str(text),
            Destination::Omit => {}
        }
        Ok(())
    }
}

/// Route `text` to `destination`, skipping omitted output.
pub(crate) fn emit(sink: &mut dyn OutputSink, destination: Destination, text: &str) -> std::io::Result<()> {
    if destination == Destination::Omit || text.is_empty() {
        return Ok(());
    }
    sink.write(destination, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_separates_streams() {
        let mut sink = BufferSink::default();
        emit(&mut sink, Destination::Stdout, "answer").unwrap();
        emit(&mut sink, Destination::Stderr, "critique").unwrap();
        emit(&mut sink, Destination::Omit, "hidden").unwrap();
        assert_eq!(sink.stdout, "answer");
        assert_eq!(sink.stderr, "critique");
    }
}
