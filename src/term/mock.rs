//! Mock transport for testing.
//!
//! Provides a `MockTransport` that plays the device side of a terminal
//! without a board or process. Data can be queued directly, or a
//! [`Responder`] can answer each line the session sends, which is enough to
//! simulate a stateful RIOT shell.

use super::error::ShellError;
use super::traits::Transport;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Answers one line written by the session; `None` means no output.
pub type Responder = Box<dyn FnMut(&str) -> Option<String> + Send>;

/// Inner state of the mock, shared between clones.
#[derive(Default)]
struct MockState {
    /// Bytes to be returned by read operations.
    read_queue: VecDeque<u8>,
    /// Every write, in order.
    write_log: Vec<Vec<u8>>,
    /// Complete lines written so far.
    lines: Vec<String>,
    /// Partial line waiting for its newline.
    pending_line: String,
    responder: Option<Responder>,
    closed: bool,
    close_count: u32,
    journal: Option<Arc<Mutex<Vec<String>>>>,
}

/// Mock terminal transport.
///
/// Clones share state, so a test can hand one clone to a
/// [`ShellSession`](super::ShellSession) and inspect the other.
///
/// # Example
/// ```
/// use release_specs::term::{MockTransport, Transport};
/// use std::time::Duration;
///
/// let mut port = MockTransport::riot_shell("MOCK0", |cmd| match cmd {
///     "hello" => Some("world".to_string()),
///     _ => None,
/// });
/// port.write_bytes(b"hello\n").unwrap();
///
/// let mut buffer = [0u8; 64];
/// let n = port.read_bytes(&mut buffer, Duration::from_millis(10)).unwrap();
/// assert_eq!(&buffer[..n], b"hello\nworld\n> ");
/// assert_eq!(port.lines(), vec!["hello".to_string()]);
/// ```
#[derive(Clone)]
pub struct MockTransport {
    name: String,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// A mock that answers each line through `responder`.
    pub fn with_responder(name: impl Into<String>, responder: Responder) -> Self {
        let mock = Self::new(name);
        mock.state.lock().responder = Some(responder);
        mock
    }

    /// A mock that behaves like a RIOT shell: it echoes every command,
    /// prints the handler's output (if any) and a fresh `> ` prompt.
    pub fn riot_shell<F>(name: impl Into<String>, mut handler: F) -> Self
    where
        F: FnMut(&str) -> Option<String> + Send + 'static,
    {
        Self::with_responder(
            name,
            Box::new(move |line| {
                let mut out = format!("{line}\n");
                if let Some(reply) = handler(line) {
                    out.push_str(&reply);
                    if !reply.ends_with('\n') {
                        out.push('\n');
                    }
                }
                out.push_str("> ");
                Some(out)
            }),
        )
    }

    /// Record writes and closes into a journal shared with other mocks so
    /// tests can assert on cross-component ordering.
    pub fn with_journal(self, journal: Arc<Mutex<Vec<String>>>) -> Self {
        self.state.lock().journal = Some(journal);
        self
    }

    /// Queue bytes as if the device had printed them.
    pub fn enqueue_read(&self, data: &[u8]) {
        self.state.lock().read_queue.extend(data);
    }

    pub fn get_write_log(&self) -> Vec<Vec<u8>> {
        self.state.lock().write_log.clone()
    }

    /// Complete lines written so far, without their newline.
    pub fn lines(&self) -> Vec<String> {
        self.state.lock().lines.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// How often `close` was called.
    pub fn close_count(&self) -> u32 {
        self.state.lock().close_count
    }

    /// Simulate the device side going away.
    pub fn hang_up(&self) {
        self.state.lock().closed = true;
    }

    pub fn available_bytes(&self) -> usize {
        self.state.lock().read_queue.len()
    }
}

impl Transport for MockTransport {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, ShellError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ShellError::Closed {
                node: self.name.clone(),
                output: String::new(),
            });
        }
        state.write_log.push(data.to_vec());

        let text = String::from_utf8_lossy(data);
        for ch in text.chars() {
            if ch != '\n' {
                state.pending_line.push(ch);
                continue;
            }
            let line = std::mem::take(&mut state.pending_line);
            let line = line.trim_end_matches('\r').to_string();
            if let Some(journal) = &state.journal {
                journal.lock().push(format!("{}: {}", self.name, line));
            }
            let reply = state.responder.as_mut().and_then(|respond| respond(&line));
            if let Some(reply) = reply {
                state.read_queue.extend(reply.as_bytes());
            }
            state.lines.push(line);
        }

        Ok(data.len())
    }

    fn read_bytes(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, ShellError> {
        {
            let mut state = self.state.lock();
            if state.read_queue.is_empty() && state.closed {
                return Err(ShellError::Closed {
                    node: self.name.clone(),
                    output: String::new(),
                });
            }

            let mut bytes_read = 0;
            for byte in buffer.iter_mut() {
                match state.read_queue.pop_front() {
                    Some(queued) => {
                        *byte = queued;
                        bytes_read += 1;
                    }
                    None => break,
                }
            }
            if bytes_read > 0 {
                return Ok(bytes_read);
            }
        }

        // Nothing queued: behave like a quiet device and let the caller's
        // deadline advance.
        std::thread::sleep(timeout.min(Duration::from_millis(5)));
        Ok(0)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<(), ShellError> {
        let mut state = self.state.lock();
        state.close_count += 1;
        if !state.closed {
            state.closed = true;
            if let Some(journal) = &state.journal {
                journal.lock().push(format!("{}: closed", self.name));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("name", &self.name)
            .field("available_bytes", &self.available_bytes())
            .finish()
    }
}
