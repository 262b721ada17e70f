//! Terminal attached through a child process (`make term`, `pyterm`,
//! `socat`, the native binary itself).
//!
//! The child's stdout and stderr are drained by reader threads into a
//! channel so reads can honour a timeout without platform-specific
//! non-blocking pipes. On unix the child runs in its own process group and
//! `close` kills the whole group, taking helpers such as `pyterm` down too.

use super::error::ShellError;
use super::traits::Transport;
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

pub struct ProcessTransport {
    name: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    output: Receiver<Vec<u8>>,
    /// Bytes received but not yet handed to a reader.
    pending: Vec<u8>,
}

impl ProcessTransport {
    /// Spawn `command` with piped stdio.
    pub fn spawn(name: impl Into<String>, mut command: Command) -> Result<Self, ShellError> {
        let name = name.into();
        command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn()?;
        debug!(node = %name, pid = child.id(), "terminal process spawned");

        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            forward(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward(stderr, tx);
        }
        let stdin = child.stdin.take();

        Ok(Self {
            name,
            child: Some(child),
            stdin,
            output: rx,
            pending: Vec::new(),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    fn closed(&self) -> ShellError {
        ShellError::Closed {
            node: self.name.clone(),
            output: String::new(),
        }
    }

    fn take_pending(&mut self, buffer: &mut [u8]) -> usize {
        let n = self.pending.len().min(buffer.len());
        buffer[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        n
    }
}

fn forward<R: Read + Send + 'static>(mut source: R, tx: mpsc::Sender<Vec<u8>>) {
    thread::spawn(move || {
        let mut chunk = [0u8; 1024];
        loop {
            match source.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(chunk[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

impl Transport for ProcessTransport {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, ShellError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(self.closed());
        };
        match stdin.write_all(data).and_then(|()| stdin.flush()) {
            Ok(()) => Ok(data.len()),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Err(self.closed()),
            Err(e) => Err(e.into()),
        }
    }

    fn read_bytes(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, ShellError> {
        if !self.pending.is_empty() {
            return Ok(self.take_pending(buffer));
        }
        match self.output.recv_timeout(timeout) {
            Ok(chunk) => {
                self.pending = chunk;
                Ok(self.take_pending(buffer))
            }
            Err(RecvTimeoutError::Timeout) => Ok(0),
            Err(RecvTimeoutError::Disconnected) => Err(self.closed()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<(), ShellError> {
        self.stdin.take();
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if let Ok(Some(status)) = child.try_wait() {
            debug!(node = %self.name, %status, "terminal process already exited");
            return Ok(());
        }

        #[cfg(unix)]
        {
            if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
                // SAFETY: plain syscall on the group created in `spawn`.
                let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
                if rc != 0 {
                    warn!(node = %self.name, "killpg failed: {}", std::io::Error::last_os_error());
                }
            }
        }
        if let Err(e) = child.kill() {
            // Already gone after killpg.
            if e.kind() != std::io::ErrorKind::InvalidInput {
                warn!(node = %self.name, "kill failed: {e}");
            }
        }
        let status = child.wait()?;
        debug!(node = %self.name, %status, "terminal process reaped");
        Ok(())
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        if self.child.is_some() {
            let _ = self.close();
        }
    }
}

impl std::fmt::Debug for ProcessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTransport")
            .field("name", &self.name)
            .field("pid", &self.pid())
            .finish()
    }
}
