//! Run blocking node operations side by side and wait for all of them, or
//! for a deadline.
//!
//! An operation still running at the deadline is abandoned, not killed: its
//! command has already reached the device and may still take effect, and the
//! blocking task keeps running (holding its controller) until it returns.

use std::any::Any;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// A boxed operation, for gathering closures of different types.
pub type BoxedOp<T> = Box<dyn FnOnce() -> T + Send + 'static>;

#[derive(Debug)]
pub enum TaskOutcome<T> {
    Completed(T),
    /// The operation panicked; carries the panic message.
    Panicked(String),
    /// Still running when the deadline passed.
    Abandoned,
}

impl<T> TaskOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Outcomes in submission order.
#[derive(Debug)]
pub struct Gathered<T> {
    outcomes: Vec<TaskOutcome<T>>,
}

impl<T> Gathered<T> {
    /// Whether every operation ran to completion.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(TaskOutcome::is_completed)
    }

    pub fn abandoned(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, TaskOutcome::Abandoned))
            .count()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn outcomes(&self) -> &[TaskOutcome<T>] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<TaskOutcome<T>> {
        self.outcomes
    }

    /// All results, or an error naming the first operation that did not
    /// complete.
    pub fn into_results(self) -> Result<Vec<T>, crate::HarnessError> {
        let total = self.outcomes.len();
        let abandoned = self.abandoned();
        self.outcomes
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| match outcome {
                TaskOutcome::Completed(value) => Ok(value),
                TaskOutcome::Panicked(message) => {
                    Err(crate::HarnessError::Task(format!("operation {index} panicked: {message}")))
                }
                TaskOutcome::Abandoned => Err(crate::HarnessError::Incomplete { abandoned, total }),
            })
            .collect()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown panic".to_string()),
    }
}

/// Start every operation on the blocking pool and wait until all finish or
/// `timeout` elapses.
pub async fn gather<I, F, T>(ops: I, timeout: Duration) -> Gathered<T>
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let deadline = Instant::now() + timeout;
    let handles: Vec<_> = ops.into_iter().map(tokio::task::spawn_blocking).collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    let mut expired = false;
    for mut handle in handles {
        let joined = if expired {
            if handle.is_finished() {
                Some(handle.await)
            } else {
                None
            }
        } else {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(joined) => Some(joined),
                Err(_) => {
                    expired = true;
                    None
                }
            }
        };
        outcomes.push(match joined {
            Some(Ok(value)) => TaskOutcome::Completed(value),
            Some(Err(e)) if e.is_panic() => TaskOutcome::Panicked(panic_message(e.into_panic())),
            Some(Err(e)) => TaskOutcome::Panicked(e.to_string()),
            None => TaskOutcome::Abandoned,
        });
    }

    let gathered = Gathered { outcomes };
    if !gathered.is_complete() {
        warn!(
            total = gathered.len(),
            abandoned = gathered.abandoned(),
            ?timeout,
            "gathered operations did not all complete"
        );
    }
    gathered
}
