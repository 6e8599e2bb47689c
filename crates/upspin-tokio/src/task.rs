//! A thin, `#[must_use]` wrapper around [`tokio::task::JoinHandle`] that
//! propagates panics instead of silently swallowing them, and remembers a
//! name for logging when the task finishes or is aborted.
//!
//! Every background task this workspace spawns (the keep-alive pinger of
//! §4.3, a `Watch` event pump of §4.10) is a [`Task`] so that its owner has
//! a handle to join or abort on scope exit, per §5's resource discipline.

use std::{
    borrow::Cow,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::task::{JoinError, JoinHandle};
use tracing::{Instrument, debug, error, warn};

/// A named, joinable background task.
#[must_use = "a Task does nothing unless polled/joined; use .detach() if \
              that's intentional"]
pub struct Task<T> {
    handle: JoinHandle<T>,
    name: Cow<'static, str>,
}

impl<T> Task<T> {
    /// Spawns `future` as a task named `name`, inheriting the current
    /// tracing span.
    pub fn spawn<F>(name: impl Into<Cow<'static, str>>, future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let name = name.into();
        let span = tracing::Span::current();
        debug!(%name, "spawning task");
        Self {
            handle: tokio::spawn(future.instrument(span)),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Aborts the task. The `Task` can still be polled afterward; it will
    /// resolve to `Err(JoinError::is_cancelled() == true)`.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Explicitly discards the handle without joining, documenting that the
    /// task is intentionally fire-and-forget.
    pub fn detach(self) {
        drop(self);
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(result) => result,
            Poll::Pending => return Poll::Pending,
        };
        match &result {
            Ok(_) => debug!(name = %self.name, "task finished"),
            Err(e) if e.is_cancelled() =>
                warn!(name = %self.name, "task cancelled"),
            Err(_) => error!(name = %self.name, "task panicked"),
        }
        Poll::Ready(result)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn spawned_task_result_is_joinable() {
        let task = Task::spawn("adder", async { 1 + 1 });
        let result = task.await.unwrap();
        assert_eq!(result, 2);
    }

    #[tokio::test]
    async fn abort_surfaces_as_cancelled_join_error() {
        let task = Task::spawn("sleeper", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        task.abort();
        let result = task.await;
        assert!(result.unwrap_err().is_cancelled());
    }
}
