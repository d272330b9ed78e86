//! Single-consumer job queue that serializes every mutation of UI state.
//!
//! Background tasks never touch shared state directly: they hand a closure to
//! [`Dispatcher::queue_update`] and the UI loop applies it between key events.

use tokio::sync::mpsc;
use tracing::debug;

pub type Job<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FlashLevel {
    Info,
    Warn,
    Error,
}

/// Anything that can show a transient status line to the operator.
pub trait StatusSink {
    fn flash(&mut self, level: FlashLevel, message: String);

    /// Clears the status line, unless something replaced `shown` since.
    fn status_reset(&mut self, shown: &str);
}

pub struct Dispatcher<S> {
    tx: mpsc::UnboundedSender<Job<S>>,
}

impl<S> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

pub struct JobQueue<S> {
    rx: mpsc::UnboundedReceiver<Job<S>>,
}

impl<S: 'static> Dispatcher<S> {
    pub fn channel() -> (Self, JobQueue<S>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, JobQueue { rx })
    }

    /// Runs `job` immediately; the caller must already be on the UI task.
    pub fn run_now<F>(state: &mut S, job: F)
    where
        F: FnOnce(&mut S),
    {
        job(state);
    }

    /// Enqueues `job` for the UI task and returns immediately.
    ///
    /// Returns `false` once the UI loop has shut down.
    pub fn queue_update<F>(&self, job: F) -> bool
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        if self.tx.send(Box::new(job)).is_err() {
            debug!("dispatcher closed, dropping job");
            return false;
        }
        true
    }
}

impl<S> JobQueue<S> {
    pub async fn next(&mut self) -> Option<Job<S>> {
        self.rx.recv().await
    }

    /// Applies every job that is ready without waiting.
    pub fn drain(&mut self, state: &mut S) -> usize {
        let mut applied = 0;
        while let Ok(job) = self.rx.try_recv() {
            job(state);
            applied += 1;
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::Dispatcher;

    #[tokio::test]
    async fn jobs_apply_in_queue_order() {
        let (dispatcher, mut queue) = Dispatcher::<Vec<u32>>::channel();
        let mut state = Vec::new();

        let background = dispatcher.clone();
        tokio::spawn(async move {
            background.queue_update(|state: &mut Vec<u32>| state.push(1));
            background.queue_update(|state: &mut Vec<u32>| state.push(2));
        })
        .await
        .expect("spawned task");
        dispatcher.queue_update(|state: &mut Vec<u32>| state.push(3));

        let job = queue.next().await.expect("first job");
        job(&mut state);
        assert_eq!(queue.drain(&mut state), 2);
        assert_eq!(state, vec![1, 2, 3]);
    }

    #[test]
    fn run_now_applies_synchronously() {
        let mut state = 0u32;
        Dispatcher::<u32>::run_now(&mut state, |value| *value += 5);
        assert_eq!(state, 5);
    }

    #[test]
    fn queue_update_reports_closed_loop() {
        let (dispatcher, queue) = Dispatcher::<u32>::channel();
        drop(queue);
        assert!(!dispatcher.queue_update(|value| *value += 1));
    }
}
