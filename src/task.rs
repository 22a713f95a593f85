//! Background training with a two-event boundary.
//!
//! A job runs on the rayon pool and reports `Started` then exactly one
//! `Finished` over a channel. Trainers poll a [`CancelToken`] once per
//! iteration.

use anyhow::{Result, bail};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, channel};

use crate::error::HmmError;

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Fails with [`HmmError::Cancelled`] once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            bail!(HmmError::Cancelled);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum TaskEvent<T> {
    Started,
    Finished(Result<T>),
}

pub struct TrainingTask<T> {
    events: Receiver<TaskEvent<T>>,
    cancel: CancelToken,
}

impl<T: Send + 'static> TrainingTask<T> {
    pub fn spawn<F>(job: F) -> Self
    where
        F: FnOnce(&CancelToken) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = channel();
        let cancel = CancelToken::new();
        let token = cancel.clone();
        rayon::spawn(move || {
            // the receiver may already be gone; nothing to report to then
            let _ = tx.send(TaskEvent::Started);
            let result = job(&token);
            let _ = tx.send(TaskEvent::Finished(result));
        });
        Self { events: rx, cancel }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn events(&self) -> &Receiver<TaskEvent<T>> {
        &self.events
    }

    /// Blocks until the job finishes and returns its result.
    pub fn wait(self) -> Result<T> {
        while let Ok(event) = self.events.recv() {
            if let TaskEvent::Finished(result) = event {
                return result;
            }
        }
        bail!("training task ended without reporting a result")
    }
}
