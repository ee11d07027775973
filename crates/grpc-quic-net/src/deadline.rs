//! Absolute I/O deadlines for poll-based readers and writers.

use std::future::Future;
use std::pin::Pin;
use std::task::Context;

use tokio::time::{Instant, Sleep};

/// An optional point in time after which I/O should fail.
///
/// The inner timer is polled alongside the I/O so that a pending read or
/// write is woken when the deadline passes.
#[derive(Debug, Default)]
pub(crate) struct Deadline {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Deadline {
    /// Set or clear the deadline. Reuses the existing timer where possible.
    pub(crate) fn set(&mut self, at: Option<Instant>) {
        match (at, self.sleep.as_mut()) {
            (Some(at), Some(sleep)) => sleep.as_mut().reset(at),
            (Some(at), None) => self.sleep = Some(Box::pin(tokio::time::sleep_until(at))),
            (None, _) => self.sleep = None,
        }
    }

    pub(crate) fn get(&self) -> Option<Instant> {
        self.sleep.as_ref().map(|sleep| sleep.deadline())
    }

    /// Returns true once the deadline has passed. Registers the waker otherwise.
    pub(crate) fn poll_expired(&mut self, cx: &mut Context<'_>) -> bool {
        let Some(sleep) = self.sleep.as_mut() else {
            return false;
        };
        if Instant::now() >= sleep.deadline() {
            return true;
        }
        sleep.as_mut().poll(cx).is_ready()
    }
}
