//! Single-producer, single-consumer event queue bridging push and pull.
//!
//! The producer side (the process driver) pushes events as stdout is decoded
//! and finishes with exactly one terminal signal. The consumer side pulls with
//! [`QueueReceiver::next`]. All three producer operations go through one
//! deliver-or-buffer step: a waiting consumer gets the slot handed over
//! directly, otherwise the slot is appended to the buffer.
//!
//! The buffer is unbounded. The producer is a pipe reader and is never made to
//! wait on a slow consumer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;

/// One entry in the queue.
#[derive(Debug)]
enum Slot<T, E> {
    Item(T),
    Failure(E),
    End,
}

impl<T, E> Slot<T, E> {
    fn is_terminal(&self) -> bool {
        !matches!(self, Self::Item(_))
    }
}

#[derive(Debug)]
struct Inner<T, E> {
    buffer: VecDeque<Slot<T, E>>,
    /// Present only while the consumer waits on an empty buffer.
    waiter: Option<oneshot::Sender<Slot<T, E>>>,
    terminated: bool,
}

type Shared<T, E> = Arc<Mutex<Inner<T, E>>>;

fn lock<T, E>(shared: &Shared<T, E>) -> MutexGuard<'_, Inner<T, E>> {
    // The lock is never held across user code, so a poisoned guard still
    // protects a consistent buffer.
    shared
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Create a fresh queue, returning its producer and consumer halves.
#[must_use]
pub fn event_queue<T, E>() -> (QueueSender<T, E>, QueueReceiver<T, E>) {
    let shared = Arc::new(Mutex::new(Inner {
        buffer: VecDeque::new(),
        waiter: None,
        terminated: false,
    }));
    (
        QueueSender {
            shared: Arc::clone(&shared),
        },
        QueueReceiver {
            shared,
            pending: None,
            finished: false,
        },
    )
}

/// Producer half of the queue.
#[derive(Debug)]
pub struct QueueSender<T, E> {
    shared: Shared<T, E>,
}

impl<T, E> QueueSender<T, E> {
    /// Deliver an event. Returns false if the queue has already terminated.
    pub fn push(&self, item: T) -> bool {
        self.deliver(Slot::Item(item))
    }

    /// Terminate the queue with an error, delivered after buffered events.
    pub fn fail(&self, err: E) -> bool {
        self.deliver(Slot::Failure(err))
    }

    /// Terminate the queue cleanly.
    pub fn end(&self) -> bool {
        self.deliver(Slot::End)
    }

    /// Returns true once `fail` or `end` has been accepted.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        lock(&self.shared).terminated
    }

    fn deliver(&self, slot: Slot<T, E>) -> bool {
        let mut inner = lock(&self.shared);
        if inner.terminated {
            return false;
        }
        inner.terminated = slot.is_terminal();

        let slot = match inner.waiter.take() {
            Some(waiter) => match waiter.send(slot) {
                Ok(()) => return true,
                // The receiver is gone.
                Err(slot) => slot,
            },
            None => slot,
        };
        inner.buffer.push_back(slot);
        true
    }
}

/// Consumer half of the queue.
#[derive(Debug)]
pub struct QueueReceiver<T, E> {
    shared: Shared<T, E>,
    /// The parked wait, kept across calls so a slot handed over to a `next`
    /// future that was then dropped is picked up by the following call.
    pending: Option<oneshot::Receiver<Slot<T, E>>>,
    finished: bool,
}

impl<T, E> QueueReceiver<T, E> {
    /// Wait for the next event.
    ///
    /// Returns `Some(Ok(_))` for each event in push order, then either
    /// `Some(Err(_))` once if the queue failed, followed by `None` forever.
    pub async fn next(&mut self) -> Option<Result<T, E>> {
        if self.finished {
            return None;
        }

        if self.pending.is_none() {
            match self.take_or_wait() {
                Ok(slot) => return self.settle(slot),
                Err(rx) => self.pending = Some(rx),
            }
        }

        let slot = match self.pending.as_mut() {
            // The sender was dropped without a terminal signal.
            Some(rx) => rx.await.unwrap_or(Slot::End),
            None => Slot::End,
        };
        self.pending = None;
        self.settle(slot)
    }

    fn settle(&mut self, slot: Slot<T, E>) -> Option<Result<T, E>> {
        match slot {
            Slot::Item(item) => Some(Ok(item)),
            Slot::Failure(err) => {
                self.finished = true;
                Some(Err(err))
            }
            Slot::End => {
                self.finished = true;
                None
            }
        }
    }

    /// Number of slots waiting in the buffer.
    #[must_use]
    pub fn buffered(&self) -> usize {
        lock(&self.shared).buffer.len()
    }

    /// Convert into a `Stream` of results.
    pub fn into_stream(self) -> impl futures_core::Stream<Item = Result<T, E>> {
        futures_util::stream::unfold(self, |mut rx| async move {
            let item = rx.next().await?;
            Some((item, rx))
        })
    }

    fn take_or_wait(&self) -> Result<Slot<T, E>, oneshot::Receiver<Slot<T, E>>> {
        let mut inner = lock(&self.shared);
        if let Some(slot) = inner.buffer.pop_front() {
            return Ok(slot);
        }
        // Terminated with nothing buffered: the sender went away without a
        // terminal slot.
        if inner.terminated {
            return Ok(Slot::End);
        }
        let (tx, rx) = oneshot::channel();
        inner.waiter = Some(tx);
        Err(rx)
    }
}

impl<T, E> Drop for QueueSender<T, E> {
    fn drop(&mut self) {
        let mut inner = lock(&self.shared);
        // Wake a parked consumer so it observes the missing terminal as End.
        inner.waiter.take();
        inner.terminated = true;
    }
}
