//! Bounded request admission.
//!
//! The queue caps concurrent in-flight work. `acquire` blocks (or fails)
//! until a slot is free and returns a permit that releases its slot on
//! drop, so every exit path — success, error, panic — releases exactly
//! once.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::error::{ServerError, ServerResult};

/// What to do when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowStrategy {
    /// Fail immediately with a capacity error; never blocks
    Reject,
    /// Wait FIFO for a wake signal from a release
    Queue,
    /// Poll: sleep a fixed interval and re-check
    Sleep,
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum concurrent in-flight requests
    pub max_concurrent: usize,
    /// Overflow behaviour
    pub strategy: OverflowStrategy,
    /// Sleep interval for [`OverflowStrategy::Sleep`]
    pub sleep_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 100,
            strategy: OverflowStrategy::Queue,
            sleep_ms: 100,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    in_flight: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Bounded admission queue.
#[derive(Debug)]
pub struct RequestQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
}

/// A held slot. Dropping it releases the slot and wakes the head waiter.
#[derive(Debug)]
pub struct QueuePermit {
    queue: Arc<RequestQueue>,
}

impl Drop for QueuePermit {
    fn drop(&mut self) {
        self.queue.release();
    }
}

impl RequestQueue {
    /// Create a queue.
    pub fn new(config: QueueConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(QueueState::default()),
        })
    }

    /// Acquire a slot according to the configured strategy.
    ///
    /// Woken waiters re-check capacity in a loop: another waiter may have
    /// raced them to the freed slot, so waking is only a hint.
    pub async fn acquire(self: &Arc<Self>) -> ServerResult<QueuePermit> {
        loop {
            let wait = {
                let mut state = self.state.lock();
                if state.in_flight < self.config.max_concurrent {
                    state.in_flight += 1;
                    return Ok(QueuePermit {
                        queue: Arc::clone(self),
                    });
                }
                match self.config.strategy {
                    OverflowStrategy::Reject => {
                        return Err(ServerError::CapacityExceeded {
                            limit: self.config.max_concurrent,
                        });
                    }
                    OverflowStrategy::Queue => {
                        let (tx, rx) = oneshot::channel();
                        state.waiters.push_back(tx);
                        Some(rx)
                    }
                    OverflowStrategy::Sleep => None,
                }
            };

            match wait {
                // A closed channel means the releaser dropped us; loop and
                // re-check either way.
                Some(rx) => {
                    let _ = rx.await;
                }
                None => tokio::time::sleep(Duration::from_millis(self.config.sleep_ms)).await,
            }
        }
    }

    fn release(&self) {
        let mut decremented = false;
        loop {
            let waiter = {
                let mut state = self.state.lock();
                if !decremented {
                    state.in_flight = state.in_flight.saturating_sub(1);
                    decremented = true;
                }
                state.waiters.pop_front()
            };
            // Signal outside the lock; a waiter that gave up is skipped and
            // the next one is woken instead.
            match waiter {
                Some(tx) => {
                    if tx.send(()).is_ok() {
                        return;
                    }
                }
                None => return,
            }
        }
    }

    /// Requests currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    /// Waiters parked behind the capacity limit.
    pub fn queued(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Whether a reject-strategy acquire would fail right now.
    pub fn is_at_capacity(&self) -> bool {
        self.in_flight() >= self.config.max_concurrent
    }
}
