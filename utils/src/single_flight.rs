// Copyright 2017 Amagicom AB.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A generic single-flight primitive: at most one instance of an async
//! operation runs at a time, with its result fanned out to every concurrent
//! caller. Used by `jsonrpc-rs-core`'s connection manager to coalesce
//! concurrent `ensureConnected()` calls into one dial.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};

/// The fault a single-flight wait can resolve with.
#[derive(Debug, Clone)]
pub enum SingleFlightError<E> {
    /// The underlying operation itself failed.
    Failed(E),
    /// This waiter (or every waiter) was dropped before the operation
    /// resolved, and the operation was aborted as a result.
    Cancelled,
}

type WaiterResult<T, E> = Result<T, SingleFlightError<E>>;

enum State<T, E> {
    Idle,
    InFlight {
        waiters: Vec<oneshot::Sender<WaiterResult<T, E>>>,
        live_waiters: Arc<AtomicUsize>,
        abort: AbortHandle,
    },
    Ready(T),
}

/// Coalesces concurrent callers of an async operation into a single
/// in-flight attempt, caching the result once it succeeds.
///
/// If every waiter on an in-flight attempt is dropped before it resolves,
/// the attempt itself is aborted — this is what lets a connection manager
/// cancel a dial nobody is waiting on anymore.
pub struct SingleFlight<T, E> {
    state: Mutex<State<T, E>>,
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// A fresh, idle single-flight.
    pub fn new() -> Arc<Self> {
        Arc::new(SingleFlight {
            state: Mutex::new(State::Idle),
        })
    }

    /// Returns the cached result if ready, joins the in-flight attempt if
    /// one is running, or starts one via `start` if idle.
    pub async fn run<F>(self: &Arc<Self>, start: F) -> WaiterResult<T, E>
    where
        F: FnOnce() -> Pin<Box<dyn Future<Output = Result<T, E>> + Send>>,
    {
        enum Action<T, E> {
            Ready(WaiterResult<T, E>),
            Wait(Waiter<T, E>),
        }

        let action = {
            let mut state = self.state.lock().unwrap();
            match &mut *state {
                State::Ready(value) => Action::Ready(Ok(value.clone())),
                State::InFlight {
                    waiters,
                    live_waiters,
                    abort,
                } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    live_waiters.fetch_add(1, Ordering::SeqCst);
                    Action::Wait(Waiter {
                        rx,
                        live_waiters: live_waiters.clone(),
                        abort: abort.clone(),
                        done: false,
                    })
                }
                State::Idle => {
                    let (tx, rx) = oneshot::channel();
                    let live_waiters = Arc::new(AtomicUsize::new(1));
                    let join: JoinHandle<Result<T, E>> = tokio::spawn(start());
                    let abort = join.abort_handle();
                    *state = State::InFlight {
                        waiters: vec![tx],
                        live_waiters: live_waiters.clone(),
                        abort: abort.clone(),
                    };
                    drop(state);
                    let this = self.clone();
                    tokio::spawn(async move { this.drive(join).await });
                    Action::Wait(Waiter {
                        rx,
                        live_waiters,
                        abort,
                        done: false,
                    })
                }
            }
        };

        match action {
            Action::Ready(r) => r,
            Action::Wait(w) => w.await,
        }
    }

    async fn drive(self: Arc<Self>, join: JoinHandle<Result<T, E>>) {
        let result: WaiterResult<T, E> = match join.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(SingleFlightError::Failed(e)),
            Err(_join_err) => Err(SingleFlightError::Cancelled),
        };

        let waiters = {
            let mut state = self.state.lock().unwrap();
            let previous = std::mem::replace(&mut *state, State::Idle);
            match previous {
                State::InFlight { waiters, .. } => {
                    *state = match &result {
                        Ok(value) => State::Ready(value.clone()),
                        Err(_) => State::Idle,
                    };
                    waiters
                }
                other => {
                    *state = other;
                    Vec::new()
                }
            }
        };

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    /// Forces the state back to `Idle`: aborts an in-flight attempt, or
    /// drops a cached result. Returns whether there was anything to clear.
    pub fn clear(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match &*state {
            State::Idle => false,
            State::InFlight { abort, .. } => {
                abort.abort();
                *state = State::Idle;
                true
            }
            State::Ready(_) => {
                *state = State::Idle;
                true
            }
        }
    }

    /// Whether a result is currently cached.
    pub fn is_ready(&self) -> bool {
        matches!(&*self.state.lock().unwrap(), State::Ready(_))
    }
}

struct Waiter<T, E> {
    rx: oneshot::Receiver<WaiterResult<T, E>>,
    live_waiters: Arc<AtomicUsize>,
    abort: AbortHandle,
    done: bool,
}

impl<T, E> Future for Waiter<T, E> {
    type Output = WaiterResult<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => {
                this.done = true;
                Poll::Ready(result)
            }
            Poll::Ready(Err(_)) => {
                this.done = true;
                Poll::Ready(Err(SingleFlightError::Cancelled))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T, E> Drop for Waiter<T, E> {
    fn drop(&mut self) {
        if !self.done && self.live_waiters.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.abort.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn caches_a_successful_result() {
        let flight: Arc<SingleFlight<u32, String>> = SingleFlight::new();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let result = flight
                .run(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Box::pin(async { Ok(42) })
                })
                .await;
            assert!(matches!(result, Ok(42)));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_join_the_same_attempt() {
        let flight: Arc<SingleFlight<u32, String>> = SingleFlight::new();
        let calls = Arc::new(AtomicU32::new(0));

        let make = |flight: Arc<SingleFlight<u32, String>>, calls: Arc<AtomicU32>| async move {
            flight
                .run(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Box::pin(async {
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        Ok(7)
                    })
                })
                .await
        };

        let (a, b) = tokio::join!(make(flight.clone(), calls.clone()), make(flight.clone(), calls.clone()));
        assert!(matches!(a, Ok(7)));
        assert!(matches!(b, Ok(7)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_attempt_clears_the_cache() {
        let flight: Arc<SingleFlight<u32, String>> = SingleFlight::new();
        let result = flight.run(|| Box::pin(async { Err("boom".to_string()) })).await;
        assert!(matches!(result, Err(SingleFlightError::Failed(_))));
        assert!(!flight.is_ready());
    }
}
