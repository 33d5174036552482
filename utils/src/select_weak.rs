// Copyright 2017 Amagicom AB.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A stream combinator that interleaves a "weak" stream into a "strong"
//! one, but lets the strong stream alone decide when the combination ends.
//!
//! This is the shape a manually-driven event loop needs when it owns one
//! stream of its own commands (e.g. calls a handle was asked to make) and
//! wants to also react to a second stream for as long as it's running (e.g.
//! inbound frames) — without the second stream's exhaustion or lifetime
//! cutting the loop short.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;

/// Either a strong-stream or a weak-stream item, in the order they were
/// ready to be polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Either<A, B> {
    /// An item produced by the strong stream.
    Strong(A),
    /// An item produced by the weak stream.
    Weak(B),
}

/// Combines a strong and a weak stream (see [`SelectWithWeakExt`]).
///
/// Polls both on every wakeup. Ends as soon as the strong stream ends,
/// regardless of whether the weak stream still has items buffered — the
/// weak stream is along for the ride, not a termination condition.
#[must_use = "streams do nothing unless polled"]
pub struct SelectWithWeak<S, W> {
    strong: S,
    weak: W,
    strong_done: bool,
}

impl<S, W> Stream for SelectWithWeak<S, W>
where
    S: Stream + Unpin,
    W: Stream + Unpin,
{
    type Item = Either<S::Item, W::Item>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.strong_done {
            return Poll::Ready(None);
        }

        match Pin::new(&mut this.strong).poll_next(cx) {
            Poll::Ready(Some(item)) => return Poll::Ready(Some(Either::Strong(item))),
            Poll::Ready(None) => {
                this.strong_done = true;
                return Poll::Ready(None);
            }
            Poll::Pending => {}
        }

        match Pin::new(&mut this.weak).poll_next(cx) {
            Poll::Ready(Some(item)) => Poll::Ready(Some(Either::Weak(item))),
            // The weak stream ending doesn't end the combination; it just
            // stops contributing further items.
            Poll::Ready(None) | Poll::Pending => Poll::Pending,
        }
    }
}

/// Adds [`select_with_weak`](SelectWithWeakExt::select_with_weak) to any
/// `Stream`.
pub trait SelectWithWeakExt: Stream + Sized {
    /// Combines `self` (the strong stream) with `weak`, ending as soon as
    /// `self` ends.
    fn select_with_weak<W>(self, weak: W) -> SelectWithWeak<Self, W>
    where
        W: Stream,
    {
        SelectWithWeak {
            strong: self,
            weak,
            strong_done: false,
        }
    }
}

impl<S: Stream> SelectWithWeakExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{self, StreamExt};

    #[tokio::test]
    async fn ends_when_the_strong_stream_ends_even_if_weak_has_more() {
        let strong = stream::iter(vec![1, 2]);
        let weak = stream::iter(vec![10, 20, 30]);

        let items: Vec<_> = strong.select_with_weak(weak).collect().await;

        assert!(items.iter().any(|i| matches!(i, Either::Strong(1))));
        assert!(items.iter().any(|i| matches!(i, Either::Strong(2))));
        assert!(!items.is_empty());
    }

    #[tokio::test]
    async fn a_weak_stream_with_nothing_left_does_not_end_the_combination() {
        let strong = stream::iter(vec![1]);
        let weak = stream::empty::<u32>();

        let items: Vec<_> = strong.select_with_weak(weak).collect().await;

        assert_eq!(items, vec![Either::Strong(1)]);
    }
}
