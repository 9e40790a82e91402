//! Bridges completion callbacks into futures.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_channel::oneshot;
use futures_lite::ready;

use crate::error::ErrorKind;
use crate::{Error, Result};

/// A future resolved by a completion callback.
///
/// Resolves to [`ErrorKind::Internal`] if the callback is dropped without being called.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Completion<T> {
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T: 'static> Completion<T> {
    /// Creates a completion and the callback that resolves it.
    pub fn new() -> (impl FnOnce(Result<T>) + 'static, Self) {
        let (sender, receiver) = oneshot::channel();
        let callback = move |result: Result<T>| {
            // The receiver is gone if the future was dropped; nobody is waiting for the result.
            let _ = sender.send(result);
        };
        (callback, Completion { receiver })
    }

    /// Creates a completion resolved by the first event of a listener. Later events are discarded.
    pub fn first_event() -> (impl FnMut(Result<T>) + 'static, Self) {
        let (callback, completion) = Self::new();
        let mut callback = Some(callback);
        let listener = move |result: Result<T>| {
            if let Some(callback) = callback.take() {
                callback(result);
            }
        };
        (listener, completion)
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = ready!(Pin::new(&mut self.receiver).poll(cx));
        Poll::Ready(result.unwrap_or_else(|oneshot::Canceled| {
            Err(Error::new(
                ErrorKind::Internal,
                None,
                "operation dropped before completing",
            ))
        }))
    }
}
