//! Body wrapper used to stream upstream responses back to the caller.
//!
//! Frames are forwarded as they arrive, never buffered or inspected beyond
//! their length. The wrapper ends the stream early in two cases:
//!
//! - The write deadline passes: the stream fails with `TimedOut`, which
//!   aborts the inbound connection.
//! - The cancellation token fires (client gone or shutdown drain expired):
//!   the stream fails with `Interrupted`.
//!
//! Both cases fail rather than end, so a chunked response is cut off
//! without its terminating chunk and the caller never mistakes a truncated
//! body for a complete one.

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::time::{Instant, Sleep, sleep_until};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, warn};

use crate::transport::upstream::BoxError;

/// Streaming body with a hard deadline and cancellation.
pub struct RelayBody<B> {
    inner: B,
    deadline: Pin<Box<Sleep>>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    bytes_relayed: u64,
    done: bool,
}

impl<B> RelayBody<B> {
    /// Wrap `inner`, failing it if it is still streaming at `deadline`.
    pub fn new(inner: B, deadline: Instant, cancel: CancellationToken) -> Self {
        Self {
            inner,
            deadline: Box::pin(sleep_until(deadline)),
            cancelled: Box::pin(cancel.cancelled_owned()),
            bytes_relayed: 0,
            done: false,
        }
    }

    pub fn bytes_relayed(&self) -> u64 {
        self.bytes_relayed
    }
}

impl<B> Body for RelayBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;

        if this.done {
            return Poll::Ready(None);
        }

        // Ready frames are delivered even if a deadline fired in the meantime
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.bytes_relayed += data.len() as u64;
                }
                return Poll::Ready(Some(Ok(frame)));
            }
            Poll::Ready(Some(Err(e))) => {
                this.done = true;
                let e: BoxError = e.into();
                warn!(error = %e, bytes = this.bytes_relayed, "Upstream body failed mid-stream");
                return Poll::Ready(Some(Err(e)));
            }
            Poll::Ready(None) => {
                this.done = true;
                debug!(bytes = this.bytes_relayed, "Upstream body relayed");
                return Poll::Ready(None);
            }
            Poll::Pending => {}
        }

        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.done = true;
            debug!(bytes = this.bytes_relayed, "Relay cancelled");
            return Poll::Ready(Some(Err(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "relay cancelled",
            )
            .into())));
        }

        if this.deadline.as_mut().poll(cx).is_ready() {
            this.done = true;
            warn!(bytes = this.bytes_relayed, "Write deadline exceeded while relaying");
            return Poll::Ready(Some(Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "write deadline exceeded",
            )
            .into())));
        }

        Poll::Pending
    }

    fn is_end_stream(&self) -> bool {
        self.done || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
