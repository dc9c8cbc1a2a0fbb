use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;

/// An ordered, non-restartable sequence of generated text fragments.
///
/// Cancelling (through [`FragmentStream::close`], a cloned
/// [`CancellationToken`], or by dropping the stream) drops the producer and the
/// backend connection it holds. No fragment is yielded after cancellation.
pub struct FragmentStream {
    inner: Option<BoxStream<'static, String>>,
    cancel: CancellationToken,
}

impl FragmentStream {
    pub fn new(inner: BoxStream<'static, String>, cancel: CancellationToken) -> Self {
        Self {
            inner: Some(inner),
            cancel,
        }
    }

    /// A stream over already-known fragments, e.g. a single diagnostic.
    pub fn from_fragments<I>(fragments: I) -> Self
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: Send + 'static,
    {
        Self::new(stream::iter(fragments).boxed(), CancellationToken::new())
    }

    /// Token that cancels this stream from elsewhere, e.g. when the calling
    /// session is torn down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop production now and release the producer.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.inner = None;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none() || self.cancel.is_cancelled()
    }

    /// Drain the stream, accumulating every fragment.
    pub async fn collect_text(mut self) -> String {
        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            text.push_str(&fragment);
        }
        text
    }
}

impl Stream for FragmentStream {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        let this = self.get_mut();
        if this.cancel.is_cancelled() {
            this.inner = None;
            return Poll::Ready(None);
        }
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match inner.poll_next_unpin(cx) {
            Poll::Ready(None) => {
                this.inner = None;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for FragmentStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
