//! Cancelable push subscriptions used for live store queries.
//!
//! A `LiveQuery` yields the current snapshot first and then one full snapshot
//! per change. `next()` returning `None` means the producer stopped (store
//! shutdown or an unrecoverable query error); it is not an empty result.
use futures::stream::{self, Stream};
use tokio::sync::mpsc;

/// Create a connected publisher/subscription pair.
pub fn channel<T>() -> (LivePublisher<T>, LiveQuery<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LivePublisher { tx }, LiveQuery { rx })
}

#[derive(Debug)]
pub struct LivePublisher<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for LivePublisher<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> LivePublisher<T> {
    /// Push a snapshot. Returns `false` once the subscriber has gone away.
    pub fn publish(&self, value: T) -> bool {
        self.tx.send(value).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct LiveQuery<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> LiveQuery<T> {
    /// Next snapshot, or `None` once the sequence has ended. Cancel-safe.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Stop receiving. Snapshots already queued are still drained by `next`.
    pub fn cancel(&mut self) {
        self.rx.close();
    }
}

impl<T: Send + 'static> LiveQuery<T> {
    pub fn into_stream(self) -> impl Stream<Item = T> + Send {
        stream::unfold(self, |mut query| async move {
            query.next().await.map(|item| (item, query))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn delivers_in_order_then_ends() {
        let (publisher, mut query) = channel();
        assert!(publisher.publish(1));
        assert!(publisher.publish(2));
        drop(publisher);
        assert_eq!(query.next().await, Some(1));
        assert_eq!(query.next().await, Some(2));
        assert_eq!(query.next().await, None);
    }

    #[tokio::test]
    async fn cancel_closes_publisher() {
        let (publisher, mut query) = channel::<u8>();
        assert!(!publisher.is_closed());
        query.cancel();
        assert!(publisher.is_closed());
        assert!(!publisher.publish(3));
    }

    #[tokio::test]
    async fn stream_adapter_yields_all_items() {
        let (publisher, query) = channel();
        publisher.publish("a");
        publisher.publish("b");
        drop(publisher);
        let items: Vec<_> = query.into_stream().collect().await;
        assert_eq!(items, vec!["a", "b"]);
    }
}
