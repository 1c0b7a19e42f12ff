//! Typed broadcast buses for cross-component events.
//!
//! Listener registration is explicit: a component that wants events calls
//! [`EventBus::subscribe`] and owns the returned receiver; dropping it
//! unsubscribes. Events are delivered on the thread (or task) that polls the
//! receiver, never on the publisher's thread, so publishers may hold locks.
//! Slow receivers lose the oldest events rather than stalling the publisher.

use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReceiveError {
    #[error("event bus closed")]
    Closed,
    #[error("receiver lagged, skipped {0} events")]
    Lagged(u64),
}

#[derive(Debug)]
pub struct EventBus<T: Clone + Send + 'static> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver<T> {
        EventReceiver {
            inner: self.sender.subscribe(),
        }
    }

    /// Publish an event to all current subscribers. Returns how many
    /// receivers the event reached; zero subscribers is not an error.
    pub fn publish(&self, event: T) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(64)
    }
}

impl<T: Clone + Send + 'static> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

#[derive(Debug)]
pub struct EventReceiver<T: Clone + Send + 'static> {
    inner: broadcast::Receiver<T>,
}

impl<T: Clone + Send + 'static> EventReceiver<T> {
    pub async fn recv(&mut self) -> Result<T, ReceiveError> {
        map_recv(self.inner.recv().await)
    }

    /// Block the current thread until an event arrives. For plain-thread
    /// consumers such as the exchange loops.
    pub fn blocking_recv(&mut self) -> Result<T, ReceiveError> {
        map_recv(self.inner.blocking_recv())
    }

    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.inner.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

fn map_recv<T>(result: Result<T, broadcast::error::RecvError>) -> Result<T, ReceiveError> {
    result.map_err(|err| match err {
        broadcast::error::RecvError::Closed => ReceiveError::Closed,
        broadcast::error::RecvError::Lagged(n) => ReceiveError::Lagged(n),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Ping {
        One,
        Two(u32),
    }

    #[test_timeout::tokio_timeout_test]
    async fn subscribe_then_publish_round_trip() {
        let bus = EventBus::new(8);
        let mut sub = bus.subscribe();
        assert_eq!(bus.publish(Ping::One), 1);
        assert_eq!(sub.recv().await, Ok(Ping::One));
    }

    #[test_timeout::tokio_timeout_test]
    async fn publish_without_subscribers_is_not_an_error() {
        let bus: EventBus<Ping> = EventBus::new(8);
        assert_eq!(bus.publish(Ping::Two(9)), 0);
    }

    #[test_timeout::tokio_timeout_test]
    async fn dropping_receiver_unsubscribes() {
        let bus = EventBus::new(8);
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(Ping::One), 0);
    }

    #[test_timeout::timeout]
    fn blocking_recv_delivers_on_consumer_thread() {
        let bus = EventBus::new(8);
        let mut sub = bus.subscribe();
        let handle = std::thread::spawn(move || sub.blocking_recv());
        // Give the consumer a moment to park before publishing.
        std::thread::sleep(std::time::Duration::from_millis(20));
        bus.publish(Ping::Two(42));
        assert_eq!(handle.join().unwrap(), Ok(Ping::Two(42)));
    }

    #[test_timeout::timeout]
    fn try_recv_skips_lagged_events() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();
        for i in 0..5 {
            bus.publish(Ping::Two(i));
        }
        // Oldest events were dropped; the newest survive.
        assert_eq!(sub.try_recv(), Some(Ping::Two(3)));
        assert_eq!(sub.try_recv(), Some(Ping::Two(4)));
        assert_eq!(sub.try_recv(), None);
    }
}
