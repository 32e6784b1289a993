//! Live fan-out of feed items to independent subscribers
//!
//! Built on a tokio broadcast channel, so publishing never waits. A subscriber
//! that falls more than `capacity` items behind skips ahead to the most recent
//! ones; the producers and the other viewers are unaffected.

use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tracing::{debug, trace};

use crate::{ConnectionStatus, FeedItem};

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Cheaply cloneable handle to the live feed
#[derive(Debug, Clone)]
pub struct Broadcaster {
    sender: broadcast::Sender<FeedItem>,
    capacity: usize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    /// Registers a new viewer. The first item it receives is a connection
    /// status notice.
    pub fn subscribe(&self) -> Subscription {
        let receiver = self.sender.subscribe();
        debug!(
            "subscriber connected ({} total)",
            self.sender.receiver_count()
        );

        Subscription {
            receiver,
            capacity: self.capacity,
            greeted: false,
            dropped: 0,
        }
    }

    /// Offers an item to every current subscriber. Returns how many received it.
    pub fn publish(&self, item: FeedItem) -> usize {
        match self.sender.send(item) {
            Ok(receivers) => {
                trace!("published to {receivers} subscribers");
                receivers
            }
            Err(_) => 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// One viewer's view of the live feed. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<FeedItem>,
    capacity: usize,
    greeted: bool,
    dropped: u64,
}

impl Subscription {
    fn greeting(&mut self) -> Option<FeedItem> {
        if self.greeted {
            return None;
        }
        self.greeted = true;
        Some(FeedItem::Status {
            status: ConnectionStatus::Connected,
        })
    }

    /// Discards unread items beyond this subscriber's capacity, oldest first.
    /// The channel buffer is rounded up internally, so lag alone is not enough.
    fn skip_stale(&mut self) {
        while self.receiver.len() > self.capacity {
            match self.receiver.try_recv() {
                Ok(_) => self.dropped += 1,
                Err(TryRecvError::Lagged(skipped)) => self.dropped += skipped,
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    /// Waits for the next item. Returns `None` once the broadcaster is gone
    /// and the queue is drained.
    pub async fn recv(&mut self) -> Option<FeedItem> {
        if let Some(status) = self.greeting() {
            return Some(status);
        }

        loop {
            self.skip_stale();
            match self.receiver.recv().await {
                Ok(item) => return Some(item),
                Err(RecvError::Lagged(skipped)) => {
                    trace!("subscriber lagged by {skipped} items");
                    self.dropped += skipped;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<FeedItem> {
        if let Some(status) = self.greeting() {
            return Some(status);
        }

        loop {
            self.skip_stale();
            match self.receiver.try_recv() {
                Ok(item) => return Some(item),
                Err(TryRecvError::Lagged(skipped)) => self.dropped += skipped,
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Number of items discarded because this subscriber fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
