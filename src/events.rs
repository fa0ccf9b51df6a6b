//! Change notification for owned state objects.

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Fan-out of events to any number of channel subscribers.
///
/// Subscribers that dropped their receiver are forgotten on the next publish.
#[derive(Debug)]
pub struct Notifier<E> {
    subscribers: Vec<Sender<E>>,
}

impl<E: Clone> Notifier<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    /// Register a new subscriber.
    pub fn subscribe(&mut self) -> Receiver<E> {
        let (sender, receiver) = unbounded();
        self.subscribers.push(sender);
        receiver
    }

    pub fn publish(&mut self, event: E) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<E: Clone> Default for Notifier<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_out_and_pruning() {
        let mut notifier = Notifier::new();
        let first = notifier.subscribe();
        let second = notifier.subscribe();

        notifier.publish(1u32);
        assert_eq!(first.try_recv(), Ok(1));
        assert_eq!(second.try_recv(), Ok(1));

        drop(second);
        notifier.publish(2);
        assert_eq!(notifier.subscriber_count(), 1);
        assert_eq!(first.try_recv(), Ok(2));
    }
}
