use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("trying to send to a closed channel")]
pub struct ChannelClosed;

struct Slot<T> {
    value: Option<T>,
    closed: bool,
}

/// A single-slot, last-value-wins channel.
///
/// `send` never blocks and never queues: an unread value is overwritten by the next one.
/// Consumers only ever see the most recent state.
pub struct ConflatedChannel<T> {
    slot: Arc<Mutex<Slot<T>>>,
    notify: Arc<Notify>,
}

impl<T> Clone for ConflatedChannel<T> {
    fn clone(&self) -> Self {
        Self { slot: self.slot.clone(), notify: self.notify.clone() }
    }
}

impl<T> Default for ConflatedChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConflatedChannel<T> {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot { value: None, closed: false })),
            notify: Arc::new(Notify::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `value`, replacing any value not yet taken.
    pub fn send(&self, value: T) -> Result<(), ChannelClosed> {
        {
            let mut slot = self.lock();
            if slot.closed {
                return Err(ChannelClosed);
            }
            slot.value = Some(value);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Takes the pending value, if any, without waiting.
    pub fn try_recv(&self) -> Option<T> {
        self.lock().value.take()
    }

    /// Waits for a value. Returns `None` once the channel is closed and empty.
    pub async fn recv(&self) -> Option<T> {
        loop {
            // Registered before the slot is checked, so a send in between is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut slot = self.lock();
                if let Some(value) = slot.value.take() {
                    return Some(value);
                }
                if slot.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Resolves once the channel has been closed.
    pub async fn closed(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    /// Closes the channel and wakes every waiting clone. A value already in the slot
    /// can still be taken.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Closed with nothing left to take.
    pub fn is_finished(&self) -> bool {
        let slot = self.lock();
        slot.closed && slot.value.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn keeps_only_the_latest_value() {
        let channel = ConflatedChannel::new();
        channel.send(1).unwrap();
        channel.send(2).unwrap();
        assert_eq!(channel.try_recv(), Some(2));
        assert_eq!(channel.try_recv(), None);
    }

    #[test]
    fn send_after_close_fails() {
        let channel = ConflatedChannel::new();
        channel.close();
        assert_eq!(channel.send("late"), Err(ChannelClosed));
        assert!(channel.is_finished());
    }

    #[test]
    fn pending_value_survives_close() {
        let channel = ConflatedChannel::new();
        channel.send(7).unwrap();
        channel.close();
        assert!(!channel.is_finished());
        assert_eq!(channel.try_recv(), Some(7));
        assert!(channel.is_finished());
    }

    #[tokio::test]
    async fn recv_wakes_on_send_and_ends_on_close() {
        let channel = ConflatedChannel::new();
        let consumer = {
            let channel = channel.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(v) = channel.recv().await {
                    seen.push(v);
                }
                seen
            })
        };

        channel.send(1u64).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.send(2).unwrap();
        channel.send(3).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.close();

        let seen = tokio::time::timeout(Duration::from_secs(2), consumer).await.unwrap().unwrap();
        assert_eq!(seen, vec![1, 3]);
    }

    #[tokio::test]
    async fn closed_resolves_after_close() {
        let channel = ConflatedChannel::<u8>::new();
        let waiter = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.closed().await })
        };
        channel.close();
        tokio::time::timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_wakes_every_waiter() {
        let channel = ConflatedChannel::<u8>::new();
        let receivers: Vec<_> = (0..2)
            .map(|_| {
                let channel = channel.clone();
                tokio::spawn(async move { channel.recv().await })
            })
            .collect();
        let closer = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.closed().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        channel.close();

        for receiver in receivers {
            let received = tokio::time::timeout(Duration::from_secs(2), receiver).await.unwrap().unwrap();
            assert_eq!(received, None);
        }
        tokio::time::timeout(Duration::from_secs(2), closer).await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn send_reaches_recv_while_another_clone_waits_for_close() {
        let channel = ConflatedChannel::new();
        let closer = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.closed().await })
        };
        let receiver = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        channel.send(42u32).unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), receiver).await.unwrap().unwrap();
        assert_eq!(received, Some(42));
        assert!(!closer.is_finished());

        channel.close();
        tokio::time::timeout(Duration::from_secs(2), closer).await.unwrap().unwrap();
    }
}
