// Lock-free notification channel

use crate::messaging::notification::Notification;
use ringbuf::{HeapRb, traits::Split};

pub type NotificationProducer = ringbuf::HeapProd<Notification>;
pub type NotificationConsumer = ringbuf::HeapCons<Notification>;

/// Create a bounded SPSC channel for fault notifications
///
/// The producer half may be moved to the realtime thread: pushing never
/// allocates and fails instead of blocking when the channel is full.
pub fn create_notification_channel(
    capacity: usize,
) -> (NotificationProducer, NotificationConsumer) {
    let rb = HeapRb::<Notification>::new(capacity);
    rb.split()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::notification::NotificationCategory;
    use ringbuf::traits::{Consumer, Producer};

    #[test]
    fn test_channel_full_rejects() {
        let (mut tx, mut rx) = create_notification_channel(1);
        let first = Notification::warning(NotificationCategory::Playback, "first");
        let second = Notification::warning(NotificationCategory::Playback, "second");

        assert!(tx.try_push(first).is_ok());
        assert!(tx.try_push(second).is_err());

        let received = rx.try_pop().unwrap();
        assert_eq!(received.message, "first");
    }
}
