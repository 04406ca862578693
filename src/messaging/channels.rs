// Communication channels lock-free

use crate::messaging::command::MixerCommand;
use crate::messaging::notification::Notification;
use ringbuf::{HeapRb, traits::Split};

pub type MixerProducer = ringbuf::HeapProd<MixerCommand>;
pub type MixerConsumer = ringbuf::HeapCons<MixerCommand>;

pub fn create_mixer_channel(capacity: usize) -> (MixerProducer, MixerConsumer) {
    let rb = HeapRb::<MixerCommand>::new(capacity);
    rb.split()
}

pub type NotificationProducer = ringbuf::HeapProd<Notification>;
pub type NotificationConsumer = ringbuf::HeapCons<Notification>;

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
    fn test_notification_channel_is_bounded() {
        let (mut tx, mut rx) = create_notification_channel(2);
        for i in 0..3 {
            let _ = tx.try_push(Notification::info(
                NotificationCategory::Generic,
                format!("n{}", i),
            ));
        }

        assert_eq!(rx.try_pop().map(|n| n.message), Some("n0".to_string()));
        assert_eq!(rx.try_pop().map(|n| n.message), Some("n1".to_string()));
        assert!(rx.try_pop().is_none());
    }

    #[test]
    fn test_mixer_channel_order() {
        let (mut tx, mut rx) = create_mixer_channel(4);
        assert!(tx.try_push(MixerCommand::StopAll).is_ok());
        assert!(tx.try_push(MixerCommand::SetGain(0.5)).is_ok());

        assert!(matches!(rx.try_pop(), Some(MixerCommand::StopAll)));
        assert!(matches!(rx.try_pop(), Some(MixerCommand::SetGain(_))));
    }
}
