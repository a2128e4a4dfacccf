// Messaging - observer signals (control side) and fault notifications (any side)

pub mod channels;
pub mod notification;
pub mod signals;

pub use channels::{NotificationConsumer, NotificationProducer, create_notification_channel};
pub use notification::{Notification, NotificationCategory, NotificationLevel};
pub use signals::SignalBus;
