mod stream_bus;
mod subjects;

pub use stream_bus::{
    ConsumerKind, DeliverPolicy, Delivery, Message, StreamBus, StreamConfig, Subscription,
};
pub use subjects::{
    ALERTS_STREAM, ALERT_SUBJECT, BARS_STREAM, METRICS_STREAM, METRICS_SUBJECT, bar_subject,
    subject_matches,
};
