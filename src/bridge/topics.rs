//! Topic naming under the configured prefix.

/// `"{prefix}/{name}"`. An empty prefix yields a topic starting with `/`.
pub fn topic_for(prefix: &str, name: &str) -> String {
    format!("{}/{}", prefix, name)
}

/// Logical topic names used by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicName {
    Ready,
    Send,
    Sent,
    Received,
    Error,
}

impl TopicName {
    pub const ALL: [TopicName; 5] = [
        TopicName::Ready,
        TopicName::Send,
        TopicName::Sent,
        TopicName::Received,
        TopicName::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TopicName::Ready => "ready",
            TopicName::Send => "send",
            TopicName::Sent => "sent",
            TopicName::Received => "received",
            TopicName::Error => "error",
        }
    }
}

/// Fully qualified topics for one prefix, computed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    ready: String,
    send: String,
    sent: String,
    received: String,
    error: String,
}

impl Topics {
    pub fn new(prefix: &str) -> Self {
        Self {
            ready: topic_for(prefix, TopicName::Ready.as_str()),
            send: topic_for(prefix, TopicName::Send.as_str()),
            sent: topic_for(prefix, TopicName::Sent.as_str()),
            received: topic_for(prefix, TopicName::Received.as_str()),
            error: topic_for(prefix, TopicName::Error.as_str()),
        }
    }

    pub fn get(&self, name: TopicName) -> &str {
        match name {
            TopicName::Ready => &self.ready,
            TopicName::Send => &self.send,
            TopicName::Sent => &self.sent,
            TopicName::Received => &self.received,
            TopicName::Error => &self.error,
        }
    }
}
