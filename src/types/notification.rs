/// A payload delivered on a LISTEN channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    channel: String,
    payload: String,
    process_id: i32,
}

impl Notification {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>, process_id: i32) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
            process_id,
        }
    }

    /// The name of the channel the notification was raised on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The payload string passed by the notifying session.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// The process ID of the notifying backend.
    pub fn process_id(&self) -> i32 {
        self.process_id
    }

    /// Splits the notification into its `(channel, payload)` pair.
    pub fn into_parts(self) -> (String, String) {
        (self.channel, self.payload)
    }
}
