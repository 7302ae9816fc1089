use std::collections::BTreeMap;

use super::{DELIVERY_MODE_PERSISTENT, DELIVERY_MODE_TRANSIENT};

/// Message properties of the basic class.
///
/// # Example
///
/// ```
/// use amqp_conduit::BasicProperties;
///
/// let properties = BasicProperties::default()
///     .with_content_type("application/json")
///     .with_persistence(true)
///     .finish();
/// assert_eq!(Some("application/json"), properties.content_type());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicProperties {
    content_type: Option<String>,
    content_encoding: Option<String>,
    headers: Option<BTreeMap<String, String>>,
    delivery_mode: Option<u8>,
    priority: Option<u8>,
    correlation_id: Option<String>,
    reply_to: Option<String>,
    expiration: Option<String>,
    message_id: Option<String>,
    timestamp: Option<u64>,
    message_type: Option<String>,
    user_id: Option<String>,
    app_id: Option<String>,
}

impl BasicProperties {
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn with_content_type(&mut self, content_type: &str) -> &mut Self {
        self.content_type = Some(content_type.to_owned());
        self
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.content_encoding.as_deref()
    }

    pub fn with_content_encoding(&mut self, content_encoding: &str) -> &mut Self {
        self.content_encoding = Some(content_encoding.to_owned());
        self
    }

    pub fn headers(&self) -> Option<&BTreeMap<String, String>> {
        self.headers.as_ref()
    }

    pub fn with_header(&mut self, key: &str, value: &str) -> &mut Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_owned(), value.to_owned());
        self
    }

    pub fn delivery_mode(&self) -> Option<u8> {
        self.delivery_mode
    }

    pub fn with_delivery_mode(&mut self, delivery_mode: u8) -> &mut Self {
        self.delivery_mode = Some(delivery_mode);
        self
    }

    /// Shortcut for [`DELIVERY_MODE_PERSISTENT`] / [`DELIVERY_MODE_TRANSIENT`].
    pub fn with_persistence(&mut self, persistent: bool) -> &mut Self {
        if persistent {
            self.with_delivery_mode(DELIVERY_MODE_PERSISTENT)
        } else {
            self.with_delivery_mode(DELIVERY_MODE_TRANSIENT)
        }
    }

    pub fn priority(&self) -> Option<u8> {
        self.priority
    }

    pub fn with_priority(&mut self, priority: u8) -> &mut Self {
        self.priority = Some(priority);
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn with_correlation_id(&mut self, correlation_id: &str) -> &mut Self {
        self.correlation_id = Some(correlation_id.to_owned());
        self
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    pub fn with_reply_to(&mut self, reply_to: &str) -> &mut Self {
        self.reply_to = Some(reply_to.to_owned());
        self
    }

    pub fn expiration(&self) -> Option<&str> {
        self.expiration.as_deref()
    }

    pub fn with_expiration(&mut self, expiration: &str) -> &mut Self {
        self.expiration = Some(expiration.to_owned());
        self
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn with_message_id(&mut self, message_id: &str) -> &mut Self {
        self.message_id = Some(message_id.to_owned());
        self
    }

    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    pub fn with_timestamp(&mut self, timestamp: u64) -> &mut Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn message_type(&self) -> Option<&str> {
        self.message_type.as_deref()
    }

    pub fn with_message_type(&mut self, message_type: &str) -> &mut Self {
        self.message_type = Some(message_type.to_owned());
        self
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn with_user_id(&mut self, user_id: &str) -> &mut Self {
        self.user_id = Some(user_id.to_owned());
        self
    }

    pub fn app_id(&self) -> Option<&str> {
        self.app_id.as_deref()
    }

    pub fn with_app_id(&mut self, app_id: &str) -> &mut Self {
        self.app_id = Some(app_id.to_owned());
        self
    }

    pub fn finish(&mut self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::BasicProperties;
    use crate::frame::DELIVERY_MODE_PERSISTENT;

    #[test]
    fn test_chained_properties() {
        let properties = BasicProperties::default()
            .with_persistence(true)
            .with_header("x-origin", "test")
            .with_header("x-retry", "0")
            .with_message_id("m-1")
            .finish();

        assert_eq!(Some(DELIVERY_MODE_PERSISTENT), properties.delivery_mode());
        assert_eq!(2, properties.headers().unwrap().len());
        assert_eq!(Some("m-1"), properties.message_id());
        assert_eq!(None, properties.content_type());
    }
}
