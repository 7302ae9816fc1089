use std::fmt;

use super::{ReplyCode, REPLY_SUCCESS};

#[derive(Debug, Clone, Default)]
pub struct OpenChannel;

#[derive(Debug, Clone, Default)]
pub struct OpenChannelOk;

#[derive(Debug, Clone)]
pub struct CloseChannel {
    pub reply_code: ReplyCode,
    pub reply_text: String,
    /// class of the method that caused the close, `0` if not caused by a method
    pub class_id: u16,
    pub method_id: u16,
}

impl CloseChannel {
    pub fn new(reply_code: ReplyCode, reply_text: &str, class_id: u16, method_id: u16) -> Self {
        Self {
            reply_code,
            reply_text: reply_text.to_owned(),
            class_id,
            method_id,
        }
    }
}

impl Default for CloseChannel {
    fn default() -> Self {
        Self::new(REPLY_SUCCESS, "Normal shutdown", 0, 0)
    }
}

impl fmt::Display for CloseChannel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "close channel due to '{}: {}', (class_id = {}, method_id = {})",
            self.reply_code, self.reply_text, self.class_id, self.method_id
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct CloseChannelOk;
