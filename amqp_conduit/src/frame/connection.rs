use std::fmt;

use super::{ReplyCode, REPLY_SUCCESS};

#[derive(Debug, Clone)]
pub struct Close {
    pub reply_code: ReplyCode,
    pub reply_text: String,
    pub class_id: u16,
    pub method_id: u16,
}

impl Close {
    pub fn new(reply_code: ReplyCode, reply_text: &str) -> Self {
        Self {
            reply_code,
            reply_text: reply_text.to_owned(),
            class_id: 0,
            method_id: 0,
        }
    }
}

impl Default for Close {
    fn default() -> Self {
        Self::new(REPLY_SUCCESS, "Normal shutdown")
    }
}

impl fmt::Display for Close {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "close connection due to '{}: {}', (class_id = {}, method_id = {})",
            self.reply_code, self.reply_text, self.class_id, self.method_id
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct CloseOk;

#[derive(Debug, Clone, Default)]
pub struct Blocked {
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct Unblocked;
