//! Typed AMQP 0-9-1 method frames exchanged with a [`Transport`].
//!
//! Byte-level encoding is the transport's business: frames here are plain values,
//! and content-bearing methods carry their properties and body inline.
//!
//! [`Transport`]: crate::net::Transport
use std::fmt;

////////////////////////////////////////////////////////////////////////
// macros should appear before module declaration
#[macro_use]
mod helpers {
    macro_rules! impl_frame {
        ($($class_id:literal => $($method_id:literal : $method:ident),+);+) => {
            // common interfaces of each method type
            $($(
                impl $method {
                    pub fn header() -> &'static MethodHeader {
                        static __METHOD_HEADER: MethodHeader = MethodHeader::new($class_id, $method_id);
                        &__METHOD_HEADER
                    }
                    pub fn into_frame(self) -> Frame {
                        Frame::$method(Self::header(), self)
                    }
                }
            )+)+

            /// `Frame` enum to generalize the method frames.
            #[derive(Debug, Clone)]
            pub enum Frame {
                $($($method(&'static MethodHeader, $method),)+)+
            }

            impl Frame {
                pub fn method_header(&self) -> &'static MethodHeader {
                    match self {
                        $($(Frame::$method(header, _) => header,)+)+
                    }
                }

                pub fn name(&self) -> &'static str {
                    match self {
                        $($(Frame::$method(..) => stringify!($method),)+)+
                    }
                }
            }
        };
    }
}

mod basic;
mod channel;
mod confirm;
mod connection;
mod constants;
mod exchange;
mod properties;
mod queue;

pub use basic::*;
pub use channel::*;
pub use confirm::*;
pub use connection::*;
pub use constants::*;
pub use exchange::*;
pub use properties::*;
pub use queue::*;

/// Channel identifier, unique within a connection.
pub type AmqpChannelId = u16;
/// Delivery tag of a message on a channel, also the publish sequence number in confirm mode.
pub type DeliveryTag = u64;
pub type ReplyCode = u16;

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct MethodHeader {
    class_id: u16,
    method_id: u16,
}

impl MethodHeader {
    pub const fn new(class_id: u16, method_id: u16) -> Self {
        Self {
            class_id,
            method_id,
        }
    }

    pub fn class_id(&self) -> u16 {
        self.class_id
    }

    pub fn method_id(&self) -> u16 {
        self.method_id
    }
}

impl fmt::Display for MethodHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.class_id, self.method_id)
    }
}

/////////////////////////////////////////////////////////////////
impl_frame! {
    // == Connection ==
    10 =>   50: Close,
            51: CloseOk,
            60: Blocked,
            61: Unblocked;
    // == Channel ==
    20 =>   10: OpenChannel,
            11: OpenChannelOk,
            40: CloseChannel,
            41: CloseChannelOk;
    // == Exchange ==
    40 =>   10: Declare,
            11: DeclareOk;
    // == Queue ==
    50 =>   10: DeclareQueue,
            11: DeclareQueueOk,
            20: BindQueue,
            21: BindQueueOk,
            30: PurgeQueue,
            31: PurgeQueueOk,
            40: DeleteQueue,
            41: DeleteQueueOk,
            50: UnbindQueue,
            51: UnbindQueueOk;
    // == Basic ==
    60 =>   10: Qos,
            11: QosOk,
            20: Consume,
            21: ConsumeOk,
            30: Cancel,
            31: CancelOk,
            40: Publish,
            50: Return,
            60: Deliver,
            80: Ack,
            90: Reject,
            120: Nack;
    // == Confirm ==
    85 =>   10: Select,
            11: SelectOk
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.name(), self.method_header())
    }
}
