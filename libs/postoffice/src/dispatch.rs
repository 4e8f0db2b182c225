//! Inbound dispatch - routes decoded messages to type-keyed subscribers.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use types::{MessageType, RawInboundMessage};

use crate::error::MessageParseError;

/// Turns a raw inbound message into a typed value.
///
/// Parse failures are per-message: the dispatcher logs them and moves on to
/// the next message, they never affect siblings in the same parcel.
pub trait MessageParser: Send + 'static {
    type Output: Send + 'static;

    fn message_type(&self) -> MessageType;

    fn parse(&self, message: &RawInboundMessage) -> Result<Self::Output, MessageParseError>;
}

/// Parses a message payload into any `serde`-deserializable type.
pub struct JsonMessageParser<T> {
    message_type: MessageType,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonMessageParser<T> {
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            _marker: PhantomData,
        }
    }
}

impl<T> MessageParser for JsonMessageParser<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn message_type(&self) -> MessageType {
        self.message_type
    }

    fn parse(&self, message: &RawInboundMessage) -> Result<T, MessageParseError> {
        serde_json::from_value(message.payload.clone())
            .map_err(|err| MessageParseError::new(self.message_type, err))
    }
}

/// A handler invoked for every inbound message of one type.
pub type MessageHandler = Box<dyn FnMut(&RawInboundMessage) -> anyhow::Result<()> + Send>;

struct Subscriber {
    message_type: MessageType,
    handler: MessageHandler,
}

/// Fans inbound messages out to subscribers by message type.
///
/// Multiple subscribers per type are supported and each sees every message.
/// A handler returning an error is logged and does not stop delivery to the
/// remaining subscribers.
#[derive(Default)]
pub struct Dispatcher {
    subscribers: Vec<Subscriber>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, message_type: MessageType, handler: MessageHandler) {
        self.subscribers.push(Subscriber {
            message_type,
            handler,
        });
    }

    pub fn dispatch(&mut self, message: &RawInboundMessage) {
        let mut delivered = 0usize;
        for subscriber in &mut self.subscribers {
            if subscriber.message_type != message.message_type {
                continue;
            }
            delivered += 1;
            if let Err(err) = (subscriber.handler)(message) {
                warn!(%message, %err, "inbound message handler failed, continuing");
            }
        }
        if delivered == 0 {
            debug!(%message, "no subscriber for inbound message type");
        }
    }
}
