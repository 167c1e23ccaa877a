//! The deferred-operation FIFO a [`crate::queue::Queue`] handle pushes into
//! before its channel has finished opening.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;

use amq_protocol::protocol::basic::{AMQPProperties, GetOk};
use amq_protocol::protocol::queue::DeclareOk;
use amq_protocol::protocol::table::FieldTable;

use crate::consumer::ConsumerCallback;
use crate::error::ChannelError;

/// The caller's half of an action's result. Dropped without a send if the
/// channel closes before the action completes; the receiver observes a
/// `RecvError`, which callers map to [`ChannelError::ClosedByBroker`].
pub type ReplySlot<T> = oneshot::Sender<Result<T, ChannelError>>;

pub struct DeclareQueue {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub arguments: FieldTable,
    pub reply: ReplySlot<DeclareOk>,
}

pub struct BindQueue {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub arguments: FieldTable,
    pub reply: ReplySlot<()>,
}

pub struct Consume {
    pub queue: String,
    pub consumer_tag: String,
    pub no_ack: bool,
    pub exclusive: bool,
    pub callback: Arc<dyn ConsumerCallback>,
    pub reply: ReplySlot<String>,
}

pub struct Publish {
    pub exchange: String,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
    pub properties: AMQPProperties,
    pub payload: Bytes,
}

pub struct Get {
    pub queue: String,
    pub no_ack: bool,
    pub reply: ReplySlot<Option<GetResult>>,
}

/// A fetched message together with its reassembled content, returned by
/// `Channel::get`/`Queue::get`. `Basic.GetOk` is content-bearing in the same
/// way `Basic.Deliver` is, so a caller-facing `Get` should hand back the body
/// and properties, not just the method frame.
pub struct GetResult {
    pub method: GetOk,
    pub properties: AMQPProperties,
    pub body: Bytes,
}

/// One queued operation, in the order it was requested.
pub enum Action {
    DeclareQueue(DeclareQueue),
    BindQueue(BindQueue),
    Consume(Consume),
    Publish(Publish),
    Get(Get),
}

impl Action {
    /// Fails the action in place, used when a channel closes with a
    /// non-empty action queue still pending.
    pub fn fail(self, err: ChannelError) {
        match self {
            Action::DeclareQueue(a) => {
                let _ = a.reply.send(Err(err));
            }
            Action::BindQueue(a) => {
                let _ = a.reply.send(Err(err));
            }
            Action::Consume(a) => {
                let _ = a.reply.send(Err(err));
            }
            Action::Get(a) => {
                let _ = a.reply.send(Err(err));
            }
            Action::Publish(_) => {
                // Basic.Publish has no confirmation to fail: publisher
                // confirms are out of scope.
            }
        }
    }
}
