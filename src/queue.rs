//! `Queue`: a thin, queue-scoped convenience handle over a [`Channel`],
//! remembering a queue name so callers don't have to repeat it across
//! bind/consume/get/publish calls.

use std::sync::Arc;

use amq_protocol::protocol::basic::AMQPProperties;
use amq_protocol::protocol::queue::DeclareOk;
use amq_protocol::protocol::table::FieldTable;
use bytes::Bytes;

use crate::channel::action::GetResult;
use crate::channel::Channel;
use crate::consumer::ConsumerCallback;
use crate::error::ChannelError;

#[derive(Clone)]
pub struct Queue {
    channel: Channel,
    name: String,
}

impl Queue {
    /// Declares (or asserts) a queue on `channel`, returning a handle bound
    /// to its name. Declaration is itself one of the channel's deferred
    /// actions, so this can be called immediately after `Connection::channel`
    /// without waiting for `Channel.OpenOk`.
    pub async fn declare(
        channel: Channel,
        name: impl Into<String>,
        durable: bool,
        exclusive: bool,
        auto_delete: bool,
        arguments: FieldTable,
    ) -> Result<(Self, DeclareOk), ChannelError> {
        let name = name.into();
        let ok = channel
            .declare_queue(name.clone(), durable, exclusive, auto_delete, arguments)
            .await?;
        // An unnamed queue (`name == ""`) gets a server-assigned name back in
        // `DeclareOk.queue`; adopt it so bind/subscribe/get/publish keep working.
        let name = if name.is_empty() { ok.queue.clone() } else { name };
        Ok((Self { channel, name }, ok))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub async fn bind(
        &self,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        arguments: FieldTable,
    ) -> Result<(), ChannelError> {
        self.channel
            .bind_queue(self.name.clone(), exchange, routing_key, arguments)
            .await
    }

    pub async fn subscribe(
        &self,
        consumer_tag: impl Into<String>,
        no_ack: bool,
        exclusive: bool,
        callback: Arc<dyn ConsumerCallback>,
    ) -> Result<String, ChannelError> {
        self.channel
            .consume(self.name.clone(), consumer_tag, no_ack, exclusive, callback)
            .await
    }

    pub async fn get(&self, no_ack: bool) -> Result<Option<GetResult>, ChannelError> {
        self.channel.get(self.name.clone(), no_ack).await
    }

    /// Publishes to the default exchange with this queue's name as the
    /// routing key, the idiomatic shortcut for "send directly to this
    /// queue" in AMQP 0-9-1.
    pub fn publish(
        &self,
        mandatory: bool,
        immediate: bool,
        properties: AMQPProperties,
        payload: impl Into<Bytes>,
    ) -> Result<(), ChannelError> {
        self.channel
            .publish("", self.name.clone(), mandatory, immediate, properties, payload)
    }
}
