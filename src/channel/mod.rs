//! `Channel`: the public handle applications hold, and `ChannelState`: the
//! engine-owned runtime data a connection's event loop keeps per channel in
//! its channel table.

pub mod action;
pub mod dispatch;

use std::collections::VecDeque;
use std::sync::Arc;

use amq_protocol::protocol::queue::DeclareOk;
use amq_protocol::protocol::table::FieldTable;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use amq_protocol::protocol::basic::AMQPProperties;

use crate::callbacks::Callback;
use crate::connection::control::ConnectionControl;
use crate::consumer::{ConsumerCallback, ConsumerTable};
use crate::error::{ChannelError, Error};
use crate::sync_gate::{Admission, OutboundBatch, SyncGate};

use action::{Action, BindQueue, Consume, DeclareQueue, Get, GetResult, Publish};
use action::ReplySlot;
use dispatch::ContentAssembler;

/// `(class_id, method_id, reply_code, reply_text)` from a broker-initiated
/// `Channel.Close`, handed to a channel's [`CloseCallback`].
#[derive(Debug, Clone)]
pub struct ChannelCloseReason {
    pub class_id: u16,
    pub method_id: u16,
    pub reply_code: u16,
    pub reply_text: String,
}

/// Subscriber fired when the broker closes this channel, whether or not
/// `cascade_failure` is set.
pub type CloseCallback = Arc<dyn Callback<ChannelCloseReason>>;

/// Subscriber fired once our own `Channel.Close` is confirmed by `CloseOk`.
pub type CloseOkCallback = Arc<dyn Callback<()>>;

/// Lifecycle of one channel, mirroring the `Channel.Open`/`OpenOk`/
/// `Close`/`CloseOk` exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLifecycle {
    Opening,
    Open,
    Closing,
    Closed,
}

/// Engine-side state for one channel. Lives in the connection's channel
/// table; never crosses a task boundary.
pub struct ChannelState {
    pub id: u16,
    pub lifecycle: ChannelLifecycle,
    pub sync_gate: SyncGate,
    pub consumers: ConsumerTable,
    pub assembler: ContentAssembler,
    pending_actions: VecDeque<Action>,
    /// Reply slot for an in-flight `Basic.Get`, parked here once the request
    /// is admitted so it can be resolved either immediately (`GetEmpty`) or
    /// once the matching `GetOk`'s content has finished reassembling.
    pub pending_get: Option<ReplySlot<Option<GetResult>>>,
    /// Callback parked for an in-flight `Basic.Consume`, registered into
    /// `consumers` only once `Basic.ConsumeOk` confirms the broker's tag.
    pub pending_consume: Option<(Arc<dyn ConsumerCallback>, bool)>,
    pub close_callback: Option<CloseCallback>,
    pub close_ok_callback: Option<CloseOkCallback>,
    /// If set, a broker-initiated `Channel.Close` escalates to tearing down
    /// the whole connection instead of being answered with `CloseOk`.
    pub cascade_failure: bool,
    created_waiters: Vec<Box<dyn FnOnce() + Send>>,
}

impl ChannelState {
    pub fn new(id: u16) -> Self {
        Self {
            id,
            lifecycle: ChannelLifecycle::Opening,
            sync_gate: SyncGate::new(),
            consumers: ConsumerTable::new(),
            assembler: ContentAssembler::new(),
            pending_actions: VecDeque::new(),
            pending_get: None,
            pending_consume: None,
            close_callback: None,
            close_ok_callback: None,
            cascade_failure: false,
            created_waiters: Vec::new(),
        }
    }

    /// Runs `f` once this channel has finished opening, otherwise parks it
    /// to be returned (and run) from [`ChannelState::drain_created_waiters`].
    pub fn queue_created_waiter(&mut self, f: Box<dyn FnOnce() + Send>) -> Option<Box<dyn FnOnce() + Send>> {
        if self.lifecycle == ChannelLifecycle::Open {
            Some(f)
        } else {
            self.created_waiters.push(f);
            None
        }
    }

    pub fn drain_created_waiters(&mut self) -> Vec<Box<dyn FnOnce() + Send>> {
        std::mem::take(&mut self.created_waiters)
    }

    /// Queues an action if the channel is not yet open, otherwise hands it
    /// straight back to the caller to translate into frames.
    pub fn submit(&mut self, action: Action) -> Option<Action> {
        if self.lifecycle == ChannelLifecycle::Open {
            Some(action)
        } else {
            self.pending_actions.push_back(action);
            None
        }
    }

    /// Drains queued actions once `Channel.OpenOk` arrives; the caller
    /// translates each into frames and runs it through the Sync-Gate in
    /// FIFO order.
    pub fn drain_pending(&mut self) -> VecDeque<Action> {
        std::mem::take(&mut self.pending_actions)
    }

    /// Fails every action still queued, used when the channel closes before
    /// opening or is torn down by a connection loss.
    pub fn fail_pending(&mut self, err: ChannelError) {
        for action in self.pending_actions.drain(..) {
            let cloned = match &err {
                ChannelError::Transport(_) => ChannelError::NotFound(self.id),
                other => clone_channel_error(other),
            };
            action.fail(cloned);
        }
        if let Some(reply) = self.pending_get.take() {
            let _ = reply.send(Err(clone_channel_error(&err)));
        }
    }

    /// Runs `batch` through this channel's Sync-Gate.
    pub fn admit(
        &mut self,
        batch: OutboundBatch,
        callback: Option<crate::sync_gate::ReplyCallback>,
    ) -> Admission {
        self.sync_gate.admit(batch, callback)
    }
}

fn clone_channel_error(err: &ChannelError) -> ChannelError {
    match err {
        ChannelError::ClosedByBroker(s) => ChannelError::ClosedByBroker(s.clone()),
        ChannelError::ProtocolViolation(s) => ChannelError::ProtocolViolation(s.clone()),
        ChannelError::NotFound(id) => ChannelError::NotFound(*id),
        ChannelError::Transport(_) => ChannelError::NotFound(0),
    }
}

/// Public handle to one open (or opening) channel. Cloning shares the same
/// underlying channel id; dropping all clones does not close the channel.
/// Call [`Channel::close`] explicitly.
#[derive(Clone)]
pub struct Channel {
    id: u16,
    control: mpsc::UnboundedSender<ConnectionControl>,
}

impl Channel {
    pub(crate) fn new(id: u16, control: mpsc::UnboundedSender<ConnectionControl>) -> Self {
        Self { id, control }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    async fn submit<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, ChannelError>>) -> Action,
    ) -> Result<T, ChannelError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let action = build(reply_tx);
        self.control
            .send(ConnectionControl::ChannelAction {
                channel_id: self.id,
                action,
            })
            .map_err(|_| ChannelError::NotFound(self.id))?;
        reply_rx
            .await
            .map_err(|_| ChannelError::ClosedByBroker("channel closed before replying".into()))?
    }

    pub async fn declare_queue(
        &self,
        name: impl Into<String>,
        durable: bool,
        exclusive: bool,
        auto_delete: bool,
        arguments: FieldTable,
    ) -> Result<DeclareOk, ChannelError> {
        let name = name.into();
        self.submit(move |reply| {
            Action::DeclareQueue(DeclareQueue {
                name,
                durable,
                exclusive,
                auto_delete,
                arguments,
                reply,
            })
        })
        .await
    }

    pub async fn bind_queue(
        &self,
        queue: impl Into<String>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        arguments: FieldTable,
    ) -> Result<(), ChannelError> {
        let queue = queue.into();
        let exchange = exchange.into();
        let routing_key = routing_key.into();
        self.submit(move |reply| {
            Action::BindQueue(BindQueue {
                queue,
                exchange,
                routing_key,
                arguments,
                reply,
            })
        })
        .await
    }

    pub async fn consume(
        &self,
        queue: impl Into<String>,
        consumer_tag: impl Into<String>,
        no_ack: bool,
        exclusive: bool,
        callback: Arc<dyn ConsumerCallback>,
    ) -> Result<String, ChannelError> {
        let queue = queue.into();
        let consumer_tag = consumer_tag.into();
        self.submit(move |reply| {
            Action::Consume(Consume {
                queue,
                consumer_tag,
                no_ack,
                exclusive,
                callback,
                reply,
            })
        })
        .await
    }

    pub async fn get(
        &self,
        queue: impl Into<String>,
        no_ack: bool,
    ) -> Result<Option<GetResult>, ChannelError> {
        let queue = queue.into();
        self.submit(move |reply| Action::Get(Get { queue, no_ack, reply }))
            .await
    }

    /// Publishes without waiting for any confirmation: `Basic.Publish` is
    /// asynchronous by design.
    pub fn publish(
        &self,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        mandatory: bool,
        immediate: bool,
        properties: AMQPProperties,
        payload: impl Into<Bytes>,
    ) -> Result<(), ChannelError> {
        let action = Action::Publish(Publish {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            mandatory,
            immediate,
            properties,
            payload: payload.into(),
        });
        self.control
            .send(ConnectionControl::ChannelAction {
                channel_id: self.id,
                action,
            })
            .map_err(|_| ChannelError::NotFound(self.id))
    }

    pub async fn close(&self) -> Result<(), Error> {
        let (reply, reply_rx) = oneshot::channel();
        self.control.send(ConnectionControl::CloseChannel {
            channel_id: self.id,
            reply,
        })?;
        reply_rx.await.map_err(|_| Error::AlreadyStopped)?
    }

    /// Subscribes `cb` to a broker-initiated `Channel.Close`, whether or not
    /// `cascade_failure` is set.
    pub fn on_close(&self, cb: impl Callback<ChannelCloseReason> + 'static) {
        let _ = self.control.send(ConnectionControl::RegisterCloseCallback {
            channel_id: self.id,
            callback: Arc::new(cb),
        });
    }

    /// Subscribes `cb` to our own `Channel.Close` being confirmed by the
    /// broker's `CloseOk`.
    pub fn on_close_ok(&self, cb: impl Callback<()> + 'static) {
        let _ = self.control.send(ConnectionControl::RegisterCloseOkCallback {
            channel_id: self.id,
            callback: Arc::new(cb),
        });
    }

    /// When `cascade` is set, a broker-initiated `Channel.Close` tears down
    /// the whole connection instead of being answered with `CloseOk`.
    pub fn set_cascade_failure(&self, cascade: bool) {
        let _ = self.control.send(ConnectionControl::SetCascadeFailure {
            channel_id: self.id,
            cascade,
        });
    }

    /// Runs `f` once this channel has finished opening; runs immediately if
    /// that has already happened.
    pub fn do_when_created<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.control.send(ConnectionControl::DoWhenCreated {
            channel_id: self.id,
            callback: Box::new(f),
        });
    }
}

pub use dispatch::Assembled;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_queue_until_the_channel_opens() {
        let mut state = ChannelState::new(1);
        let (reply, _rx) = oneshot::channel();
        let action = Action::DeclareQueue(DeclareQueue {
            name: "q".into(),
            durable: false,
            exclusive: false,
            auto_delete: false,
            arguments: FieldTable::default(),
            reply,
        });
        assert!(state.submit(action).is_none());

        state.lifecycle = ChannelLifecycle::Open;
        let drained = state.drain_pending();
        assert_eq!(drained.len(), 1);
    }

    #[test]
    fn actions_run_immediately_once_open() {
        let mut state = ChannelState::new(1);
        state.lifecycle = ChannelLifecycle::Open;
        let (reply, _rx) = oneshot::channel();
        let action = Action::BindQueue(BindQueue {
            queue: "q".into(),
            exchange: "ex".into(),
            routing_key: "rk".into(),
            arguments: FieldTable::default(),
            reply,
        });
        assert!(state.submit(action).is_some());
    }
}
