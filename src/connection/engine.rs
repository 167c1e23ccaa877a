//! The connection's single event-loop task. Everything that
//! touches the socket or a channel's Sync-Gate happens on this task; every
//! other task talks to it through [`ConnectionControl`] or the consumer
//! acknowledgement channel.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Instant, Sleep};

use amq_protocol::frame::AMQPFrame;
use amq_protocol::protocol::basic::AMQPMethod as BasicMethod;
use amq_protocol::protocol::channel::AMQPMethod as ChannelWireMethod;
use amq_protocol::protocol::connection::AMQPMethod as ConnectionMethod;
use amq_protocol::protocol::queue::AMQPMethod as QueueMethod;
use amq_protocol::protocol::{basic, channel as channel_proto, connection, queue, AMQPClass};

use crate::callbacks::{CallbackTable, DisconnectReason, FrameSentInfo};
use crate::channel::action::Action;
use crate::channel::dispatch::Assembled;
use crate::channel::{Channel, ChannelCloseReason, ChannelLifecycle, ChannelState};
use crate::config::Config;
use crate::connection::control::ConnectionControl;
use crate::connection::handshake::Tuning;
use crate::consumer::{AckDecision, Delivery};
use crate::constants::CONNECTION_CHANNEL_ID;
use crate::error::{ChannelError, ConfigError};
use crate::publish::compose_basic_publish;
use crate::spec_table::MethodKind;
use crate::sync_gate::{Admission, OutboundBatch};
use crate::transport::Transport;

enum Running {
    Continue,
    Stop(DisconnectReason),
}

/// Why the event loop stopped, surfaced to the reconnect loop in
/// `connection::mod` so it can decide whether to retry.
pub enum StopReason {
    /// Application called `Connection::stop`/`shutdown`.
    Requested,
    /// The broker closed the connection or the socket dropped.
    Lost(DisconnectReason),
}

pub struct ConnectionEngine<'a> {
    transport: Transport,
    tuning: Tuning,
    config: Config,
    callbacks: CallbackTable,
    channels: HashMap<u16, ChannelState>,
    control_rx: &'a mut mpsc::UnboundedReceiver<ConnectionControl>,
    control_tx: mpsc::UnboundedSender<ConnectionControl>,
    outbound_rx: mpsc::UnboundedReceiver<AMQPFrame>,
    outbound_tx: mpsc::UnboundedSender<AMQPFrame>,
    pending_open: HashMap<u16, oneshot::Sender<Result<Channel, crate::error::Error>>>,
    keepalive: Duration,
    last_send: Instant,
    heartbeat_deadline: Option<Pin<Box<Sleep>>>,
    stop_requested: Option<oneshot::Sender<Result<(), crate::error::Error>>>,
    shutdown_requested: bool,
}

impl<'a> ConnectionEngine<'a> {
    pub fn new(
        transport: Transport,
        tuning: Tuning,
        config: Config,
        callbacks: CallbackTable,
        control_rx: &'a mut mpsc::UnboundedReceiver<ConnectionControl>,
        control_tx: mpsc::UnboundedSender<ConnectionControl>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let keepalive = config.keepalive;
        let heartbeat_deadline = (!keepalive.is_zero()).then(|| Box::pin(sleep(keepalive)));

        Self {
            transport,
            tuning,
            config,
            callbacks,
            channels: HashMap::new(),
            control_rx,
            control_tx,
            outbound_rx,
            outbound_tx,
            pending_open: HashMap::new(),
            keepalive,
            last_send: Instant::now(),
            heartbeat_deadline,
            stop_requested: None,
            shutdown_requested: false,
        }
    }

    pub async fn run(mut self) -> StopReason {
        self.callbacks.fire_startup().await;

        loop {
            let running = tokio::select! {
                frame = self.transport.recv() => self.on_incoming(frame).await,
                Some(ctrl) = self.control_rx.recv() => self.on_control(ctrl).await,
                Some(frame) = self.outbound_rx.recv() => self.on_ack_frame(frame).await,
                _ = tick(&mut self.heartbeat_deadline) => self.on_heartbeat_tick().await,
            };

            match running {
                Running::Continue => continue,
                Running::Stop(reason) => {
                    // A self-requested stop/shutdown is a silent, orthogonal
                    // disconnect: the Disconnected callback is reserved for a
                    // broker-side close or a lost socket.
                    let silent = self.stop_requested.is_some() || self.shutdown_requested;
                    if !silent {
                        self.callbacks.fire_disconnected(reason.clone()).await;
                    }
                    if let Some(reply) = self.stop_requested.take() {
                        let _ = reply.send(Ok(()));
                        return StopReason::Requested;
                    }
                    if self.shutdown_requested {
                        return StopReason::Requested;
                    }
                    return StopReason::Lost(reason);
                }
            }
        }
    }

    /// Records that a frame was just written and re-arms the heartbeat
    /// deadline a full `keepalive` out from now.
    fn touch_last_send(&mut self) {
        self.last_send = Instant::now();
        self.rearm_heartbeat(self.keepalive);
    }

    fn rearm_heartbeat(&mut self, delay: Duration) {
        self.heartbeat_deadline = (!self.keepalive.is_zero()).then(|| Box::pin(sleep(delay)));
    }

    async fn on_heartbeat_tick(&mut self) -> Running {
        let since_last_send = self.last_send.elapsed();
        if since_last_send >= self.keepalive {
            if self.transport.send(AMQPFrame::Heartbeat(0)).await.is_err() {
                return Running::Stop(DisconnectReason("heartbeat write failed".into()));
            }
            self.touch_last_send();
        } else {
            self.rearm_heartbeat(self.keepalive - since_last_send);
        }
        Running::Continue
    }

    async fn on_incoming(&mut self, frame: Result<Option<AMQPFrame>, crate::error::TransportError>) -> Running {
        match frame {
            Err(e) => Running::Stop(DisconnectReason(e.to_string())),
            Ok(None) => Running::Stop(DisconnectReason("peer closed the socket".into())),
            Ok(Some(AMQPFrame::Heartbeat(_))) => Running::Continue,
            Ok(Some(AMQPFrame::Method(CONNECTION_CHANNEL_ID, AMQPClass::Connection(method)))) => {
                self.on_connection_method(method).await
            }
            Ok(Some(AMQPFrame::Method(channel_id, class))) => self.route_method(channel_id, class).await,
            Ok(Some(AMQPFrame::Header(channel_id, _, header))) => {
                self.route_header(channel_id, *header);
                Running::Continue
            }
            Ok(Some(AMQPFrame::Body(channel_id, body))) => {
                self.route_body(channel_id, body).await;
                Running::Continue
            }
            Ok(Some(other)) => {
                tracing::debug!(target: "amqp_engine::logic", frame = ?other, "ignoring frame outside the modeled surface");
                Running::Continue
            }
        }
    }

    async fn on_connection_method(&mut self, method: ConnectionMethod) -> Running {
        match method {
            ConnectionMethod::Close(close) => {
                let _ = self
                    .transport
                    .send(AMQPFrame::Method(
                        CONNECTION_CHANNEL_ID,
                        AMQPClass::Connection(ConnectionMethod::CloseOk(connection::CloseOk {})),
                    ))
                    .await;
                Running::Stop(DisconnectReason(format!(
                    "closed by broker: {}",
                    close.reply_text
                )))
            }
            ConnectionMethod::CloseOk(_) => {
                Running::Stop(DisconnectReason("close acknowledged by broker".into()))
            }
            other => {
                tracing::warn!(target: "amqp_engine::logic", method = ?other, "unexpected connection-level method");
                Running::Continue
            }
        }
    }

    fn channel_mut(&mut self, channel_id: u16) -> Option<&mut ChannelState> {
        self.channels.get_mut(&channel_id)
    }

    async fn route_method(&mut self, channel_id: u16, class: AMQPClass) -> Running {
        let kind = MethodKind::of(&class);

        if self.channel_mut(channel_id).is_none() {
            tracing::warn!(target: "amqp_engine::logic", channel_id, "method for unknown channel");
            return Running::Continue;
        }

        if matches!(kind, MethodKind::BasicDeliver | MethodKind::BasicReturn) {
            if let Some(state) = self.channel_mut(channel_id) {
                if let Err(e) = state.assembler.begin(class) {
                    tracing::warn!(target: "amqp_engine::logic", error = %e, "content assembly error");
                }
            }
            return Running::Continue;
        }

        let released = self
            .channel_mut(channel_id)
            .and_then(|state| state.sync_gate.match_reply(&class));

        if let Some(outcome) = released {
            if let Some(cb) = outcome.callback {
                cb(&class);
            }
            self.release_deferred(channel_id, outcome.deferred).await;
        }

        if matches!(kind, MethodKind::BasicGetOk) {
            if let Some(state) = self.channel_mut(channel_id) {
                let _ = state.assembler.begin(class);
            }
            return Running::Continue;
        } else if matches!(kind, MethodKind::BasicGetEmpty) {
            if let Some(state) = self.channel_mut(channel_id) {
                if let Some(reply) = state.pending_get.take() {
                    let _ = reply.send(Ok(None));
                }
            }
            return Running::Continue;
        } else if matches!(kind, MethodKind::BasicConsumeOk) {
            if let AMQPClass::Basic(BasicMethod::ConsumeOk(ref ok)) = class {
                if let Some(state) = self.channel_mut(channel_id) {
                    if let Some((callback, no_ack)) = state.pending_consume.take() {
                        state.consumers.register(ok.consumer_tag.clone(), callback, no_ack);
                    }
                }
            }
            return Running::Continue;
        }

        match kind {
            MethodKind::ChannelOpenOk => {
                self.on_channel_open_ok(channel_id).await;
                Running::Continue
            }
            MethodKind::ChannelClose => {
                if let AMQPClass::Channel(ChannelWireMethod::Close(close)) = class {
                    self.on_channel_close_from_broker(channel_id, close).await
                } else {
                    Running::Continue
                }
            }
            MethodKind::ChannelCloseOk => {
                self.on_channel_close_ok(channel_id).await;
                Running::Continue
            }
            _ => Running::Continue,
        }
    }

    fn route_header(&mut self, channel_id: u16, header: amq_protocol::frame::AMQPContentHeader) {
        if let Some(state) = self.channel_mut(channel_id) {
            if let Err(e) = state.assembler.on_header(header) {
                tracing::warn!(target: "amqp_engine::logic", error = %e, "content header out of sequence");
            }
        }
    }

    async fn route_body(&mut self, channel_id: u16, body: Vec<u8>) {
        let assembled = match self.channel_mut(channel_id) {
            Some(state) => state.assembler.on_body(body),
            None => return,
        };

        match assembled {
            Ok(Some(Assembled::Deliver(method, properties, body))) => {
                self.dispatch_delivery(channel_id, method, properties, body);
            }
            Ok(Some(Assembled::Return(_method, _properties, _body))) => {
                tracing::debug!(target: "amqp_engine::logic", channel_id, "message returned by broker");
            }
            Ok(Some(Assembled::GetOk(method, properties, body))) => {
                if let Some(state) = self.channel_mut(channel_id) {
                    if let Some(reply) = state.pending_get.take() {
                        let _ = reply.send(Ok(Some(crate::channel::action::GetResult {
                            method,
                            properties,
                            body,
                        })));
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(target: "amqp_engine::logic", error = %e, "content body out of sequence");
            }
        }
    }

    fn dispatch_delivery(
        &mut self,
        channel_id: u16,
        method: basic::Deliver,
        properties: basic::AMQPProperties,
        body: bytes::Bytes,
    ) {
        let Some(state) = self.channel_mut(channel_id) else {
            return;
        };
        let Some(consumer) = state.consumers.get(&method.consumer_tag) else {
            tracing::warn!(target: "amqp_engine::logic", consumer_tag = %method.consumer_tag, "delivery for unknown consumer");
            return;
        };

        let delivery = Delivery {
            consumer_tag: method.consumer_tag,
            delivery_tag: method.delivery_tag,
            redelivered: method.redelivered,
            exchange: method.exchange,
            routing_key: method.routing_key,
            properties,
            body,
        };
        let delivery_tag = delivery.delivery_tag;
        let no_ack = consumer.no_ack;
        let callback = consumer.callback;
        let outbound = self.outbound_tx.clone();

        tokio::spawn(async move {
            let decision = callback.deliver(delivery).await;
            // A no_ack consumer was never expected to ack; the broker
            // already considers every delivery settled on send.
            if no_ack {
                return;
            }
            let frame = match decision {
                AckDecision::Ack => AMQPFrame::Method(
                    channel_id,
                    AMQPClass::Basic(BasicMethod::Ack(basic::Ack {
                        delivery_tag,
                        multiple: false,
                    })),
                ),
                AckDecision::Reject { requeue } => AMQPFrame::Method(
                    channel_id,
                    AMQPClass::Basic(BasicMethod::Reject(basic::Reject {
                        delivery_tag,
                        requeue,
                    })),
                ),
                AckDecision::Leave => return,
            };
            let _ = outbound.send(frame);
        });
    }

    async fn on_ack_frame(&mut self, frame: AMQPFrame) -> Running {
        if self.transport.send(frame).await.is_err() {
            return Running::Stop(DisconnectReason("failed to write ack/reject".into()));
        }
        self.touch_last_send();
        Running::Continue
    }

    async fn on_channel_open_ok(&mut self, channel_id: u16) {
        let Some(state) = self.channel_mut(channel_id) else {
            return;
        };
        state.lifecycle = ChannelLifecycle::Open;
        let pending = state.drain_pending();
        let waiters = state.drain_created_waiters();

        self.run_pending_actions(channel_id, pending).await;
        for f in waiters {
            tokio::spawn(async move { f() });
        }

        if let Some(reply) = self.pending_open.remove(&channel_id) {
            let _ = reply.send(Ok(Channel::new(channel_id, self.control_tx.clone())));
        }
    }

    /// Broker-initiated `Channel.Close`: fire `CloseCallback`, then either
    /// escalate to tearing down the connection (`cascade_failure`) or answer
    /// with `Channel.CloseOk`. The channel is removed from the table either
    /// way.
    async fn on_channel_close_from_broker(&mut self, channel_id: u16, close: channel_proto::Close) -> Running {
        let reason = ChannelCloseReason {
            class_id: close.class_id,
            method_id: close.method_id,
            reply_code: close.reply_code,
            reply_text: close.reply_text,
        };

        let (callback, cascade_failure) = match self.channel_mut(channel_id) {
            Some(state) => (state.close_callback.clone(), state.cascade_failure),
            None => return Running::Continue,
        };
        if let Some(cb) = callback {
            cb.call(reason.clone()).await;
        }

        let running = if cascade_failure {
            let reply_text = format!("cascading from channel {channel_id}: {}", reason.reply_text);
            let _ = self
                .transport
                .send(AMQPFrame::Method(
                    CONNECTION_CHANNEL_ID,
                    AMQPClass::Connection(ConnectionMethod::Close(connection::Close {
                        reply_code: 200,
                        reply_text,
                        class_id: 0,
                        method_id: 0,
                    })),
                ))
                .await;
            Running::Continue
        } else {
            let frame = AMQPFrame::Method(
                channel_id,
                AMQPClass::Channel(ChannelWireMethod::CloseOk(channel_proto::CloseOk {})),
            );
            let _ = self.transport.send(frame).await;
            Running::Continue
        };

        self.remove_channel(channel_id, ChannelError::ClosedByBroker(reason.reply_text));
        running
    }

    /// `Channel.CloseOk` confirming a close *we* initiated. The reply future
    /// for `Channel::close()` itself resolves generically via the Sync-Gate
    /// match above; this only fires the subscribed `CloseOkCallback` and
    /// removes the channel.
    async fn on_channel_close_ok(&mut self, channel_id: u16) {
        if let Some(state) = self.channel_mut(channel_id) {
            if let Some(cb) = state.close_ok_callback.clone() {
                cb.call(()).await;
            }
        }
        self.remove_channel(channel_id, ChannelError::ClosedByBroker(format!(
            "channel {channel_id} closed"
        )));
    }

    fn remove_channel(&mut self, channel_id: u16, err: ChannelError) {
        if let Some(mut state) = self.channels.remove(&channel_id) {
            state.lifecycle = ChannelLifecycle::Closed;
            state.sync_gate.clear();
            state.fail_pending(err);
            state.consumers.clear();
        }
    }

    async fn run_pending_actions(&mut self, channel_id: u16, mut actions: VecDeque<Action>) {
        while let Some(action) = actions.pop_front() {
            self.run_action(channel_id, action).await;
        }
    }

    async fn on_control(&mut self, ctrl: ConnectionControl) -> Running {
        match ctrl {
            ConnectionControl::OpenChannel { id, reply } => {
                self.open_channel(id, reply).await;
                Running::Continue
            }
            ConnectionControl::CloseChannel { channel_id, reply } => {
                self.close_channel(channel_id, reply).await
            }
            ConnectionControl::ChannelAction { channel_id, action } => {
                let ready = match self.channel_mut(channel_id) {
                    Some(state) => state.submit(action),
                    None => {
                        action.fail(ChannelError::NotFound(channel_id));
                        return Running::Continue;
                    }
                };
                if let Some(ready) = ready {
                    self.run_action(channel_id, ready).await;
                }
                Running::Continue
            }
            ConnectionControl::RegisterCloseCallback { channel_id, callback } => {
                if let Some(state) = self.channel_mut(channel_id) {
                    state.close_callback = Some(callback);
                }
                Running::Continue
            }
            ConnectionControl::RegisterCloseOkCallback { channel_id, callback } => {
                if let Some(state) = self.channel_mut(channel_id) {
                    state.close_ok_callback = Some(callback);
                }
                Running::Continue
            }
            ConnectionControl::SetCascadeFailure { channel_id, cascade } => {
                if let Some(state) = self.channel_mut(channel_id) {
                    state.cascade_failure = cascade;
                }
                Running::Continue
            }
            ConnectionControl::DoWhenCreated { channel_id, callback } => {
                if let Some(state) = self.channel_mut(channel_id) {
                    if let Some(f) = state.queue_created_waiter(callback) {
                        tokio::spawn(async move { f() });
                    }
                }
                Running::Continue
            }
            ConnectionControl::Stop { reply } => {
                self.stop_requested = Some(reply);
                let _ = self
                    .transport
                    .send(AMQPFrame::Method(
                        CONNECTION_CHANNEL_ID,
                        AMQPClass::Connection(ConnectionMethod::Close(connection::Close {
                            reply_code: 200,
                            reply_text: "goodbye".into(),
                            class_id: 0,
                            method_id: 0,
                        })),
                    ))
                    .await;
                Running::Continue
            }
            ConnectionControl::Shutdown { reply } => {
                self.shutdown_requested = true;
                let _ = self.transport.shutdown().await;
                let _ = reply.send(Ok(()));
                Running::Stop(DisconnectReason("shutdown requested".into()))
            }
        }
    }

    async fn open_channel(&mut self, id: Option<u16>, reply: oneshot::Sender<Result<Channel, crate::error::Error>>) {
        let channel_id = match id {
            Some(id) => {
                if id == CONNECTION_CHANNEL_ID || id > crate::constants::MAX_CHANNEL_ID {
                    let _ = reply.send(Err(ConfigError::InvalidOptions(
                        "channel id must be in 1..=65535",
                    ).into()));
                    return;
                }
                if self.channels.contains_key(&id) {
                    let _ = reply.send(Ok(Channel::new(id, self.control_tx.clone())));
                    return;
                }
                id
            }
            None => match self.next_free_channel_id() {
                Some(id) => id,
                None => {
                    let _ = reply.send(Err(ConfigError::ChannelIdSpaceExhausted.into()));
                    return;
                }
            },
        };

        self.channels.insert(channel_id, ChannelState::new(channel_id));
        self.pending_open.insert(channel_id, reply);

        let open = channel_proto::Open {};
        let frame = AMQPFrame::Method(channel_id, AMQPClass::Channel(ChannelWireMethod::Open(open)));
        self.admit_and_send(channel_id, vec![frame], None).await;
    }

    /// Smallest id in `1..=MAX_CHANNEL_ID` not currently in use. A linear
    /// scan, traded deliberately for the ability to also honor explicit,
    /// possibly non-contiguous ids requested via `channel(Some(id))`.
    fn next_free_channel_id(&self) -> Option<u16> {
        (1..=crate::constants::MAX_CHANNEL_ID).find(|id| !self.channels.contains_key(id))
    }

    async fn close_channel(
        &mut self,
        channel_id: u16,
        reply: oneshot::Sender<Result<(), crate::error::Error>>,
    ) -> Running {
        if self.channel_mut(channel_id).is_none() {
            let _ = reply.send(Err(ChannelError::NotFound(channel_id).into()));
            return Running::Continue;
        }
        let frame = AMQPFrame::Method(
            channel_id,
            AMQPClass::Channel(ChannelWireMethod::Close(channel_proto::Close {
                reply_code: 200,
                reply_text: "goodbye".into(),
                class_id: 0,
                method_id: 0,
            })),
        );
        let callback: crate::sync_gate::ReplyCallback = Box::new(move |class| {
            let result = match class {
                AMQPClass::Channel(ChannelWireMethod::CloseOk(_)) => Ok(()),
                other => Err(ChannelError::ProtocolViolation(format!(
                    "unexpected reply to Channel.Close: {other:?}"
                ))
                .into()),
            };
            let _ = reply.send(result);
        });
        self.admit_and_send(channel_id, vec![frame], Some(callback)).await;
        Running::Continue
    }

    async fn run_action(&mut self, channel_id: u16, action: Action) {
        match action {
            Action::DeclareQueue(a) => {
                let declare = queue::Declare {
                    queue: a.name,
                    durable: a.durable,
                    exclusive: a.exclusive,
                    auto_delete: a.auto_delete,
                    arguments: a.arguments,
                    ..Default::default()
                };
                let frame = AMQPFrame::Method(channel_id, AMQPClass::Queue(QueueMethod::Declare(declare)));
                let callback: crate::sync_gate::ReplyCallback = Box::new(move |class| {
                    let result = match class {
                        AMQPClass::Queue(QueueMethod::DeclareOk(ok)) => Ok(ok.clone()),
                        other => Err(ChannelError::ProtocolViolation(format!(
                            "unexpected reply to Queue.Declare: {other:?}"
                        ))),
                    };
                    let _ = a.reply.send(result);
                });
                self.admit_and_send(channel_id, vec![frame], Some(callback)).await;
            }
            Action::BindQueue(a) => {
                let bind = queue::Bind {
                    queue: a.queue,
                    exchange: a.exchange,
                    routing_key: a.routing_key,
                    arguments: a.arguments,
                    ..Default::default()
                };
                let frame = AMQPFrame::Method(channel_id, AMQPClass::Queue(QueueMethod::Bind(bind)));
                let callback: crate::sync_gate::ReplyCallback = Box::new(move |class| {
                    let result = match class {
                        AMQPClass::Queue(QueueMethod::BindOk(_)) => Ok(()),
                        other => Err(ChannelError::ProtocolViolation(format!(
                            "unexpected reply to Queue.Bind: {other:?}"
                        ))),
                    };
                    let _ = a.reply.send(result);
                });
                self.admit_and_send(channel_id, vec![frame], Some(callback)).await;
            }
            Action::Consume(a) => {
                if let Some(state) = self.channel_mut(channel_id) {
                    state.pending_consume = Some((a.callback.clone(), a.no_ack));
                }
                let consume = basic::Consume {
                    queue: a.queue,
                    consumer_tag: a.consumer_tag.clone(),
                    no_ack: a.no_ack,
                    exclusive: a.exclusive,
                    ..Default::default()
                };
                let frame = AMQPFrame::Method(channel_id, AMQPClass::Basic(BasicMethod::Consume(consume)));
                let callback: crate::sync_gate::ReplyCallback = Box::new(move |class| {
                    let result = match class {
                        AMQPClass::Basic(BasicMethod::ConsumeOk(ok)) => Ok(ok.consumer_tag.clone()),
                        other => Err(ChannelError::ProtocolViolation(format!(
                            "unexpected reply to Basic.Consume: {other:?}"
                        ))),
                    };
                    let _ = a.reply.send(result);
                });
                self.admit_and_send(channel_id, vec![frame], Some(callback)).await;
            }
            Action::Get(a) => {
                let get = basic::Get {
                    queue: a.queue,
                    no_ack: a.no_ack,
                    ..Default::default()
                };
                let frame = AMQPFrame::Method(channel_id, AMQPClass::Basic(BasicMethod::Get(get)));
                if let Some(state) = self.channel_mut(channel_id) {
                    state.pending_get = Some(a.reply);
                }
                // No sync_gate callback here: GetEmpty resolves the reply as
                // soon as it is seen (below, in route_method), and GetOk
                // resolves only once its content has finished reassembling
                // in route_body, where the caller actually gets the body.
                self.admit_and_send(channel_id, vec![frame], None).await;
            }
            Action::Publish(a) => {
                let batch = compose_basic_publish(
                    channel_id,
                    a.exchange,
                    a.routing_key,
                    a.mandatory,
                    a.immediate,
                    a.properties,
                    &a.payload,
                    self.tuning.frame_max,
                );
                self.admit_and_send(channel_id, batch, None).await;
            }
        }
    }

    async fn admit_and_send(
        &mut self,
        channel_id: u16,
        batch: OutboundBatch,
        callback: Option<crate::sync_gate::ReplyCallback>,
    ) {
        let admission = match self.channel_mut(channel_id) {
            Some(state) => state.admit(batch, callback),
            None => return,
        };
        if let Admission::Admit(batch) = admission {
            self.write_batch(channel_id, batch).await;
        }
    }

    async fn release_deferred(
        &mut self,
        channel_id: u16,
        deferred: VecDeque<(OutboundBatch, Option<crate::sync_gate::ReplyCallback>)>,
    ) {
        for (batch, callback) in deferred {
            self.admit_and_send(channel_id, batch, callback).await;
        }
    }

    async fn write_batch(&mut self, channel_id: u16, batch: OutboundBatch) {
        let info = batch.first().and_then(|frame| match frame {
            AMQPFrame::Method(_, class) => {
                let (class_id, method_id) = class_and_method_id(class);
                Some(FrameSentInfo {
                    channel: channel_id,
                    class_id,
                    method_id,
                })
            }
            _ => None,
        });

        let mut wrote_any = false;
        for frame in batch {
            if self.transport.send(frame).await.is_err() {
                break;
            }
            wrote_any = true;
        }
        if wrote_any {
            self.touch_last_send();
        }

        if let Some(info) = info {
            self.callbacks.fire_frame_sent(info).await;
        }
    }
}

async fn tick(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(d) => d.as_mut().await,
        None => std::future::pending::<()>().await,
    }
}

fn class_and_method_id(class: &AMQPClass) -> (u16, u16) {
    match class {
        AMQPClass::Connection(_) => (10, 0),
        AMQPClass::Channel(_) => (20, 0),
        AMQPClass::Queue(_) => (50, 0),
        AMQPClass::Basic(_) => (60, 0),
        _ => (0, 0),
    }
}
