//! Closed enumeration over the subset of AMQP 0-9-1 method classes this
//! engine cares about, plus the static synchronous/responses descriptor
//! table the Sync-Gate needs.
//!
//! `amq-protocol` generates an open `AMQPClass`/`AMQPMethod` hierarchy
//! straight from the AMQP XML grammar; this module reduces that to the
//! closed `MethodKind` tag the Sync-Gate keys on.

use amq_protocol::protocol::basic::AMQPMethod as BasicMethod;
use amq_protocol::protocol::channel::AMQPMethod as ChannelMethod;
use amq_protocol::protocol::connection::AMQPMethod as ConnectionMethod;
use amq_protocol::protocol::queue::AMQPMethod as QueueMethod;
use amq_protocol::protocol::AMQPClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    ConnectionStart,
    ConnectionStartOk,
    ConnectionTune,
    ConnectionTuneOk,
    ConnectionOpen,
    ConnectionOpenOk,
    ConnectionClose,
    ConnectionCloseOk,
    ChannelOpen,
    ChannelOpenOk,
    ChannelClose,
    ChannelCloseOk,
    QueueDeclare,
    QueueDeclareOk,
    QueueBind,
    QueueBindOk,
    BasicConsume,
    BasicConsumeOk,
    BasicPublish,
    BasicDeliver,
    BasicReturn,
    BasicAck,
    BasicReject,
    BasicGet,
    BasicGetOk,
    BasicGetEmpty,
    /// Anything this engine does not need to key a Sync-Gate on; treated as
    /// asynchronous with no declared responses.
    Other,
}

/// Whether `kind` is synchronous and, if so, which response kinds close its
/// Sync-Gate entry.
#[derive(Debug, Clone, Copy)]
pub struct MethodDescriptor {
    pub synchronous: bool,
    pub responses: &'static [MethodKind],
}

impl MethodKind {
    /// Classify a decoded `AMQPClass` into our closed tag.
    pub fn of(class: &AMQPClass) -> MethodKind {
        match class {
            AMQPClass::Connection(m) => match m {
                ConnectionMethod::Start(_) => MethodKind::ConnectionStart,
                ConnectionMethod::StartOk(_) => MethodKind::ConnectionStartOk,
                ConnectionMethod::Tune(_) => MethodKind::ConnectionTune,
                ConnectionMethod::TuneOk(_) => MethodKind::ConnectionTuneOk,
                ConnectionMethod::Open(_) => MethodKind::ConnectionOpen,
                ConnectionMethod::OpenOk(_) => MethodKind::ConnectionOpenOk,
                ConnectionMethod::Close(_) => MethodKind::ConnectionClose,
                ConnectionMethod::CloseOk(_) => MethodKind::ConnectionCloseOk,
                _ => MethodKind::Other,
            },
            AMQPClass::Channel(m) => match m {
                ChannelMethod::Open(_) => MethodKind::ChannelOpen,
                ChannelMethod::OpenOk(_) => MethodKind::ChannelOpenOk,
                ChannelMethod::Close(_) => MethodKind::ChannelClose,
                ChannelMethod::CloseOk(_) => MethodKind::ChannelCloseOk,
                _ => MethodKind::Other,
            },
            AMQPClass::Queue(m) => match m {
                QueueMethod::Declare(_) => MethodKind::QueueDeclare,
                QueueMethod::DeclareOk(_) => MethodKind::QueueDeclareOk,
                QueueMethod::Bind(_) => MethodKind::QueueBind,
                QueueMethod::BindOk(_) => MethodKind::QueueBindOk,
                _ => MethodKind::Other,
            },
            AMQPClass::Basic(m) => match m {
                BasicMethod::Consume(_) => MethodKind::BasicConsume,
                BasicMethod::ConsumeOk(_) => MethodKind::BasicConsumeOk,
                BasicMethod::Publish(_) => MethodKind::BasicPublish,
                BasicMethod::Deliver(_) => MethodKind::BasicDeliver,
                BasicMethod::Return(_) => MethodKind::BasicReturn,
                BasicMethod::Ack(_) => MethodKind::BasicAck,
                BasicMethod::Reject(_) => MethodKind::BasicReject,
                BasicMethod::Get(_) => MethodKind::BasicGet,
                BasicMethod::GetOk(_) => MethodKind::BasicGetOk,
                BasicMethod::GetEmpty(_) => MethodKind::BasicGetEmpty,
                _ => MethodKind::Other,
            },
            _ => MethodKind::Other,
        }
    }

    /// Static synchronous/responses descriptor for this kind.
    pub fn descriptor(self) -> MethodDescriptor {
        use MethodKind::*;
        match self {
            ConnectionStartOk => MethodDescriptor {
                synchronous: true,
                responses: &[ConnectionTune],
            },
            ConnectionTuneOk => MethodDescriptor {
                synchronous: false,
                responses: &[],
            },
            ConnectionOpen => MethodDescriptor {
                synchronous: true,
                responses: &[ConnectionOpenOk, ConnectionClose],
            },
            ConnectionClose => MethodDescriptor {
                synchronous: true,
                responses: &[ConnectionCloseOk],
            },
            ChannelOpen => MethodDescriptor {
                synchronous: true,
                responses: &[ChannelOpenOk],
            },
            ChannelClose => MethodDescriptor {
                synchronous: true,
                responses: &[ChannelCloseOk],
            },
            QueueDeclare => MethodDescriptor {
                synchronous: true,
                responses: &[QueueDeclareOk],
            },
            QueueBind => MethodDescriptor {
                synchronous: true,
                responses: &[QueueBindOk],
            },
            BasicConsume => MethodDescriptor {
                synchronous: true,
                responses: &[BasicConsumeOk],
            },
            BasicGet => MethodDescriptor {
                synchronous: true,
                responses: &[BasicGetOk, BasicGetEmpty],
            },
            // Publish, Deliver, Return, Ack, Reject, *Ok replies, and
            // anything uncatalogued are asynchronous from the Sync-Gate's
            // point of view.
            _ => MethodDescriptor {
                synchronous: false,
                responses: &[],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MethodKind;

    #[test]
    fn synchronous_methods_declare_at_least_one_response() {
        for kind in [
            MethodKind::ConnectionStartOk,
            MethodKind::ConnectionOpen,
            MethodKind::ConnectionClose,
            MethodKind::ChannelOpen,
            MethodKind::ChannelClose,
            MethodKind::QueueDeclare,
            MethodKind::QueueBind,
            MethodKind::BasicConsume,
            MethodKind::BasicGet,
        ] {
            let d = kind.descriptor();
            assert!(d.synchronous);
            assert!(!d.responses.is_empty());
        }
    }

    #[test]
    fn publish_is_not_gated() {
        assert!(!MethodKind::BasicPublish.descriptor().synchronous);
        assert!(!MethodKind::BasicDeliver.descriptor().synchronous);
    }
}
