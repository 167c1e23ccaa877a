//! Inbound frame classification and the `Method -> Header -> Body...`
//! content-assembly state machine shared by `Basic.Deliver`,
//! `Basic.Return`, and `Basic.GetOk`.

use bytes::{Bytes, BytesMut};

use amq_protocol::frame::AMQPContentHeader;
use amq_protocol::protocol::basic::{AMQPMethod as BasicMethod, AMQPProperties, Deliver, GetOk, Return};
use amq_protocol::protocol::AMQPClass;

use crate::error::ChannelError;
use crate::spec_table::MethodKind;

enum PendingKind {
    Deliver(Deliver),
    Return(Return),
    GetOk(GetOk),
}

enum State {
    Idle,
    AwaitingHeader(PendingKind),
    AwaitingBody {
        kind: PendingKind,
        properties: AMQPProperties,
        expected: u64,
        received: BytesMut,
    },
}

/// One fully reassembled content-bearing delivery.
pub enum Assembled {
    Deliver(Deliver, AMQPProperties, Bytes),
    Return(Return, AMQPProperties, Bytes),
    GetOk(GetOk, AMQPProperties, Bytes),
}

/// Per-channel content reassembly buffer. A channel owns exactly one of
/// these; AMQP 0-9-1 never interleaves two in-flight contents on the same
/// channel.
#[derive(Default)]
pub struct ContentAssembler {
    state: StateHolder,
}

#[derive(Default)]
struct StateHolder(Option<State>);

impl ContentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` while a Method -> Header -> Body sequence is in progress; the
    /// caller should not attempt to start another synchronous exchange on
    /// this channel's Sync-Gate until reassembly finishes, since the broker
    /// will not interleave frames from two different contents.
    pub fn is_assembling(&self) -> bool {
        !matches!(self.state.0, None | Some(State::Idle))
    }

    /// Starts assembly for a content-bearing method. Returns `Ok(false)` if
    /// `class` does not start content (the caller should dispatch it as an
    /// ordinary, non-content method instead).
    pub fn begin(&mut self, class: AMQPClass) -> Result<bool, ChannelError> {
        if self.is_assembling() {
            return Err(ChannelError::ProtocolViolation(
                "content-bearing method received while another delivery is still assembling"
                    .into(),
            ));
        }

        let kind = match class {
            AMQPClass::Basic(BasicMethod::Deliver(m)) => PendingKind::Deliver(m),
            AMQPClass::Basic(BasicMethod::Return(m)) => PendingKind::Return(m),
            AMQPClass::Basic(BasicMethod::GetOk(m)) => PendingKind::GetOk(m),
            _ => return Ok(false),
        };

        self.state.0 = Some(State::AwaitingHeader(kind));
        Ok(true)
    }

    pub fn on_header(&mut self, header: AMQPContentHeader) -> Result<(), ChannelError> {
        let kind = match self.state.0.take() {
            Some(State::AwaitingHeader(kind)) => kind,
            other => {
                self.state.0 = other;
                return Err(ChannelError::ProtocolViolation(
                    "content header received outside an active delivery".into(),
                ));
            }
        };

        self.state.0 = Some(State::AwaitingBody {
            kind,
            properties: header.properties,
            expected: header.body_size,
            received: BytesMut::new(),
        });
        Ok(())
    }

    /// Appends one body chunk. Returns the assembled content once `expected`
    /// bytes have been received, including the `expected == 0` case, which
    /// still requires exactly one (empty) `Body` frame, mirroring the
    /// chunking law in [`crate::publish`].
    pub fn on_body(&mut self, chunk: Vec<u8>) -> Result<Option<Assembled>, ChannelError> {
        let (kind, properties, expected, mut received) = match self.state.0.take() {
            Some(State::AwaitingBody {
                kind,
                properties,
                expected,
                received,
            }) => (kind, properties, expected, received),
            other => {
                self.state.0 = other;
                return Err(ChannelError::ProtocolViolation(
                    "body frame received outside an active delivery".into(),
                ));
            }
        };

        received.extend_from_slice(&chunk);

        if (received.len() as u64) < expected {
            self.state.0 = Some(State::AwaitingBody {
                kind,
                properties,
                expected,
                received,
            });
            return Ok(None);
        }

        self.state.0 = Some(State::Idle);
        let body = received.freeze();
        Ok(Some(match kind {
            PendingKind::Deliver(m) => Assembled::Deliver(m, properties, body),
            PendingKind::Return(m) => Assembled::Return(m, properties, body),
            PendingKind::GetOk(m) => Assembled::GetOk(m, properties, body),
        }))
    }
}

/// Classifies an inbound method frame's class without consuming it.
pub fn classify(class: &AMQPClass) -> MethodKind {
    MethodKind::of(class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use amq_protocol::protocol::basic;

    fn header(body_size: u64) -> AMQPContentHeader {
        AMQPContentHeader {
            class_id: basic::CLASS_ID,
            weight: 0,
            body_size,
            properties: AMQPProperties::default(),
        }
    }

    #[test]
    fn deliver_assembles_across_several_body_frames() {
        let mut assembler = ContentAssembler::new();
        let deliver = Deliver {
            consumer_tag: "ctag-1".into(),
            delivery_tag: 1,
            redelivered: false,
            exchange: "ex".into(),
            routing_key: "rk".into(),
        };

        assert!(assembler
            .begin(AMQPClass::Basic(BasicMethod::Deliver(deliver)))
            .unwrap());
        assembler.on_header(header(6)).unwrap();
        assert!(assembler.on_body(b"ab".to_vec()).unwrap().is_none());
        let result = assembler.on_body(b"cdef".to_vec()).unwrap();

        match result {
            Some(Assembled::Deliver(_, _, body)) => assert_eq!(&body[..], b"abcdef"),
            _ => panic!("expected an assembled Deliver"),
        }
        assert!(!assembler.is_assembling());
    }

    #[test]
    fn zero_length_body_still_requires_one_body_frame() {
        let mut assembler = ContentAssembler::new();
        let deliver = Deliver {
            consumer_tag: "ctag-1".into(),
            delivery_tag: 1,
            redelivered: false,
            exchange: String::new(),
            routing_key: "rk".into(),
        };
        assembler
            .begin(AMQPClass::Basic(BasicMethod::Deliver(deliver)))
            .unwrap();
        assembler.on_header(header(0)).unwrap();
        let result = assembler.on_body(Vec::new()).unwrap();
        assert!(matches!(result, Some(Assembled::Deliver(_, _, body)) if body.is_empty()));
    }

    #[test]
    fn interleaved_content_is_a_protocol_violation() {
        let mut assembler = ContentAssembler::new();
        let deliver = Deliver {
            consumer_tag: "ctag-1".into(),
            delivery_tag: 1,
            redelivered: false,
            exchange: String::new(),
            routing_key: "rk".into(),
        };
        assembler
            .begin(AMQPClass::Basic(BasicMethod::Deliver(deliver.clone())))
            .unwrap();
        let err = assembler.begin(AMQPClass::Basic(BasicMethod::Deliver(deliver)));
        assert!(err.is_err());
    }
}
