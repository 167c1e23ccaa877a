//! `Basic.Publish` frame composition and the body-chunking law.
//!
//! A publish is always emitted as one `Method` frame, one `Header` frame
//! carrying the aggregate body size and properties, and `ceil(len(payload) /
//! frame_max)` `Body` frames; `frame_max == 0` (no limit negotiated yet, or
//! negotiated as unlimited) always yields exactly one `Body` frame.

use amq_protocol::frame::{AMQPContentHeader, AMQPFrame};
use amq_protocol::protocol::basic::{AMQPMethod as BasicMethod, AMQPProperties, Publish};
use amq_protocol::protocol::{basic, AMQPClass};

/// Builds the `[Method, Header, Body...]` triple for one publish. The
/// caller is responsible for admitting this batch through the channel's
/// [`crate::sync_gate::SyncGate`] (it never is, `Basic.Publish` is
/// asynchronous, but admission is still the single place frames reach the
/// wire).
#[allow(clippy::too_many_arguments)]
pub fn compose_basic_publish(
    channel_id: u16,
    exchange: String,
    routing_key: String,
    mandatory: bool,
    immediate: bool,
    properties: AMQPProperties,
    payload: &[u8],
    frame_max: u32,
) -> Vec<AMQPFrame> {
    let publish = Publish {
        exchange,
        routing_key,
        mandatory,
        immediate,
        ..Default::default()
    };

    let mut frames = vec![
        AMQPFrame::Method(channel_id, AMQPClass::Basic(BasicMethod::Publish(publish))),
        AMQPFrame::Header(
            channel_id,
            basic::CLASS_ID,
            Box::new(AMQPContentHeader {
                class_id: basic::CLASS_ID,
                weight: 0,
                body_size: payload.len() as u64,
                properties,
            }),
        ),
    ];

    if payload.is_empty() {
        frames.push(AMQPFrame::Body(channel_id, Vec::new()));
        return frames;
    }

    let chunk_size = if frame_max == 0 {
        payload.len()
    } else {
        frame_max as usize
    };

    for chunk in payload.chunks(chunk_size) {
        frames.push(AMQPFrame::Body(channel_id, chunk.to_vec()));
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_frame_count(frames: &[AMQPFrame]) -> usize {
        frames
            .iter()
            .filter(|f| matches!(f, AMQPFrame::Body(..)))
            .count()
    }

    #[test]
    fn unlimited_frame_max_yields_a_single_body_frame() {
        let payload = vec![0u8; 10_000];
        let frames = compose_basic_publish(
            1,
            "ex".into(),
            "rk".into(),
            false,
            false,
            AMQPProperties::default(),
            &payload,
            0,
        );
        assert_eq!(body_frame_count(&frames), 1);
    }

    #[test]
    fn payload_is_split_into_ceil_division_body_frames() {
        let payload = vec![0u8; 10_000];
        let frames = compose_basic_publish(
            1,
            "ex".into(),
            "rk".into(),
            false,
            false,
            AMQPProperties::default(),
            &payload,
            4096,
        );
        // ceil(10000 / 4096) == 3
        assert_eq!(body_frame_count(&frames), 3);
    }

    #[test]
    fn empty_payload_still_yields_one_empty_body_frame() {
        let frames = compose_basic_publish(
            1,
            "ex".into(),
            "rk".into(),
            false,
            false,
            AMQPProperties::default(),
            &[],
            4096,
        );
        assert_eq!(body_frame_count(&frames), 1);
    }

    #[test]
    fn leading_frame_is_the_publish_method() {
        let frames = compose_basic_publish(
            7,
            "ex".into(),
            "rk".into(),
            true,
            false,
            AMQPProperties::default(),
            b"hi",
            4096,
        );
        match &frames[0] {
            AMQPFrame::Method(channel, AMQPClass::Basic(BasicMethod::Publish(p))) => {
                assert_eq!(*channel, 7);
                assert!(p.mandatory);
            }
            other => panic!("expected a Basic.Publish method frame, got {other:?}"),
        }
    }
}
