//! Byte <-> frame boundary: protocol header negotiation and the
//! length-prefixed AMQP frame codec.
//!
//! Frame decoding must survive an arbitrary chunking of the underlying
//! stream: a single `read()` can return less than one frame, more than one
//! frame, or a frame boundary mid-payload. We lean on `tokio_util::codec`'s
//! `Framed` to own the resync buffer rather than hand-rolling one.

use bytes::{Buf, BytesMut};
use cookie_factory::gen_simple;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::instrument;

use amq_protocol::frame::{gen_frame, parse_frame, AMQPFrame, ProtocolVersion};

use crate::config::Endpoint;
use crate::error::TransportError;

/// The AMQP 0-9-1 protocol header clients send before any framed traffic.
const PROTOCOL_HEADER: [u8; 8] = [b'A', b'M', b'Q', b'P', 0, 0, 9, 1];

/// `tokio_util::codec::{Encoder, Decoder}` over `amq_protocol`'s frame
/// grammar. `amq_protocol` owns wire layout; this codec owns buffering.
#[derive(Debug, Default)]
pub struct AmqpCodec {
    /// Negotiated `frame_max`; `0` means "no limit" per the handshake's
    /// initial `Connection.Start` advertisement.
    pub frame_max: u32,
}

impl Decoder for AmqpCodec {
    type Item = AMQPFrame;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<AMQPFrame>, TransportError> {
        match parse_frame(src) {
            Ok((remainder, frame)) => {
                let consumed = src.len() - remainder.len();
                src.advance(consumed);
                tracing::trace!(target: "amqp_engine::frame_in", ?frame, "decoded frame");
                Ok(Some(frame))
            }
            Err(nom::Err::Incomplete(_)) => Ok(None),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(e.into()),
        }
    }
}

impl Encoder<AMQPFrame> for AmqpCodec {
    type Error = TransportError;

    fn encode(&mut self, frame: AMQPFrame, dst: &mut BytesMut) -> Result<(), TransportError> {
        tracing::trace!(target: "amqp_engine::frame_out", ?frame, "encoding frame");
        let bytes = gen_simple(gen_frame(&frame), Vec::new())?;
        if self.frame_max != 0 && bytes.len() > self.frame_max as usize {
            return Err(TransportError::MaxFrameSizeExceeded);
        }
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}

/// A connected, protocol-header-negotiated socket framed as AMQP frames.
pub struct Transport {
    inner: Framed<TcpStream, AmqpCodec>,
}

impl Transport {
    /// Opens a TCP connection to `endpoint` and exchanges the AMQP protocol
    /// header. Does not perform `Connection.Start`/`Tune`/`Open`; that is
    /// the handshake module's job.
    #[instrument(skip_all, fields(host = %endpoint.host, port = endpoint.port))]
    pub async fn connect(
        endpoint: &Endpoint,
        connect_timeout: std::time::Duration,
    ) -> Result<Self, TransportError> {
        let mut socket = timeout(
            connect_timeout,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        .map_err(|_| TransportError::ConnectTimeout)??;

        socket.set_nodelay(true).ok();

        socket.write_all(&PROTOCOL_HEADER).await?;

        let mut response = [0u8; 8];
        socket.read_exact(&mut response).await?;
        if response[0..4] != PROTOCOL_HEADER[0..4] {
            return Err(TransportError::MalformedFrame(
                "peer did not echo the AMQP protocol header".to_string(),
            ));
        }
        let negotiated = ProtocolVersion::new(response[5], response[6], response[7]);
        if negotiated != ProtocolVersion::AMQP_0_9_1 {
            tracing::warn!(
                target: "amqp_engine::logic",
                major = response[5], minor = response[6], revision = response[7],
                "peer proposed a different protocol revision; proceeding anyway"
            );
        }

        Ok(Self {
            inner: Framed::new(socket, AmqpCodec::default()),
        })
    }

    /// Applies the `frame_max` negotiated by `Connection.Tune` to both
    /// directions of the codec.
    pub fn set_frame_max(&mut self, frame_max: u32) {
        self.inner.codec_mut().frame_max = frame_max;
    }

    pub async fn recv(&mut self) -> Result<Option<AMQPFrame>, TransportError> {
        match self.inner.next().await {
            Some(result) => result.map(Some),
            None => Ok(None),
        }
    }

    pub async fn send(&mut self, frame: AMQPFrame) -> Result<(), TransportError> {
        self.inner.send(frame).await
    }

    pub async fn send_all(
        &mut self,
        frames: impl IntoIterator<Item = AMQPFrame>,
    ) -> Result<(), TransportError> {
        for frame in frames {
            self.inner.send(frame).await?;
        }
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.get_mut().shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amq_protocol::protocol::{basic, AMQPClass};

    #[test]
    fn codec_round_trips_a_method_frame() {
        let mut codec = AmqpCodec::default();
        let frame = AMQPFrame::Method(
            1,
            AMQPClass::Basic(basic::AMQPMethod::Ack(basic::Ack {
                delivery_tag: 42,
                multiple: false,
            })),
        );

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).expect("encode");

        let decoded = codec.decode(&mut buf).expect("decode").expect("one frame");
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn codec_reports_incomplete_frames_as_pending() {
        let mut codec = AmqpCodec::default();
        let mut buf = BytesMut::from(&[1u8, 0, 0][..]);
        assert!(codec.decode(&mut buf).expect("no hard error").is_none());
    }

    #[test]
    fn codec_rejects_frames_over_frame_max_on_encode() {
        let mut codec = AmqpCodec { frame_max: 4 };
        let frame = AMQPFrame::Method(
            1,
            AMQPClass::Basic(basic::AMQPMethod::Ack(basic::Ack {
                delivery_tag: 42,
                multiple: false,
            })),
        );
        let mut buf = BytesMut::new();
        assert!(matches!(
            codec.encode(frame, &mut buf),
            Err(TransportError::MaxFrameSizeExceeded)
        ));
    }
}
