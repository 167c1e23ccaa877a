//! `Connection.Start` -> `StartOk` -> `Tune` -> `TuneOk` -> `Open` ->
//! `OpenOk`.

use amq_protocol::frame::AMQPFrame;
use amq_protocol::protocol::connection::AMQPMethod as ConnectionMethod;
use amq_protocol::protocol::table::{gen_field_table, AMQPValue, FieldTable};
use amq_protocol::protocol::{connection, AMQPClass};
use cookie_factory::gen_simple;

use crate::config::Config;
use crate::constants::{
    AUTH_MECHANISM, CONNECTION_CHANNEL_ID, INFORMATION, LOCALE, PLATFORM, PRODUCT, VERSION,
};
use crate::error::{HandshakeError, TransportError};
use crate::transport::Transport;

/// Parameters negotiated by `Tune`/`TuneOk`, applied to every channel and to
/// the transport's frame codec for the life of the connection.
#[derive(Debug, Clone, Copy)]
pub struct Tuning {
    pub channel_max: u16,
    pub frame_max: u32,
    pub heartbeat: u16,
}

pub async fn perform(transport: &mut Transport, config: &Config) -> Result<Tuning, HandshakeError> {
    let start = expect_connection_method(transport, "Connection.Start").await?;
    let _start = match start {
        ConnectionMethod::Start(s) => s,
        ConnectionMethod::Close(c) => {
            return Err(HandshakeError::RejectedByBroker(format!("{c:?}")))
        }
        other => return Err(HandshakeError::UnexpectedFrame(format!("{other:?}"))),
    };

    let mut client_properties = FieldTable::default();
    client_properties.insert("platform".into(), AMQPValue::LongString(PLATFORM.into()));
    client_properties.insert("product".into(), AMQPValue::LongString(PRODUCT.into()));
    client_properties.insert("information".into(), AMQPValue::LongString(INFORMATION.into()));
    client_properties.insert("version".into(), AMQPValue::LongString(VERSION.into()));

    let mut login_password = FieldTable::default();
    login_password.insert("LOGIN".into(), AMQPValue::LongString(config.username.clone().into()));
    login_password.insert("PASSWORD".into(), AMQPValue::LongString(config.password.clone().into()));
    let response = gen_simple(gen_field_table(&login_password), Vec::new())
        .map_err(TransportError::from)?;

    let start_ok = connection::StartOk {
        client_properties,
        mechanism: AUTH_MECHANISM.into(),
        response: response.into(),
        locale: LOCALE.into(),
    };
    send(transport, ConnectionMethod::StartOk(start_ok)).await?;

    let tune = expect_connection_method(transport, "Connection.Tune").await?;
    let tune = match tune {
        ConnectionMethod::Tune(t) => t,
        ConnectionMethod::Close(c) => {
            return Err(HandshakeError::RejectedByBroker(format!("{c:?}")))
        }
        other => return Err(HandshakeError::UnexpectedFrame(format!("{other:?}"))),
    };

    let tune_ok = connection::TuneOk {
        channel_max: 0,
        frame_max: tune.frame_max,
        heartbeat: 0,
    };
    send(transport, ConnectionMethod::TuneOk(tune_ok)).await?;
    transport.set_frame_max(tune.frame_max);

    let open = connection::Open {
        virtual_host: config.virtual_host.clone().into(),
        insist: true,
        ..Default::default()
    };
    send(transport, ConnectionMethod::Open(open)).await?;

    let opened = expect_connection_method(transport, "Connection.OpenOk").await?;
    match opened {
        ConnectionMethod::OpenOk(_) => {}
        ConnectionMethod::Close(c) => {
            return Err(HandshakeError::RejectedByBroker(format!("{c:?}")))
        }
        other => return Err(HandshakeError::UnexpectedFrame(format!("{other:?}"))),
    }

    Ok(Tuning {
        channel_max: 0,
        frame_max: tune.frame_max,
        heartbeat: 0,
    })
}

async fn send(transport: &mut Transport, method: ConnectionMethod) -> Result<(), TransportError> {
    transport
        .send(AMQPFrame::Method(
            CONNECTION_CHANNEL_ID,
            AMQPClass::Connection(method),
        ))
        .await
}

async fn expect_connection_method(
    transport: &mut Transport,
    what: &'static str,
) -> Result<ConnectionMethod, HandshakeError> {
    match transport.recv().await? {
        Some(AMQPFrame::Method(CONNECTION_CHANNEL_ID, AMQPClass::Connection(method))) => Ok(method),
        Some(other) => Err(HandshakeError::UnexpectedFrame(format!(
            "expected {what}, got {other:?}"
        ))),
        None => Err(HandshakeError::UnexpectedEof),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use amq_protocol::protocol::table::parse_field_table;
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_util::codec::Framed;

    use crate::config::{Config, DebugFlags, Endpoint};
    use crate::transport::AmqpCodec;

    use super::*;

    fn test_config(port: u16) -> Config {
        Config {
            endpoints: vec![Endpoint {
                host: "127.0.0.1".into(),
                port,
            }],
            username: "guest".into(),
            password: "guest".into(),
            virtual_host: "/".into(),
            ssl: false,
            keepalive: Duration::from_secs(0),
            reconnect: false,
            debug: DebugFlags::default(),
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Drives the broker side of a loopback handshake: echoes the protocol
    /// header, then runs Start/Tune/Open against whatever the client sends.
    async fn run_broker(stream: TcpStream) {
        let mut raw = stream;
        let mut header = [0u8; 8];
        raw.read_exact(&mut header).await.unwrap();
        raw.write_all(&header).await.unwrap();

        let mut broker = Framed::new(raw, AmqpCodec::default());

        broker
            .send(AMQPFrame::Method(
                CONNECTION_CHANNEL_ID,
                AMQPClass::Connection(ConnectionMethod::Start(connection::Start::default())),
            ))
            .await
            .unwrap();

        let start_ok = match broker.next().await.unwrap().unwrap() {
            AMQPFrame::Method(CONNECTION_CHANNEL_ID, AMQPClass::Connection(ConnectionMethod::StartOk(s))) => s,
            other => panic!("expected StartOk, got {other:?}"),
        };
        assert_eq!(start_ok.mechanism.as_str(), "AMQPLAIN");
        let (_, login_password) = parse_field_table(start_ok.response.as_bytes()).unwrap();
        assert_eq!(
            login_password.get("LOGIN"),
            Some(&AMQPValue::LongString("guest".into()))
        );
        assert_eq!(
            login_password.get("PASSWORD"),
            Some(&AMQPValue::LongString("guest".into()))
        );

        broker
            .send(AMQPFrame::Method(
                CONNECTION_CHANNEL_ID,
                AMQPClass::Connection(ConnectionMethod::Tune(connection::Tune {
                    channel_max: 0,
                    frame_max: 131072,
                    heartbeat: 0,
                })),
            ))
            .await
            .unwrap();

        match broker.next().await.unwrap().unwrap() {
            AMQPFrame::Method(CONNECTION_CHANNEL_ID, AMQPClass::Connection(ConnectionMethod::TuneOk(t))) => {
                assert_eq!(t.frame_max, 131072);
                assert_eq!(t.heartbeat, 0);
            }
            other => panic!("expected TuneOk, got {other:?}"),
        }

        match broker.next().await.unwrap().unwrap() {
            AMQPFrame::Method(CONNECTION_CHANNEL_ID, AMQPClass::Connection(ConnectionMethod::Open(o))) => {
                assert_eq!(o.virtual_host.as_str(), "/");
            }
            other => panic!("expected Open, got {other:?}"),
        }

        broker
            .send(AMQPFrame::Method(
                CONNECTION_CHANNEL_ID,
                AMQPClass::Connection(ConnectionMethod::OpenOk(connection::OpenOk::default())),
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn handshake_negotiates_tuning_against_a_loopback_broker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let broker = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            run_broker(stream).await;
        });

        let config = test_config(port);
        let mut transport = Transport::connect(&config.endpoints[0], config.connect_timeout)
            .await
            .unwrap();
        let tuning = perform(&mut transport, &config).await.unwrap();

        assert_eq!(tuning.frame_max, 131072);
        assert_eq!(tuning.heartbeat, 0);

        broker.await.unwrap();
    }
}
