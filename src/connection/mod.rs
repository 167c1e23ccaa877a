//! Public `Connection` handle: one logical AMQP connection, reconnecting
//! underneath a stable handle.

pub mod control;
pub mod engine;
pub mod handshake;
pub mod reconnect;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;

use crate::callbacks::CallbackTable;
use crate::channel::Channel;
use crate::config::{Config, ConfigBuilder};
use crate::error::Error;
use crate::transport::Transport;

use control::ConnectionControl;
use engine::{ConnectionEngine, StopReason};
use reconnect::{backoff_delay, EndpointRotation};

/// Public handle to one logical AMQP connection. Internally this may open
/// several TCP sockets over its lifetime if `reconnect` is enabled; the
/// handle itself stays valid across reconnects.
#[derive(Clone)]
pub struct Connection {
    control: mpsc::UnboundedSender<ConnectionControl>,
    started: Arc<Notify>,
    started_flag: Arc<std::sync::atomic::AtomicBool>,
}

impl Connection {
    /// Validates `config`, then spawns the connection's event-loop task and
    /// returns immediately. The first connect attempt happens in the
    /// background; await [`Connection::do_when_startup`] or subscribe an
    /// `on_startup` callback to be notified once it succeeds.
    pub fn create(builder: ConfigBuilder) -> Result<(Self, JoinHandle<()>), Error> {
        let (config, callbacks) = builder.build()?;
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let started = Arc::new(Notify::new());
        let started_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let handle = Connection {
            control: control_tx.clone(),
            started: started.clone(),
            started_flag: started_flag.clone(),
        };

        let join = tokio::spawn(run_with_reconnect(
            config,
            callbacks,
            control_tx,
            control_rx,
            started,
            started_flag,
        ));

        Ok((handle, join))
    }

    /// With `id = None`, opens a new channel (smallest free id) and waits
    /// for `Channel.OpenOk`. With `id = Some(n)`, returns the existing
    /// channel for `n` if one is already open; two calls with the same id
    /// return a handle to the same channel.
    pub async fn channel(&self, id: Option<u16>) -> Result<Channel, Error> {
        let (reply, reply_rx) = oneshot::channel();
        self.control.send(ConnectionControl::OpenChannel { id, reply })?;
        reply_rx.await.map_err(|_| Error::AlreadyStopped)?
    }

    /// Runs `f` once the connection has completed its first (or latest)
    /// successful startup; runs immediately if that has already happened.
    pub fn do_when_startup<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.started_flag.load(std::sync::atomic::Ordering::Acquire) {
            f();
            return;
        }
        let started = self.started.clone();
        let flag = self.started_flag.clone();
        tokio::spawn(async move {
            started.notified().await;
            debug_assert!(flag.load(std::sync::atomic::Ordering::Acquire));
            f();
        });
    }

    /// Requests a graceful `Connection.Close` and waits for it to complete.
    /// Does not reconnect afterwards even if `reconnect` is enabled.
    pub async fn stop(&self) -> Result<(), Error> {
        let (reply, reply_rx) = oneshot::channel();
        self.control.send(ConnectionControl::Stop { reply })?;
        reply_rx.await.map_err(|_| Error::AlreadyStopped)?
    }

    /// Immediate, non-graceful teardown: cancels the heartbeat timer, closes
    /// the socket, and marks the connection stopped, without waiting for
    /// `Connection.CloseOk`. Unlike [`Connection::stop`], does not notify
    /// the broker first.
    pub async fn shutdown(&self) -> Result<(), Error> {
        let (reply, reply_rx) = oneshot::channel();
        self.control.send(ConnectionControl::Shutdown { reply })?;
        reply_rx.await.map_err(|_| Error::AlreadyStopped)?
    }
}

async fn run_with_reconnect(
    config: Config,
    callbacks: CallbackTable,
    control_tx: mpsc::UnboundedSender<ConnectionControl>,
    mut control_rx: mpsc::UnboundedReceiver<ConnectionControl>,
    started: Arc<Notify>,
    started_flag: Arc<std::sync::atomic::AtomicBool>,
) {
    let mut attempt: u32 = 0;
    let mut rotation = EndpointRotation::new(&config.endpoints);

    loop {
        let endpoint = rotation.next_endpoint();

        let connected = Transport::connect(endpoint, config.connect_timeout).await;
        let mut transport = match connected {
            Ok(t) => t,
            Err(_) => {
                attempt += 1;
                if !config.reconnect {
                    drain_shutdown(&mut control_rx).await;
                    return;
                }
                tokio::time::sleep(backoff_delay(attempt)).await;
                continue;
            }
        };

        let tuning = match handshake::perform(&mut transport, &config).await {
            Ok(t) => t,
            Err(_) => {
                attempt += 1;
                if !config.reconnect {
                    drain_shutdown(&mut control_rx).await;
                    return;
                }
                tokio::time::sleep(backoff_delay(attempt)).await;
                continue;
            }
        };

        attempt = 0;
        let was_started = started_flag.swap(true, std::sync::atomic::Ordering::AcqRel);
        if was_started {
            callbacks.fire_reconnected().await;
        }
        started.notify_waiters();

        let engine = ConnectionEngine::new(
            transport,
            tuning,
            config.clone(),
            clone_callbacks_ref(&callbacks),
            &mut control_rx,
            control_tx.clone(),
        );

        match engine.run().await {
            StopReason::Requested => return,
            StopReason::Lost(_) => {
                if !config.reconnect {
                    return;
                }
                // loop back around and reconnect
            }
        }
    }
}

async fn drain_shutdown(control_rx: &mut mpsc::UnboundedReceiver<ConnectionControl>) {
    while let Some(ctrl) = control_rx.recv().await {
        match ctrl {
            ConnectionControl::Stop { reply } | ConnectionControl::Shutdown { reply } => {
                let _ = reply.send(Ok(()));
                return;
            }
            _ => {}
        }
    }
}

/// `CallbackTable` holds `Arc<dyn Callback<_>>` subscriber lists; cloning it
/// for each reconnect's engine is cheap and keeps the engine's ownership
/// model simple (it never needs a reference back into this loop).
fn clone_callbacks_ref(callbacks: &CallbackTable) -> CallbackTable {
    CallbackTable {
        startup: callbacks.startup.clone(),
        reconnected: callbacks.reconnected.clone(),
        disconnected: callbacks.disconnected.clone(),
        frame_sent: callbacks.frame_sent.clone(),
    }
}

