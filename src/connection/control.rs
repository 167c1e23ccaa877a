//! Commands the `Connection` handle and `Channel` handles send into the
//! connection's single event-loop task.

use tokio::sync::oneshot;

use crate::channel::action::Action;
use crate::channel::{Channel, CloseCallback, CloseOkCallback};
use crate::error::Error;

/// Top-level control plane: connection lifecycle and channel allocation.
pub enum ConnectionControl {
    /// `id = None` allocates the smallest free id; `id = Some(n)` returns
    /// the existing channel for `n`, opening it first if it doesn't exist.
    OpenChannel {
        id: Option<u16>,
        reply: oneshot::Sender<Result<Channel, Error>>,
    },
    CloseChannel {
        channel_id: u16,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    /// One channel's queued or immediate action.
    ChannelAction {
        channel_id: u16,
        action: Action,
    },
    RegisterCloseCallback {
        channel_id: u16,
        callback: CloseCallback,
    },
    RegisterCloseOkCallback {
        channel_id: u16,
        callback: CloseOkCallback,
    },
    SetCascadeFailure {
        channel_id: u16,
        cascade: bool,
    },
    DoWhenCreated {
        channel_id: u16,
        callback: Box<dyn FnOnce() + Send>,
    },
    Stop {
        reply: oneshot::Sender<Result<(), Error>>,
    },
    /// Immediate, non-graceful teardown: cancel timers, close the socket,
    /// mark the connection stopped. Does not wait for `Connection.CloseOk`.
    Shutdown {
        reply: oneshot::Sender<Result<(), Error>>,
    },
}
