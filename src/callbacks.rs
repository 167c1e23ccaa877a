//! Startup / Reconnected / Disconnected / FrameSent event fan-out.
//!
//! Callbacks run inline on the connection's single event-loop task, so they
//! must not block for long; they may themselves be `async`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A subscriber to one of the four connection events.
pub trait Callback<Args>: Send + Sync {
    fn call(&self, args: Args) -> BoxFuture<'static, ()>;
}

impl<Args, F, Fut> Callback<Args> for F
where
    F: Fn(Args) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, args: Args) -> BoxFuture<'static, ()> {
        Box::pin((self)(args))
    }
}

/// Reason a connection was lost, passed to `Disconnected` subscribers.
#[derive(Debug, Clone)]
pub struct DisconnectReason(pub String);

/// `(channel, class_id, method_id)` summary passed to `FrameSent` subscribers.
#[derive(Debug, Clone, Copy)]
pub struct FrameSentInfo {
    pub channel: u16,
    pub class_id: u16,
    pub method_id: u16,
}

#[derive(Default)]
pub struct CallbackTable {
    pub startup: Vec<Arc<dyn Callback<()>>>,
    pub reconnected: Vec<Arc<dyn Callback<()>>>,
    pub disconnected: Vec<Arc<dyn Callback<DisconnectReason>>>,
    pub frame_sent: Vec<Arc<dyn Callback<FrameSentInfo>>>,
}

impl std::fmt::Debug for CallbackTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackTable")
            .field("startup", &self.startup.len())
            .field("reconnected", &self.reconnected.len())
            .field("disconnected", &self.disconnected.len())
            .field("frame_sent", &self.frame_sent.len())
            .finish()
    }
}

impl CallbackTable {
    pub fn add_startup(&mut self, cb: impl Callback<()> + 'static) {
        self.startup.push(Arc::new(cb));
    }

    pub fn add_reconnected(&mut self, cb: impl Callback<()> + 'static) {
        self.reconnected.push(Arc::new(cb));
    }

    pub fn add_disconnected(&mut self, cb: impl Callback<DisconnectReason> + 'static) {
        self.disconnected.push(Arc::new(cb));
    }

    pub fn add_frame_sent(&mut self, cb: impl Callback<FrameSentInfo> + 'static) {
        self.frame_sent.push(Arc::new(cb));
    }

    /// Fires every `Startup` subscriber. A subscriber error is logged and
    /// does not prevent the remaining subscribers from running.
    pub async fn fire_startup(&self) {
        for cb in &self.startup {
            cb.call(()).await;
        }
    }

    pub async fn fire_reconnected(&self) {
        for cb in &self.reconnected {
            cb.call(()).await;
        }
    }

    pub async fn fire_disconnected(&self, reason: DisconnectReason) {
        for cb in &self.disconnected {
            cb.call(reason.clone()).await;
        }
    }

    pub async fn fire_frame_sent(&self, info: FrameSentInfo) {
        for cb in &self.frame_sent {
            cb.call(info).await;
        }
    }
}
