//! Per-channel Sync-Gate: serializes synchronous method exchanges and
//! defers competing requests.
//!
//! Invariant: at most one gate entry is active per channel at any time.
//! *Every* synchronous request is serialized here, not merely requests whose
//! response sets overlap. This is a deliberate RabbitMQ workaround.

use std::collections::VecDeque;

use amq_protocol::frame::AMQPFrame;
use amq_protocol::protocol::AMQPClass;

use crate::spec_table::MethodKind;

/// One admitted outbound unit: typically `[Method]` or `[Method, Header,
/// Body...]` for a content-bearing publish.
pub type OutboundBatch = Vec<AMQPFrame>;

/// Invoked with the response frame once a synchronous request's Sync-Gate
/// entry is matched and released.
pub type ReplyCallback = Box<dyn FnOnce(&AMQPClass) + Send>;

struct GateEntry {
    responses: &'static [MethodKind],
    callback: Option<ReplyCallback>,
    process_after: VecDeque<(OutboundBatch, Option<ReplyCallback>)>,
}

/// Outcome of [`SyncGate::admit`].
pub enum Admission {
    /// Frames are clear to be written to the wire now.
    Admit(OutboundBatch),
    /// A gate was already active; `batch` was appended to its deferred queue.
    Deferred,
}

/// What happens when a synchronous reply matches an active entry.
pub struct ReleaseOutcome {
    pub callback: Option<ReplyCallback>,
    pub deferred: VecDeque<(OutboundBatch, Option<ReplyCallback>)>,
}

#[derive(Default)]
pub struct SyncGate {
    active: Option<GateEntry>,
}

impl SyncGate {
    pub fn new() -> Self {
        Self { active: None }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Outbound admission.
    pub fn admit(&mut self, batch: OutboundBatch, callback: Option<ReplyCallback>) -> Admission {
        let leading_sync = leading_synchronous_kind(&batch);

        match leading_sync {
            None => Admission::Admit(batch),
            Some(kind) => {
                if let Some(entry) = &mut self.active {
                    entry.process_after.push_back((batch, callback));
                    Admission::Deferred
                } else {
                    self.active = Some(GateEntry {
                        responses: kind.descriptor().responses,
                        callback,
                        process_after: VecDeque::new(),
                    });
                    Admission::Admit(batch)
                }
            }
        }
    }

    /// Inbound matching. Returns `None` if `class`
    /// does not close the currently active entry.
    pub fn match_reply(&mut self, class: &AMQPClass) -> Option<ReleaseOutcome> {
        let kind = MethodKind::of(class);
        let matched = self
            .active
            .as_ref()
            .is_some_and(|entry| entry.responses.contains(&kind));

        if !matched {
            return None;
        }

        let entry = self.active.take().expect("checked above");
        Some(ReleaseOutcome {
            callback: entry.callback,
            deferred: entry.process_after,
        })
    }

    /// Drops all gate state; deferred batches are discarded, matching the
    /// source's documented (if surprising) disconnect behavior:
    /// the caller owns re-queueing any lost work, typically from a
    /// `Reconnected` callback.
    pub fn clear(&mut self) {
        self.active = None;
    }
}

fn leading_synchronous_kind(batch: &OutboundBatch) -> Option<MethodKind> {
    match batch.first()? {
        AMQPFrame::Method(_, class) => {
            let kind = MethodKind::of(class);
            kind.descriptor().synchronous.then_some(kind)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amq_protocol::protocol::{basic, channel, queue, AMQPClass};

    fn method_frame(class: AMQPClass) -> AMQPFrame {
        AMQPFrame::Method(1, class)
    }

    fn channel_open() -> AMQPFrame {
        method_frame(AMQPClass::Channel(channel::AMQPMethod::Open(
            channel::Open::default(),
        )))
    }

    fn channel_open_ok() -> AMQPClass {
        AMQPClass::Channel(channel::AMQPMethod::OpenOk(channel::OpenOk::default()))
    }

    fn queue_declare() -> AMQPFrame {
        method_frame(AMQPClass::Queue(queue::AMQPMethod::Declare(
            queue::Declare::default(),
        )))
    }

    #[test]
    fn second_synchronous_request_is_deferred_until_response() {
        let mut gate = SyncGate::new();

        match gate.admit(vec![channel_open()], None) {
            Admission::Admit(_) => {}
            Admission::Deferred => panic!("first request should admit immediately"),
        }

        match gate.admit(vec![queue_declare()], None) {
            Admission::Deferred => {}
            Admission::Admit(_) => panic!("second synchronous request must wait for the gate"),
        }

        let outcome = gate.match_reply(&channel_open_ok()).expect("OpenOk matches");
        assert_eq!(outcome.deferred.len(), 1);
    }

    #[test]
    fn publish_triple_is_never_gated() {
        let mut gate = SyncGate::new();
        let batch = vec![
            method_frame(AMQPClass::Basic(basic::AMQPMethod::Publish(
                basic::Publish::default(),
            ))),
        ];
        match gate.admit(batch, None) {
            Admission::Admit(_) => {}
            Admission::Deferred => panic!("Basic.Publish is asynchronous"),
        }
        assert!(!gate.is_active());
    }

    #[test]
    fn clear_drops_active_entry_and_deferred_batches() {
        let mut gate = SyncGate::new();
        let _ = gate.admit(vec![channel_open()], None);
        let _ = gate.admit(vec![queue_declare()], None);
        assert!(gate.is_active());
        gate.clear();
        assert!(!gate.is_active());
    }
}
