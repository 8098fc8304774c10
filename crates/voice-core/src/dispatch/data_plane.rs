//! The data plane: handler slot table and message execution
//!
//! Handlers live in a fixed table indexed by [`DeviceId`]. Dispatching takes
//! the target's slot out of the table, runs the handler, and puts it back, so
//! a handler can query its own master (and the master its master) without
//! aliasing. A device reached twice in one call chain answers
//! `DeviceGone` instead of deadlocking.
//!
//! Fire-and-forget work a handler produces while processing (rewinds,
//! latency propagation) goes into a preallocated deferred queue and runs
//! after the current message, in order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rtrb::Consumer;

use crate::clock::Clock;
use crate::error::DispatchError;
use crate::events::{self, EventSender, PipelineEvent};
use crate::types::DeviceId;

use super::handler::{handle, DeviceHandler};
use super::message::{DispatchResult, Message, Op, Reply};

/// One attached handler
struct Slot {
    handler: Box<dyn DeviceHandler>,
    /// Set by the control plane while the device is torn down
    quiesced: Arc<AtomicBool>,
}

/// Handle a handler gets while processing one message
pub struct IoContext<'a> {
    slots: &'a mut [Option<Slot>],
    deferred: &'a mut VecDeque<(DeviceId, Op)>,
    deferred_capacity: usize,
    events: &'a EventSender,
    now: u64,
}

impl<'a> IoContext<'a> {
    /// Data-plane time at the start of this message (usec)
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Whether a handler is attached at `id` and not being torn down
    pub fn is_attached(&self, id: DeviceId) -> bool {
        matches!(
            self.slots.get(id.index()),
            Some(Some(slot)) if !slot.quiesced.load(Ordering::Acquire)
        )
    }

    /// Run `op` on another device right now
    pub fn dispatch(&mut self, target: DeviceId, op: Op) -> DispatchResult {
        let index = target.index();
        let Some(mut slot) = self.slots.get_mut(index).and_then(Option::take) else {
            return Err(DispatchError::DeviceGone(target));
        };
        let result = if slot.quiesced.load(Ordering::Acquire) {
            Err(DispatchError::DeviceGone(target))
        } else {
            handle(slot.handler.as_mut(), self, op)
        };
        self.slots[index] = Some(slot);
        result
    }

    /// Latency of `id` in usec, `None` if the device cannot answer
    pub fn query_latency(&mut self, id: DeviceId) -> Option<u64> {
        match self.dispatch(id, Op::GetLatency) {
            Ok(Reply::Latency(usec)) => Some(usec),
            _ => None,
        }
    }

    /// Queue `op` for `target` after the current message
    ///
    /// Returns false if the deferred queue is full.
    pub fn post(&mut self, target: DeviceId, op: Op) -> bool {
        if self.deferred.len() >= self.deferred_capacity {
            log::warn!("[DISPATCH] Deferred queue full, dropping {} for {}", op.name(), target);
            return false;
        }
        self.deferred.push_back((target, op));
        true
    }

    pub fn emit(&self, event: PipelineEvent) {
        events::emit(self.events, event);
    }
}

/// Owner of every handler; runs on the IO thread
pub struct DataPlane {
    slots: Vec<Option<Slot>>,
    deferred: VecDeque<(DeviceId, Op)>,
    deferred_capacity: usize,
    consumer: Consumer<Message>,
    events: EventSender,
    clock: Box<dyn Clock>,
}

impl DataPlane {
    pub fn new(
        consumer: Consumer<Message>,
        events: EventSender,
        clock: Box<dyn Clock>,
        max_devices: usize,
        deferred_capacity: usize,
    ) -> Self {
        Self {
            slots: (0..max_devices).map(|_| None).collect(),
            deferred: VecDeque::with_capacity(deferred_capacity),
            deferred_capacity,
            consumer,
            events,
            clock,
        }
    }

    /// Drain the message queue; returns messages processed
    pub fn pump(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(message) = self.consumer.pop() {
            self.process(message);
            processed += 1;
        }
        processed
    }

    fn process(&mut self, message: Message) {
        let Message { target, op, reply } = message;
        let name = op.name();

        let result = match op {
            Op::Attach { handler, quiesced } => self.attach(target, handler, quiesced),
            Op::Detach => self.detach(target),
            op => self.dispatch(target, op),
        };

        match reply {
            Some(tx) => {
                // Sender gave up waiting, nothing to do
                let _ = tx.send(result);
            }
            None => {
                if let Err(e) = result {
                    log::debug!("[DISPATCH] {} for {} failed: {}", name, target, e);
                }
            }
        }
    }

    /// Run `op` on `target`, then everything it deferred
    pub fn dispatch(&mut self, target: DeviceId, op: Op) -> DispatchResult {
        let result = self.context().dispatch(target, op);
        self.run_deferred();
        result
    }

    fn run_deferred(&mut self) {
        while let Some((target, op)) = self.deferred.pop_front() {
            let name = op.name();
            if let Err(e) = self.context().dispatch(target, op) {
                log::debug!("[DISPATCH] Deferred {} for {} failed: {}", name, target, e);
            }
        }
    }

    fn context(&mut self) -> IoContext<'_> {
        let now = self.clock.now_usec();
        IoContext {
            slots: &mut self.slots,
            deferred: &mut self.deferred,
            deferred_capacity: self.deferred_capacity,
            events: &self.events,
            now,
        }
    }

    /// Install a handler at `target`
    pub fn attach(
        &mut self,
        target: DeviceId,
        handler: Box<dyn DeviceHandler>,
        quiesced: Arc<AtomicBool>,
    ) -> DispatchResult {
        match self.slots.get_mut(target.index()) {
            None => Err(DispatchError::DeviceGone(target)),
            Some(Some(_)) => Err(DispatchError::Malformed("slot already attached")),
            Some(entry) => {
                log::debug!("[DISPATCH] Attached {} at {}", handler.core().name, target);
                *entry = Some(Slot { handler, quiesced });
                Ok(Reply::Ack)
            }
        }
    }

    /// Remove the handler at `target` and hand it back
    pub fn detach(&mut self, target: DeviceId) -> DispatchResult {
        self.slots
            .get_mut(target.index())
            .and_then(Option::take)
            .map(|slot| Reply::Detached(slot.handler))
            .ok_or(DispatchError::DeviceGone(target))
    }

    /// Number of attached handlers
    pub fn attached(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::dispatch::handler::{IoCore, MasterRef};
    use crate::dispatch::message::message_channel;
    use crate::events::EventBus;
    use crate::types::SampleSpec;

    /// Fixed-latency leaf
    struct Leaf {
        core: IoCore,
        latency: u64,
    }

    impl DeviceHandler for Leaf {
        fn core(&self) -> &IoCore {
            &self.core
        }
        fn core_mut(&mut self) -> &mut IoCore {
            &mut self.core
        }
        fn process_message(&mut self, ctx: &mut IoContext<'_>, op: Op) -> DispatchResult {
            match op {
                Op::GetLatency => Ok(Reply::Latency(self.latency)),
                op => self.core.process_generic(ctx, op),
            }
        }
    }

    /// Layer with no specialisations
    struct Passthrough {
        core: IoCore,
    }

    impl DeviceHandler for Passthrough {
        fn core(&self) -> &IoCore {
            &self.core
        }
        fn core_mut(&mut self) -> &mut IoCore {
            &mut self.core
        }
        fn process_message(&mut self, ctx: &mut IoContext<'_>, op: Op) -> DispatchResult {
            self.core.process_generic(ctx, op)
        }
    }

    fn plane() -> DataPlane {
        plane_with_deferred(8)
    }

    fn plane_with_deferred(deferred_capacity: usize) -> DataPlane {
        let (_tx, rx) = message_channel(8);
        let bus = EventBus::new(8);
        DataPlane::new(rx, bus.sender(), Box::new(ManualClock::new(0)), 4, deferred_capacity)
    }

    fn leaf(id: usize, latency: u64) -> Box<dyn DeviceHandler> {
        Box::new(Leaf {
            core: IoCore::new(DeviceId::new(id), "leaf", SampleSpec::hw_default(), None),
            latency,
        })
    }

    fn passthrough(id: usize, master: usize) -> Box<dyn DeviceHandler> {
        let master = MasterRef {
            id: DeviceId::new(master),
            spec: SampleSpec::hw_default(),
        };
        Box::new(Passthrough {
            core: IoCore::new(DeviceId::new(id), "layer", SampleSpec::hw_default(), Some(master)),
        })
    }

    /// Leaf that counts the rewinds reaching it
    struct RewindCounter {
        core: IoCore,
        rewound: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl DeviceHandler for RewindCounter {
        fn core(&self) -> &IoCore {
            &self.core
        }
        fn core_mut(&mut self) -> &mut IoCore {
            &mut self.core
        }
        fn process_message(&mut self, ctx: &mut IoContext<'_>, op: Op) -> DispatchResult {
            self.core.process_generic(ctx, op)
        }
        fn request_rewind(&mut self, _ctx: &mut IoContext<'_>, nbytes: usize) -> usize {
            self.rewound.fetch_add(nbytes, Ordering::SeqCst);
            nbytes
        }
    }

    fn rewinding_layer(id: usize, master: usize) -> Box<dyn DeviceHandler> {
        let master = MasterRef {
            id: DeviceId::new(master),
            spec: SampleSpec::hw_default(),
        };
        let core = IoCore::new(DeviceId::new(id), "layer", SampleSpec::hw_default(), Some(master))
            .with_max_rewind(4096);
        Box::new(Passthrough { core })
    }

    fn flag() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn test_unknown_opcode_falls_through() {
        let mut plane = plane();
        plane.attach(DeviceId::new(0), leaf(0, 0), flag()).unwrap();

        let result = plane.dispatch(DeviceId::new(0), Op::ResetEchoReference);
        assert!(matches!(result, Err(DispatchError::Unsupported("ResetEchoReference"))));
    }

    #[test]
    fn test_latency_recurses_through_masters() {
        let mut plane = plane();
        plane.attach(DeviceId::new(0), leaf(0, 7_000), flag()).unwrap();
        plane.attach(DeviceId::new(1), passthrough(1, 0), flag()).unwrap();
        plane.attach(DeviceId::new(2), passthrough(2, 1), flag()).unwrap();

        match plane.dispatch(DeviceId::new(2), Op::GetLatency) {
            Ok(Reply::Latency(usec)) => assert_eq!(usec, 7_000),
            other => panic!("unexpected reply: {:?}", other.map(|r| r.name())),
        }
        // Every slot is back in place afterwards
        assert_eq!(plane.attached(), 3);
    }

    #[test]
    fn test_quiesced_master_counts_as_zero() {
        let mut plane = plane();
        let master_flag = flag();
        plane.attach(DeviceId::new(0), leaf(0, 7_000), master_flag.clone()).unwrap();
        plane.attach(DeviceId::new(1), passthrough(1, 0), flag()).unwrap();

        master_flag.store(true, Ordering::Release);
        match plane.dispatch(DeviceId::new(1), Op::GetLatency) {
            Ok(Reply::Latency(usec)) => assert_eq!(usec, 0),
            other => panic!("unexpected reply: {:?}", other.map(|r| r.name())),
        }
    }

    #[test]
    fn test_attach_detach() {
        let mut plane = plane();
        assert_eq!(
            plane.attach(DeviceId::new(9), leaf(9, 0), flag()).err(),
            Some(DispatchError::DeviceGone(DeviceId::new(9)))
        );
        plane.attach(DeviceId::new(1), leaf(1, 0), flag()).unwrap();
        assert!(matches!(
            plane.attach(DeviceId::new(1), leaf(1, 0), flag()),
            Err(DispatchError::Malformed(_))
        ));

        assert!(matches!(plane.detach(DeviceId::new(1)), Ok(Reply::Detached(_))));
        assert_eq!(
            plane.detach(DeviceId::new(1)).err(),
            Some(DispatchError::DeviceGone(DeviceId::new(1)))
        );
    }

    #[test]
    fn test_rewind_reaches_master_through_deferred_queue() {
        let mut plane = plane_with_deferred(1);
        let rewound = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = RewindCounter {
            core: IoCore::new(DeviceId::new(0), "hw", SampleSpec::hw_default(), None),
            rewound: rewound.clone(),
        };
        plane.attach(DeviceId::new(0), Box::new(counter), flag()).unwrap();
        plane.attach(DeviceId::new(1), rewinding_layer(1, 0), flag()).unwrap();

        match plane.dispatch(DeviceId::new(1), Op::RequestRewind(1920)) {
            Ok(Reply::Rewound(n)) => assert_eq!(n, 1920),
            other => panic!("unexpected reply: {:?}", other.map(|r| r.name())),
        }
        assert_eq!(rewound.load(Ordering::SeqCst), 1920);
    }

    #[test]
    fn test_rewind_not_accepted_when_deferred_queue_full() {
        let mut plane = plane_with_deferred(0);
        let rewound = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = RewindCounter {
            core: IoCore::new(DeviceId::new(0), "hw", SampleSpec::hw_default(), None),
            rewound: rewound.clone(),
        };
        plane.attach(DeviceId::new(0), Box::new(counter), flag()).unwrap();
        plane.attach(DeviceId::new(1), rewinding_layer(1, 0), flag()).unwrap();

        match plane.dispatch(DeviceId::new(1), Op::RequestRewind(1920)) {
            Ok(Reply::Rewound(n)) => assert_eq!(n, 0),
            other => panic!("unexpected reply: {:?}", other.map(|r| r.name())),
        }
        assert_eq!(rewound.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_pump_answers_reply_slots() {
        let (mut tx, rx) = message_channel(8);
        let bus = EventBus::new(8);
        let mut plane = DataPlane::new(rx, bus.sender(), Box::new(ManualClock::new(0)), 4, 8);
        plane.attach(DeviceId::new(0), leaf(0, 1_234), flag()).unwrap();

        let (reply_tx, mut reply_rx) = tokio::sync::oneshot::channel();
        tx.push(Message {
            target: DeviceId::new(0),
            op: Op::GetLatency,
            reply: Some(reply_tx),
        })
        .ok()
        .unwrap();

        assert_eq!(plane.pump(), 1);
        match reply_rx.try_recv() {
            Ok(Ok(Reply::Latency(usec))) => assert_eq!(usec, 1_234),
            _ => panic!("expected a latency reply"),
        }
    }
}
