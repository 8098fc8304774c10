//! Pipeline notifications
//!
//! Both planes publish into one bounded [`EventBus`]. Publishing never
//! blocks: when nobody drains the bus and it fills up, new events are
//! dropped and logged. Receivers are clones of one channel end, so each event
//! reaches exactly one of them.

use crossbeam::channel::{Receiver, Sender, TrySendError};

use crate::device::{DeviceState, LifecycleEdge};
use crate::types::{DeviceId, Direction, InputId};

/// CallBegin/CallEnd of a VoIP session device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub edge: LifecycleEdge,
    pub device: DeviceId,
    pub name: String,
    pub direction: Direction,
}

/// Everything observers can learn about the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Call session started or ended
    Lifecycle(LifecycleEvent),

    /// A committed state change
    StateChanged {
        device: DeviceId,
        from: DeviceState,
        to: DeviceState,
    },

    /// Admission control refused an input that would loop audio back
    LoopbackDenied { device: DeviceId, input: InputId },

    DeviceCreated { device: DeviceId, name: String },

    DeviceRemoved { device: DeviceId, name: String },
}

/// Sender half handed to the data plane
pub type EventSender = Sender<PipelineEvent>;

/// Publish without blocking; returns false if the event was dropped
pub fn emit(sender: &EventSender, event: PipelineEvent) -> bool {
    match sender.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(event)) => {
            log::debug!("Event bus full, dropping {:?}", event);
            false
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

/// Bounded event channel shared by the control and data planes
pub struct EventBus {
    sender: Sender<PipelineEvent>,
    receiver: Receiver<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam::channel::bounded(capacity.max(1));
        Self { sender, receiver }
    }

    /// Sender for publishing from another thread
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        self.receiver.clone()
    }

    pub fn publish(&self, event: PipelineEvent) -> bool {
        emit(&self.sender, event)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_bus() {
        let bus = EventBus::new(16);
        let rx = bus.subscribe();

        assert!(bus.publish(PipelineEvent::DeviceCreated {
            device: DeviceId::new(3),
            name: "sink.voip".to_string(),
        }));

        match rx.recv().unwrap() {
            PipelineEvent::DeviceCreated { device, name } => {
                assert_eq!(device, DeviceId::new(3));
                assert_eq!(name, "sink.voip");
            }
            other => panic!("Wrong event type: {:?}", other),
        }
    }

    #[test]
    fn test_full_bus_drops_instead_of_blocking() {
        let bus = EventBus::new(1);
        let event = PipelineEvent::LoopbackDenied {
            device: DeviceId::new(0),
            input: InputId::new(1),
        };
        assert!(bus.publish(event.clone()));
        assert!(!bus.publish(event));
        assert_eq!(bus.subscribe().len(), 1);
    }
}
