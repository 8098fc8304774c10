//! State changes on the control plane
//!
//! A request on a virtual layer is validated, forwarded to the master (which
//! recursively forwards to its own master), and only applied locally once the
//! whole chain below accepted it. Hardware devices ask their backend instead.

use crate::device::{
    DeviceState, LifecycleEdge, Role, Transition, TransitionObserver, TransitionOutcome,
};
use crate::dispatch::{Dispatcher, Op};
use crate::error::StateError;
use crate::events::{EventBus, LifecycleEvent, PipelineEvent};
use crate::types::DeviceId;

use super::{DeviceRecord, Pipeline};

/// Turns committed transitions into data-plane messages and events
struct PipelineObserver<'a> {
    dispatcher: &'a mut Dispatcher,
    events: &'a EventBus,
    id: DeviceId,
    name: &'a str,
    role: Role,
}

impl PipelineObserver<'_> {
    fn post(&mut self, op: Op) {
        let name = op.name();
        if let Err(e) = self.dispatcher.post(self.id, op) {
            log::warn!("[STATE] {}: failed to post {}: {}", self.name, name, e);
        }
    }
}

impl TransitionObserver for PipelineObserver<'_> {
    fn before_call_begin(&mut self) {
        if self.role.resets_echo_reference() {
            self.post(Op::ResetEchoReference);
        }
    }

    fn state_applied(&mut self, transition: Transition) {
        self.post(Op::SetState(transition.to));
        log::debug!("[STATE] {}: {:?} -> {:?}", self.name, transition.from, transition.to);
        self.events.publish(PipelineEvent::StateChanged {
            device: self.id,
            from: transition.from,
            to: transition.to,
        });
    }

    fn lifecycle(&mut self, edge: LifecycleEdge) {
        log::info!("[STATE] {}: {:?}", self.name, edge);
        self.events.publish(PipelineEvent::Lifecycle(LifecycleEvent {
            edge,
            device: self.id,
            name: self.name.to_string(),
            direction: self.role.direction(),
        }));
    }
}

impl Pipeline {
    /// Move `id` one step to `requested`
    ///
    /// The master chain is moved first; a refusal anywhere below leaves this
    /// device unchanged and fires no lifecycle edge. Moving down first takes
    /// every layer wrapping `id` down to `requested`, so no wrapper is left
    /// above its master.
    pub fn set_state(
        &mut self,
        id: DeviceId,
        requested: DeviceState,
    ) -> Result<TransitionOutcome, StateError> {
        let record = self.record(id).ok_or(StateError::DeviceNotFound(id))?;
        if let Some(transition) = record.machine.prepare(requested)? {
            if requested < transition.from {
                self.lower_dependents(id, requested)?;
                // A wrapper going down already took this device along
                if self.state(id) == Some(requested) {
                    return Ok(TransitionOutcome::Changed(transition));
                }
            }
        }

        let index = id.index();
        let mut record = self
            .devices
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(StateError::DeviceNotFound(id))?;
        let result = self.transition(&mut record, requested);
        self.devices[index] = Some(record);
        result
    }

    /// Step `id` through every intermediate state until it reaches `target`
    pub fn drive(
        &mut self,
        id: DeviceId,
        target: DeviceState,
    ) -> Result<TransitionOutcome, StateError> {
        let mut outcome = TransitionOutcome::AlreadySatisfied;
        loop {
            let current = self.state(id).ok_or(StateError::DeviceNotFound(id))?;
            let Some(next) = current.step_toward(target) else {
                return Ok(outcome);
            };
            outcome = self.set_state(id, next)?;
            if outcome == TransitionOutcome::MasterDetached {
                return Ok(outcome);
            }
        }
    }

    /// Drive every layer wrapping `id` that sits above `target` down to it
    ///
    /// A wrapper in the middle of its own transition is out of the table and
    /// is skipped.
    fn lower_dependents(&mut self, id: DeviceId, target: DeviceState) -> Result<(), StateError> {
        let dependents: Vec<DeviceId> = self
            .records()
            .filter(|r| r.master == Some(id) && r.machine.state() > target)
            .map(|r| r.id)
            .collect();
        for dependent in dependents {
            log::debug!("[STATE] {} goes to {:?} ahead of its master {}", dependent, target, id);
            self.drive(dependent, target)?;
        }
        Ok(())
    }

    fn transition(
        &mut self,
        record: &mut DeviceRecord,
        requested: DeviceState,
    ) -> Result<TransitionOutcome, StateError> {
        let Some(transition) = record.machine.prepare(requested)? else {
            return Ok(TransitionOutcome::AlreadySatisfied);
        };

        if let Some(backend) = record.backend.as_mut() {
            backend
                .set_state(requested)
                .map_err(|reason| StateError::BackendRefused {
                    device: record.name.clone(),
                    to: requested,
                    reason,
                })?;
        } else {
            let Some(master) = record.master.filter(|m| self.live_record(*m).is_some()) else {
                log::debug!("[STATE] {}: master detached, ignoring {:?}", record.name, requested);
                return Ok(TransitionOutcome::MasterDetached);
            };
            if self.drive(master, requested)? == TransitionOutcome::MasterDetached {
                return Ok(TransitionOutcome::MasterDetached);
            }
        }

        let mut observer = PipelineObserver {
            dispatcher: &mut self.dispatcher,
            events: &self.events,
            id: record.id,
            name: &record.name,
            role: record.role,
        };
        Ok(record.machine.commit(transition, &mut observer))
    }
}
