//! Paired state transitions and lifecycle edges
//!
//! A transition runs in two phases so the owner can ask the master in between:
//!
//! 1. [`StateMachine::prepare`] validates the request. Requesting the current
//!    state is "already satisfied" (`Ok(None)`), skipping a step is an error.
//! 2. The owner forwards the transition to the master. If the master refuses,
//!    the owner stops here and nothing local has changed.
//! 3. [`StateMachine::commit`] updates the local state and reports the
//!    lifecycle edges to a [`TransitionObserver`] in a fixed order:
//!    - entering Running: echo reset, state applied, then CallBegin
//!    - leaving Running: CallEnd, then state applied (buffer teardown)
//!
//! Only called from the control plane, one transition per device at a time.

use super::DeviceState;
use crate::error::StateError;

/// A validated change from one state to a neighbouring one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: DeviceState,
    pub to: DeviceState,
}

impl Transition {
    pub fn enters_running(&self) -> bool {
        !self.from.is_running() && self.to.is_running()
    }

    pub fn leaves_running(&self) -> bool {
        self.from.is_running() && !self.to.is_running()
    }
}

/// Result of a transition request that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Changed(Transition),
    /// Requested state equals the current one, nothing happened
    AlreadySatisfied,
    /// Master link is being torn down, request ignored
    MasterDetached,
}

impl TransitionOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, TransitionOutcome::Changed(_))
    }
}

/// Call lifecycle notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEdge {
    CallBegin,
    CallEnd,
}

/// Receives the side effects of a committed transition
pub trait TransitionObserver {
    /// Reset echo/reference buffering (before CallBegin)
    fn before_call_begin(&mut self) {}

    /// The local state changed
    fn state_applied(&mut self, _transition: Transition) {}

    /// CallBegin or CallEnd
    fn lifecycle(&mut self, _edge: LifecycleEdge) {}
}

/// Lifecycle state of one device
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: DeviceState,
    call_session: bool,
}

impl StateMachine {
    /// New machine in `Idle`; `call_session` enables CallBegin/CallEnd
    pub fn new(call_session: bool) -> Self {
        Self {
            state: DeviceState::Idle,
            call_session,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_call_session(&self) -> bool {
        self.call_session
    }

    /// Validate a request
    ///
    /// `Ok(None)` means the request is already satisfied.
    pub fn prepare(&self, requested: DeviceState) -> Result<Option<Transition>, StateError> {
        if requested == self.state {
            return Ok(None);
        }
        if !self.state.is_adjacent(requested) {
            return Err(StateError::InvalidTransition {
                from: self.state,
                to: requested,
            });
        }
        Ok(Some(Transition {
            from: self.state,
            to: requested,
        }))
    }

    /// Apply a prepared transition after the master accepted it
    pub fn commit<O>(&mut self, transition: Transition, observer: &mut O) -> TransitionOutcome
    where
        O: TransitionObserver + ?Sized,
    {
        debug_assert_eq!(transition.from, self.state, "stale transition");
        self.state = transition.to;

        if transition.enters_running() {
            if self.call_session {
                observer.before_call_begin();
            }
            observer.state_applied(transition);
            if self.call_session {
                observer.lifecycle(LifecycleEdge::CallBegin);
            }
        } else if transition.leaves_running() {
            if self.call_session {
                observer.lifecycle(LifecycleEdge::CallEnd);
            }
            observer.state_applied(transition);
        } else {
            observer.state_applied(transition);
        }

        TransitionOutcome::Changed(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum Step {
        EchoReset,
        Applied(DeviceState),
        Edge(LifecycleEdge),
        Master(DeviceState),
    }

    #[derive(Default)]
    struct Recorder {
        steps: Vec<Step>,
    }

    impl TransitionObserver for Recorder {
        fn before_call_begin(&mut self) {
            self.steps.push(Step::EchoReset);
        }
        fn state_applied(&mut self, t: Transition) {
            self.steps.push(Step::Applied(t.to));
        }
        fn lifecycle(&mut self, edge: LifecycleEdge) {
            self.steps.push(Step::Edge(edge));
        }
    }

    /// prepare → master → commit, the way the pipeline drives it
    fn request(
        machine: &mut StateMachine,
        rec: &mut Recorder,
        to: DeviceState,
        master_accepts: bool,
    ) -> Result<TransitionOutcome, StateError> {
        let Some(t) = machine.prepare(to)? else {
            return Ok(TransitionOutcome::AlreadySatisfied);
        };
        rec.steps.push(Step::Master(to));
        if !master_accepts {
            return Err(StateError::BackendRefused {
                device: "master".into(),
                to,
                reason: "refused".into(),
            });
        }
        Ok(machine.commit(t, rec))
    }

    fn edges(rec: &Recorder) -> Vec<LifecycleEdge> {
        rec.steps
            .iter()
            .filter_map(|s| match s {
                Step::Edge(e) => Some(*e),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_full_cycle_forwards_before_local_change() {
        let mut machine = StateMachine::new(true);
        let mut rec = Recorder::default();
        let path = [
            DeviceState::Suspended,
            DeviceState::Active,
            DeviceState::Running,
            DeviceState::Active,
            DeviceState::Suspended,
            DeviceState::Idle,
        ];

        for to in path {
            let before = rec.steps.len();
            let outcome = request(&mut machine, &mut rec, to, true).unwrap();
            assert!(outcome.changed());
            assert_eq!(rec.steps[before], Step::Master(to));
            assert_eq!(machine.state(), to);
        }

        assert_eq!(edges(&rec), vec![LifecycleEdge::CallBegin, LifecycleEdge::CallEnd]);
    }

    #[test]
    fn test_refused_master_leaves_state() {
        let mut machine = StateMachine::new(true);
        let mut rec = Recorder::default();
        request(&mut machine, &mut rec, DeviceState::Suspended, true).unwrap();
        request(&mut machine, &mut rec, DeviceState::Active, true).unwrap();

        let err = request(&mut machine, &mut rec, DeviceState::Running, false).unwrap_err();
        assert!(matches!(err, StateError::BackendRefused { .. }));
        assert_eq!(machine.state(), DeviceState::Active);
        assert!(edges(&rec).is_empty());
    }

    #[test]
    fn test_already_satisfied_emits_nothing() {
        let mut machine = StateMachine::new(true);
        let mut rec = Recorder::default();
        for to in [DeviceState::Suspended, DeviceState::Active, DeviceState::Running] {
            request(&mut machine, &mut rec, to, true).unwrap();
        }
        let steps = rec.steps.len();

        let outcome = request(&mut machine, &mut rec, DeviceState::Running, true).unwrap();
        assert_eq!(outcome, TransitionOutcome::AlreadySatisfied);
        assert_eq!(rec.steps.len(), steps);
        assert_eq!(edges(&rec), vec![LifecycleEdge::CallBegin]);
    }

    #[test]
    fn test_skipping_active_is_rejected() {
        let mut machine = StateMachine::new(false);
        let mut rec = Recorder::default();
        request(&mut machine, &mut rec, DeviceState::Suspended, true).unwrap();

        let err = request(&mut machine, &mut rec, DeviceState::Running, true).unwrap_err();
        assert_eq!(
            err,
            StateError::InvalidTransition {
                from: DeviceState::Suspended,
                to: DeviceState::Running
            }
        );
        // Master was never asked
        assert!(!rec.steps.contains(&Step::Master(DeviceState::Running)));
    }

    #[test]
    fn test_edge_ordering() {
        let mut machine = StateMachine::new(true);
        let mut rec = Recorder::default();
        for to in [DeviceState::Suspended, DeviceState::Active] {
            request(&mut machine, &mut rec, to, true).unwrap();
        }
        rec.steps.clear();

        request(&mut machine, &mut rec, DeviceState::Running, true).unwrap();
        assert_eq!(
            rec.steps,
            vec![
                Step::Master(DeviceState::Running),
                Step::EchoReset,
                Step::Applied(DeviceState::Running),
                Step::Edge(LifecycleEdge::CallBegin),
            ]
        );

        rec.steps.clear();
        request(&mut machine, &mut rec, DeviceState::Active, true).unwrap();
        assert_eq!(
            rec.steps,
            vec![
                Step::Master(DeviceState::Active),
                Step::Edge(LifecycleEdge::CallEnd),
                Step::Applied(DeviceState::Active),
            ]
        );
    }

    #[test]
    fn test_plumbing_layer_has_no_call_edges() {
        let mut machine = StateMachine::new(false);
        let mut rec = Recorder::default();
        for to in [
            DeviceState::Suspended,
            DeviceState::Active,
            DeviceState::Running,
            DeviceState::Active,
        ] {
            request(&mut machine, &mut rec, to, true).unwrap();
        }
        assert!(edges(&rec).is_empty());
        assert!(!rec.steps.contains(&Step::EchoReset));
    }
}
