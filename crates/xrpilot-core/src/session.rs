//! Session lifecycle state machine.
//!
//! Phases follow the runtime's session-state events:
//! - IDLE: session exists, runtime not ready for frames
//! - READY: runtime asked us to begin; the session is begun immediately
//! - RUNNING: begun, frame loop active (synchronized/visible/focused)
//! - STOPPING: runtime asked us to end; the session is ended immediately
//! - EXITING / LOSS_PENDING: terminal, the caller must tear down

use tracing::{debug, info, trace, warn};

use crate::runtime::{RuntimeEvent, XrRuntime};
use crate::types::{InstanceHandle, SessionHandle, SessionState, ViewConfigurationType};
use crate::{XrError, XrResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Ready,
    Running,
    Stopping,
    Exiting,
    LossPending,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Exiting | SessionPhase::LossPending)
    }
}

/// Runtime call a state change requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    BeginSession,
    EndSession,
    Exit,
    Stay,
}

#[derive(Debug, Default)]
pub struct SessionStateMachine {
    session: Option<SessionHandle>,
    phase: SessionPhase,
    runtime_state: SessionState,
    running: bool,
    exit_requested: bool,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a freshly created session.
    pub fn track(&mut self, session: SessionHandle) {
        *self = Self {
            session: Some(session),
            ..Self::default()
        };
    }

    pub fn session(&self) -> Option<SessionHandle> {
        self.session
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn runtime_state(&self) -> SessionState {
        self.runtime_state
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Sticky once set: terminal phases are never left.
    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    fn check_identity(&self, event_session: Option<SessionHandle>) -> XrResult<()> {
        match event_session {
            Some(received) if Some(received) != self.session => {
                Err(XrError::UnexpectedSessionEvent {
                    expected: self.session.map_or(0, SessionHandle::into_raw),
                    received: received.into_raw(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Record a runtime-reported state and return the call it requires.
    pub fn on_state_changed(&mut self, state: SessionState) -> Transition {
        self.runtime_state = state;
        if self.phase.is_terminal() {
            return Transition::Stay;
        }
        match state {
            SessionState::Idle => {
                self.phase = SessionPhase::Idle;
                Transition::Stay
            }
            SessionState::Ready => {
                self.phase = SessionPhase::Ready;
                Transition::BeginSession
            }
            SessionState::Synchronized | SessionState::Visible | SessionState::Focused => {
                if self.running {
                    self.phase = SessionPhase::Running;
                }
                Transition::Stay
            }
            SessionState::Stopping => {
                self.phase = SessionPhase::Stopping;
                Transition::EndSession
            }
            SessionState::Exiting => {
                self.phase = SessionPhase::Exiting;
                self.exit_requested = true;
                Transition::Exit
            }
            SessionState::LossPending => {
                self.phase = SessionPhase::LossPending;
                self.exit_requested = true;
                Transition::Exit
            }
            SessionState::Unknown => Transition::Stay,
        }
    }

    fn tracked_session(&self) -> XrResult<SessionHandle> {
        self.session
            .ok_or(XrError::InvalidState("no session is being tracked"))
    }

    /// Drain runtime events, beginning/ending the session as requested.
    /// Returns whether the loop should exit.
    pub fn poll_events<R: XrRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        instance: InstanceHandle,
        view_configuration_type: ViewConfigurationType,
    ) -> XrResult<bool> {
        while let Some(event) = runtime.poll_event(instance)? {
            self.check_identity(event.session())?;
            match event {
                RuntimeEvent::EventsLost { count } => {
                    warn!(count, "runtime dropped events");
                }
                RuntimeEvent::InstanceLossPending { loss_time } => {
                    warn!(loss_time = loss_time.as_nanos(), "instance loss pending");
                    self.phase = SessionPhase::LossPending;
                    self.exit_requested = true;
                    return Ok(true);
                }
                RuntimeEvent::SessionStateChanged { state, time, .. } => {
                    info!(?state, time = time.as_nanos(), "session state changed");
                    match self.on_state_changed(state) {
                        Transition::BeginSession => {
                            let session = self.tracked_session()?;
                            runtime.begin_session(session, view_configuration_type)?;
                            self.running = true;
                            self.phase = SessionPhase::Running;
                            info!(view_configuration = %view_configuration_type, "session begun");
                        }
                        Transition::EndSession => {
                            let session = self.tracked_session()?;
                            runtime.end_session(session)?;
                            self.running = false;
                            info!("session ended");
                        }
                        Transition::Exit => {
                            info!(phase = ?self.phase, "exit requested by runtime");
                        }
                        Transition::Stay => {}
                    }
                }
                RuntimeEvent::InteractionProfileChanged { .. } => {
                    info!("interaction profile changed");
                }
                RuntimeEvent::ReferenceSpaceChangePending { kind, .. } => {
                    info!(?kind, "reference space change pending");
                }
                RuntimeEvent::Other => {
                    trace!("ignoring runtime event");
                }
            }
        }
        debug!(phase = ?self.phase, running = self.running, "event queue drained");
        Ok(self.exit_requested)
    }

    /// Forget the session after it was destroyed.
    pub fn clear(&mut self) {
        self.session = None;
        self.running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockRuntime, RuntimeCall};
    use crate::types::Time;

    const STEREO: ViewConfigurationType = ViewConfigurationType::PrimaryStereo;

    fn tracked() -> (MockRuntime, InstanceHandle, SessionStateMachine) {
        let mut runtime = MockRuntime::new();
        let (instance, session) = runtime.quick_session();
        let mut machine = SessionStateMachine::new();
        machine.track(session);
        (runtime, instance, machine)
    }

    #[test]
    fn test_state_transitions_are_pure() {
        let mut machine = SessionStateMachine::new();
        assert_eq!(machine.on_state_changed(SessionState::Idle), Transition::Stay);
        assert_eq!(
            machine.on_state_changed(SessionState::Ready),
            Transition::BeginSession
        );
        assert_eq!(machine.phase(), SessionPhase::Ready);
        assert_eq!(
            machine.on_state_changed(SessionState::Stopping),
            Transition::EndSession
        );
        assert_eq!(machine.on_state_changed(SessionState::Exiting), Transition::Exit);
        assert!(machine.exit_requested());
        // Terminal phases are never left.
        assert_eq!(
            machine.on_state_changed(SessionState::Ready),
            Transition::Stay
        );
        assert_eq!(machine.phase(), SessionPhase::Exiting);
    }

    #[test]
    fn test_ready_begins_and_stopping_ends() {
        let (mut runtime, instance, mut machine) = tracked();
        runtime.push_state(SessionState::Idle);
        runtime.push_state(SessionState::Ready);
        assert!(!machine.poll_events(&mut runtime, instance, STEREO).unwrap());
        assert!(machine.is_running());
        assert_eq!(machine.phase(), SessionPhase::Running);
        assert_eq!(runtime.count(RuntimeCall::BeginSession), 1);

        runtime.push_state(SessionState::Synchronized);
        runtime.push_state(SessionState::Focused);
        runtime.push_state(SessionState::Stopping);
        assert!(!machine.poll_events(&mut runtime, instance, STEREO).unwrap());
        assert!(!machine.is_running());
        assert_eq!(runtime.count(RuntimeCall::EndSession), 1);

        runtime.push_state(SessionState::Idle);
        runtime.push_state(SessionState::Exiting);
        assert!(machine.poll_events(&mut runtime, instance, STEREO).unwrap());
        assert_eq!(machine.phase(), SessionPhase::Exiting);
        // Exit stays requested on later polls.
        assert!(machine.poll_events(&mut runtime, instance, STEREO).unwrap());
    }

    #[test]
    fn test_loss_pending_is_terminal() {
        let (mut runtime, instance, mut machine) = tracked();
        runtime.push_state(SessionState::LossPending);
        assert!(machine.poll_events(&mut runtime, instance, STEREO).unwrap());
        assert_eq!(machine.phase(), SessionPhase::LossPending);
    }

    #[test]
    fn test_instance_loss_stops_draining() {
        let (mut runtime, instance, mut machine) = tracked();
        runtime.push_event(RuntimeEvent::InstanceLossPending {
            loss_time: Time::from_nanos(5),
        });
        runtime.push_state(SessionState::Ready);
        assert!(machine.poll_events(&mut runtime, instance, STEREO).unwrap());
        assert_eq!(runtime.pending_events(), 1);
        assert_eq!(runtime.count(RuntimeCall::BeginSession), 0);
    }

    #[test]
    fn test_events_lost_is_not_fatal() {
        let (mut runtime, instance, mut machine) = tracked();
        runtime.push_event(RuntimeEvent::EventsLost { count: 4 });
        runtime.push_state(SessionState::Ready);
        assert!(!machine.poll_events(&mut runtime, instance, STEREO).unwrap());
        assert!(machine.is_running());
    }

    #[test]
    fn test_foreign_session_event_is_fatal() {
        let (mut runtime, instance, mut machine) = tracked();
        runtime.push_event(RuntimeEvent::SessionStateChanged {
            session: Some(SessionHandle::from_raw(0xdead)),
            state: SessionState::Ready,
            time: Time::default(),
        });
        let result = machine.poll_events(&mut runtime, instance, STEREO);
        assert!(matches!(
            result,
            Err(XrError::UnexpectedSessionEvent { received: 0xdead, .. })
        ));
        assert_eq!(runtime.count(RuntimeCall::BeginSession), 0);
    }

    #[test]
    fn test_null_session_events_are_accepted() {
        let (mut runtime, instance, mut machine) = tracked();
        runtime.push_event(RuntimeEvent::ReferenceSpaceChangePending {
            session: None,
            kind: None,
        });
        runtime.push_event(RuntimeEvent::Other);
        assert!(!machine.poll_events(&mut runtime, instance, STEREO).unwrap());
        assert_eq!(runtime.pending_events(), 0);
    }
}
