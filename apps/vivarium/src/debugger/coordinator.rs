//! The breakpoint coordinator state machine.
//!
//! Keeps the execution thread from ever being user-visibly suspended outside
//! user code by dynamically installing and removing boundary instrumentation,
//! and relays thread-state transitions onto typed event buses. Unrecognised
//! halts are resumed toward the next boundary rather than treated as fatal:
//! robustness under unanticipated stops beats precision.

use std::sync::Arc;

use event_bus::EventBus;
use tracing::{debug, warn};

use super::{
    BreakpointTag, DebugControl, DebugEvent, MethodLocation, PickEvent, SimulationEvent,
    StackFrame, ThreadId, VmState, WorldEvent,
};

/// Field names read at the data-extraction breakpoints. Part of the contract
/// with the simulation runtime, like the method locations below.
const WORLD_FIELD: &str = "world";
const ACTOR_NAMES_FIELD: &str = "names";
const PICK_ID_FIELD: &str = "pick_id";
const PICK_ACTORS_FIELD: &str = "actor_picks";
const PICK_WORLD_FIELD: &str = "world_pick";

/// The fixed locations the coordinator instruments inside the simulation
/// runtime, resolved to (class, method) identity once at construction.
#[derive(Debug, Clone)]
pub struct RuntimeLocations {
    pub simulation_class: String,
    /// Entry point of the execution thread; its breakpoint identifies the
    /// thread at startup.
    pub run_method: String,
    /// The method the execution thread parks in while paused.
    pub pause_method: String,
    /// Hit when the execution thread leaves the pause wait.
    pub resume_method: String,
    /// The boundary call sites that invoke user-authored code.
    pub invoke_methods: Vec<String>,
    /// Invocation shims compiled on the fly count as boundaries too.
    pub shell_class_prefix: String,
    pub world_handler_class: String,
    pub world_initialising_method: String,
    pub world_changed_method: String,
    pub world_instantiation_error_method: String,
    pub name_actors: MethodLocation,
    pub pick_results: MethodLocation,
}

impl Default for RuntimeLocations {
    fn default() -> Self {
        Self {
            simulation_class: "vivarium.runtime.Simulation".into(),
            run_method: "run".into(),
            pause_method: "paused".into(),
            resume_method: "resume_running".into(),
            invoke_methods: vec![
                "act_world".into(),
                "act_actor".into(),
                "new_instance".into(),
                "run_queued_tasks".into(),
                "world_started".into(),
                "world_stopped".into(),
            ],
            shell_class_prefix: "__Shell".into(),
            world_handler_class: "vivarium.runtime.WorldHandler".into(),
            world_initialising_method: "set_initialising_world".into(),
            world_changed_method: "world_changed".into(),
            world_instantiation_error_method: "world_instantiation_error".into(),
            name_actors: MethodLocation::new("vivarium.runtime.WorldBridge", "name_actors"),
            pick_results: MethodLocation::new("vivarium.runtime.PickHelper", "picked"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// No simulation process, or its instrumentation is gone.
    Unlaunched,
    /// Fixed breakpoints installed; waiting for the run breakpoint to
    /// identify the execution thread.
    AwaitingThreadId,
    /// Thread known; boundary instrumentation off, thread in user code or
    /// idle.
    Armed,
    /// Running through internal framework frames with boundary
    /// instrumentation on.
    SteppingInternal,
    HaltedInUserCode,
    HaltedAtPause,
}

/// What the coordinator did with an event; returned for observability and
/// tests, the side effects have already happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Fixed instrumentation installed after the process reached idle.
    Launched,
    /// The run breakpoint identified the execution thread.
    ThreadIdentified,
    /// An internal stop was resumed without surfacing.
    ResumedInternal,
    /// Stepped from a boundary entry into user code.
    SteppedTowardUserCode,
    /// Ran forward to the next boundary with instrumentation armed.
    RanToBoundary,
    /// Data extracted and the thread resumed; no state change.
    DataExtracted,
    HaltedInUserCode,
    HaltedAtPause,
    /// The process went away; coordinator reset.
    VmReset,
    /// Event was not for us (other thread, redundant state change).
    Ignored,
}

pub struct BreakpointCoordinator {
    control: Arc<dyn DebugControl>,
    locations: RuntimeLocations,
    state: CoordinatorState,
    execution_thread: Option<ThreadId>,
    boundaries_installed: bool,
    has_launched: bool,
    simulation_events: EventBus<SimulationEvent>,
    world_events: EventBus<WorldEvent>,
    pick_events: EventBus<PickEvent>,
}

impl BreakpointCoordinator {
    pub fn new(control: Arc<dyn DebugControl>, locations: RuntimeLocations) -> Self {
        Self {
            control,
            locations,
            state: CoordinatorState::Unlaunched,
            execution_thread: None,
            boundaries_installed: false,
            has_launched: false,
            simulation_events: EventBus::default(),
            world_events: EventBus::default(),
            pick_events: EventBus::default(),
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn simulation_events(&self) -> &EventBus<SimulationEvent> {
        &self.simulation_events
    }

    pub fn world_events(&self) -> &EventBus<WorldEvent> {
        &self.world_events
    }

    pub fn pick_events(&self) -> &EventBus<PickEvent> {
        &self.pick_events
    }

    /// Suspend the execution thread (the user asked for a halt). The
    /// resulting halt event flows back through [`Self::handle_event`].
    pub fn halt_execution_thread(&self) {
        if let Some(thread) = self.execution_thread {
            self.control.suspend(thread);
        }
    }

    /// Resume the execution thread if a reset left it suspended.
    pub fn resume_execution_thread(&self) {
        if let Some(thread) = self.execution_thread {
            self.control.resume(thread);
        }
    }

    pub fn handle_event(&mut self, event: &DebugEvent) -> EventOutcome {
        match event {
            DebugEvent::VmStateChanged { state } => self.handle_vm_state(*state),
            DebugEvent::Resumed { thread } => self.handle_resumed(*thread),
            DebugEvent::Halted {
                thread,
                breakpoint,
                stack,
            } => self.handle_halt(*thread, *breakpoint, stack),
        }
    }

    fn handle_vm_state(&mut self, state: VmState) -> EventOutcome {
        match state {
            VmState::NotReady => {
                // All instrumentation died with the process; a relaunched
                // process must re-register everything.
                self.state = CoordinatorState::Unlaunched;
                self.execution_thread = None;
                self.boundaries_installed = false;
                self.has_launched = false;
                self.simulation_events.publish(SimulationEvent::VmTerminated);
                EventOutcome::VmReset
            }
            VmState::Idle => {
                if self.has_launched {
                    return EventOutcome::Ignored;
                }
                self.has_launched = true;
                self.install_fixed_breakpoints();
                self.state = CoordinatorState::AwaitingThreadId;
                EventOutcome::Launched
            }
        }
    }

    fn handle_resumed(&mut self, thread: ThreadId) -> EventOutcome {
        if self.execution_thread != Some(thread) {
            return EventOutcome::Ignored;
        }
        match self.state {
            CoordinatorState::HaltedInUserCode => {
                self.simulation_events.publish(SimulationEvent::DebugResumed);
                self.state = CoordinatorState::Armed;
                EventOutcome::ResumedInternal
            }
            CoordinatorState::HaltedAtPause => {
                self.state = CoordinatorState::Armed;
                EventOutcome::ResumedInternal
            }
            _ => EventOutcome::Ignored,
        }
    }

    fn handle_halt(
        &mut self,
        thread: ThreadId,
        breakpoint: Option<BreakpointTag>,
        stack: &[StackFrame],
    ) -> EventOutcome {
        // Data-extraction breakpoints first: they apply to any thread and
        // never transition the state machine.
        match breakpoint {
            Some(BreakpointTag::SimulationRun) => {
                // First halt of the execution thread; remember who it is.
                self.execution_thread = Some(thread);
                self.state = CoordinatorState::Armed;
                self.control.resume(thread);
                return EventOutcome::ThreadIdentified;
            }
            Some(BreakpointTag::SimulationResumed) => {
                self.simulation_events
                    .publish(SimulationEvent::StartedRunning);
                self.control.resume(thread);
                return EventOutcome::ResumedInternal;
            }
            Some(BreakpointTag::WorldInitialising) => {
                self.world_events.publish(WorldEvent::Initialising);
                self.control.resume(thread);
                return EventOutcome::DataExtracted;
            }
            Some(BreakpointTag::WorldChanged) => {
                let world = self.control.read_object_field(thread, WORLD_FIELD);
                self.world_events.publish(WorldEvent::Changed(world));
                self.control.resume(thread);
                return EventOutcome::DataExtracted;
            }
            Some(BreakpointTag::WorldInstantiationError) => {
                self.simulation_events
                    .publish(SimulationEvent::WorldInstantiationError);
                self.control.resume(thread);
                return EventOutcome::DataExtracted;
            }
            Some(BreakpointTag::NameActors) => {
                let names = self
                    .control
                    .read_string_array_field(thread, ACTOR_NAMES_FIELD)
                    .unwrap_or_default();
                self.world_events.publish(WorldEvent::ActorsNamed(names));
                self.control.resume(thread);
                return EventOutcome::DataExtracted;
            }
            Some(BreakpointTag::PickResults) => {
                self.extract_pick(thread);
                self.control.resume(thread);
                return EventOutcome::DataExtracted;
            }
            _ => {}
        }

        if self.execution_thread != Some(thread) {
            return EventOutcome::Ignored;
        }

        if breakpoint == Some(BreakpointTag::SimulationPaused) {
            // A deliberate pause is imminent. Strip every coordinator-owned
            // boundary first so the outward-visible stop is never
            // contaminated by leftover instrumentation, then let the thread
            // run into its pause wait.
            self.set_boundaries(false);
            self.simulation_events.publish(SimulationEvent::Paused);
            self.control.resume(thread);
            self.state = CoordinatorState::HaltedAtPause;
            return EventOutcome::HaltedAtPause;
        }

        if stack_touches_boundary(&self.locations, stack) {
            // Control is at or beyond a boundary. Boundary instrumentation
            // must come off either way: stray user breakpoints have to
            // behave normally from here.
            self.set_boundaries(false);
            if breakpoint == Some(BreakpointTag::InvokeBoundary) {
                // About to call user code: step over the threshold.
                self.control.step_into(thread);
                self.state = CoordinatorState::SteppingInternal;
                EventOutcome::SteppedTowardUserCode
            } else if frame_is_boundary(&self.locations, stack, 0) {
                // Just returned from user code into the boundary frame; run
                // forward to the next boundary without surfacing.
                self.run_to_boundary(thread);
                self.state = CoordinatorState::Armed;
                EventOutcome::ResumedInternal
            } else {
                self.state = CoordinatorState::HaltedInUserCode;
                self.simulation_events
                    .publish(SimulationEvent::HaltedInUserCode);
                EventOutcome::HaltedInUserCode
            }
        } else if stack_in_pause_wait(&self.locations, stack) {
            // Parked in the pause wait; nothing to surface.
            self.control.resume(thread);
            EventOutcome::ResumedInternal
        } else {
            // Halted somewhere in framework internals. Never surface this:
            // arm the boundaries and run forward until user code is reached.
            debug!(?breakpoint, "internal halt; running to next boundary");
            self.run_to_boundary(thread);
            self.state = CoordinatorState::SteppingInternal;
            EventOutcome::RanToBoundary
        }
    }

    fn extract_pick(&self, thread: ThreadId) {
        let pick_id = self.control.read_int_field(thread, PICK_ID_FIELD);
        let actors = self.control.read_object_array_field(thread, PICK_ACTORS_FIELD);
        let world = self.control.read_object_field(thread, PICK_WORLD_FIELD);
        match (pick_id, actors) {
            (Some(pick_id), Some(actors)) => {
                self.pick_events.publish(PickEvent {
                    pick_id: pick_id as i32,
                    actors,
                    world,
                });
            }
            _ => warn!("pick breakpoint hit but pick fields were unreadable"),
        }
    }

    fn install_fixed_breakpoints(&mut self) {
        let sim = self.locations.simulation_class.clone();
        let wh = self.locations.world_handler_class.clone();
        let fixed: Vec<(MethodLocation, BreakpointTag)> = vec![
            (
                MethodLocation::new(&sim, &self.locations.run_method),
                BreakpointTag::SimulationRun,
            ),
            (
                MethodLocation::new(&sim, &self.locations.pause_method),
                BreakpointTag::SimulationPaused,
            ),
            (
                MethodLocation::new(&sim, &self.locations.resume_method),
                BreakpointTag::SimulationResumed,
            ),
            (
                MethodLocation::new(&wh, &self.locations.world_initialising_method),
                BreakpointTag::WorldInitialising,
            ),
            (
                MethodLocation::new(&wh, &self.locations.world_changed_method),
                BreakpointTag::WorldChanged,
            ),
            (
                MethodLocation::new(&wh, &self.locations.world_instantiation_error_method),
                BreakpointTag::WorldInstantiationError,
            ),
            (self.locations.name_actors.clone(), BreakpointTag::NameActors),
            (self.locations.pick_results.clone(), BreakpointTag::PickResults),
        ];
        for (location, tag) in fixed {
            if let Err(err) = self.control.install_breakpoint(&location, tag) {
                warn!(%err, "could not install fixed breakpoint");
            }
        }
    }

    /// Install or remove the boundary breakpoints as a set.
    fn set_boundaries(&mut self, installed: bool) {
        if self.boundaries_installed == installed {
            return;
        }
        for method in &self.locations.invoke_methods {
            let location = MethodLocation::new(&self.locations.simulation_class, method);
            let result = if installed {
                self.control
                    .install_breakpoint(&location, BreakpointTag::InvokeBoundary)
            } else {
                self.control
                    .remove_breakpoint(&location, BreakpointTag::InvokeBoundary)
            };
            if let Err(err) = result {
                warn!(%err, installed, "boundary breakpoint toggle failed");
            }
        }
        self.boundaries_installed = installed;
    }

    fn run_to_boundary(&mut self, thread: ThreadId) {
        self.set_boundaries(true);
        self.control.resume(thread);
    }
}

/// True when any frame of the stack belongs to the boundary set, i.e. the
/// thread got into (or through) a call site that invokes user code.
fn stack_touches_boundary(locations: &RuntimeLocations, stack: &[StackFrame]) -> bool {
    (0..stack.len()).any(|index| frame_is_boundary(locations, stack, index))
}

fn frame_is_boundary(locations: &RuntimeLocations, stack: &[StackFrame], index: usize) -> bool {
    let Some(frame) = stack.get(index) else {
        return false;
    };
    if frame.class == locations.simulation_class {
        return locations
            .invoke_methods
            .iter()
            .any(|method| method == &frame.method);
    }
    base_class_name(&frame.class).starts_with(&locations.shell_class_prefix)
}

fn stack_in_pause_wait(locations: &RuntimeLocations, stack: &[StackFrame]) -> bool {
    stack.iter().any(|frame| {
        frame.class == locations.simulation_class && frame.method == locations.pause_method
    })
}

fn base_class_name(class: &str) -> &str {
    class.rsplit('.').next().unwrap_or(class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debugger::{DebugError, ObjectRef};
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum ControlCall {
        Install(String, String, BreakpointTag),
        Remove(String, String, BreakpointTag),
        Resume(ThreadId),
        StepInto(ThreadId),
        Suspend(ThreadId),
    }

    #[derive(Default)]
    struct FakeControl {
        calls: Mutex<Vec<ControlCall>>,
        int_fields: Mutex<Vec<(String, i64)>>,
        object_fields: Mutex<Vec<(String, ObjectRef)>>,
        object_arrays: Mutex<Vec<(String, Vec<ObjectRef>)>>,
        string_arrays: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl FakeControl {
        fn take_calls(&self) -> Vec<ControlCall> {
            std::mem::take(&mut *self.calls.lock())
        }

        fn stage_int(&self, field: &str, value: i64) {
            self.int_fields.lock().push((field.into(), value));
        }

        fn stage_object(&self, field: &str, value: ObjectRef) {
            self.object_fields.lock().push((field.into(), value));
        }

        fn stage_object_array(&self, field: &str, value: Vec<ObjectRef>) {
            self.object_arrays.lock().push((field.into(), value));
        }

        fn stage_string_array(&self, field: &str, value: Vec<String>) {
            self.string_arrays.lock().push((field.into(), value));
        }
    }

    fn lookup<T: Clone>(store: &Mutex<Vec<(String, T)>>, field: &str) -> Option<T> {
        store
            .lock()
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.clone())
    }

    impl DebugControl for FakeControl {
        fn install_breakpoint(
            &self,
            location: &MethodLocation,
            tag: BreakpointTag,
        ) -> Result<(), DebugError> {
            self.calls.lock().push(ControlCall::Install(
                location.class.clone(),
                location.method.clone(),
                tag,
            ));
            Ok(())
        }
        fn remove_breakpoint(
            &self,
            location: &MethodLocation,
            tag: BreakpointTag,
        ) -> Result<(), DebugError> {
            self.calls.lock().push(ControlCall::Remove(
                location.class.clone(),
                location.method.clone(),
                tag,
            ));
            Ok(())
        }
        fn resume(&self, thread: ThreadId) {
            self.calls.lock().push(ControlCall::Resume(thread));
        }
        fn step_into(&self, thread: ThreadId) {
            self.calls.lock().push(ControlCall::StepInto(thread));
        }
        fn suspend(&self, thread: ThreadId) {
            self.calls.lock().push(ControlCall::Suspend(thread));
        }
        fn read_int_field(&self, _thread: ThreadId, field: &str) -> Option<i64> {
            lookup(&self.int_fields, field)
        }
        fn read_object_field(&self, _thread: ThreadId, field: &str) -> Option<ObjectRef> {
            lookup(&self.object_fields, field)
        }
        fn read_object_array_field(
            &self,
            _thread: ThreadId,
            field: &str,
        ) -> Option<Vec<ObjectRef>> {
            lookup(&self.object_arrays, field)
        }
        fn read_string_array_field(&self, _thread: ThreadId, field: &str) -> Option<Vec<String>> {
            lookup(&self.string_arrays, field)
        }
    }

    const EXEC: ThreadId = ThreadId(7);

    fn launched() -> (Arc<FakeControl>, BreakpointCoordinator) {
        let control = Arc::new(FakeControl::default());
        let mut coordinator =
            BreakpointCoordinator::new(control.clone(), RuntimeLocations::default());
        coordinator.handle_event(&DebugEvent::VmStateChanged {
            state: VmState::Idle,
        });
        coordinator.handle_event(&DebugEvent::Halted {
            thread: EXEC,
            breakpoint: Some(BreakpointTag::SimulationRun),
            stack: vec![StackFrame::new("vivarium.runtime.Simulation", "run")],
        });
        control.take_calls();
        (control, coordinator)
    }

    fn boundary_frame() -> StackFrame {
        StackFrame::new("vivarium.runtime.Simulation", "act_actor")
    }

    fn user_frame() -> StackFrame {
        StackFrame::new("Crab", "act")
    }

    fn internal_frame() -> StackFrame {
        StackFrame::new("vivarium.runtime.Scheduler", "tick")
    }

    fn halt(breakpoint: Option<BreakpointTag>, stack: Vec<StackFrame>) -> DebugEvent {
        DebugEvent::Halted {
            thread: EXEC,
            breakpoint,
            stack,
        }
    }

    #[test_timeout::timeout]
    fn run_breakpoint_identifies_execution_thread() {
        let control = Arc::new(FakeControl::default());
        let mut coordinator =
            BreakpointCoordinator::new(control.clone(), RuntimeLocations::default());
        assert_eq!(coordinator.state(), CoordinatorState::Unlaunched);

        let outcome = coordinator.handle_event(&DebugEvent::VmStateChanged {
            state: VmState::Idle,
        });
        assert_eq!(outcome, EventOutcome::Launched);
        assert_eq!(coordinator.state(), CoordinatorState::AwaitingThreadId);
        let installs = control
            .take_calls()
            .iter()
            .filter(|call| matches!(call, ControlCall::Install(..)))
            .count();
        assert_eq!(installs, 8, "all fixed breakpoints installed on launch");

        let outcome = coordinator.handle_event(&halt(
            Some(BreakpointTag::SimulationRun),
            vec![StackFrame::new("vivarium.runtime.Simulation", "run")],
        ));
        assert_eq!(outcome, EventOutcome::ThreadIdentified);
        assert_eq!(coordinator.state(), CoordinatorState::Armed);
        assert_eq!(control.take_calls(), vec![ControlCall::Resume(EXEC)]);
    }

    #[test_timeout::timeout]
    fn boundary_only_stack_is_never_reported_as_user_code() {
        let (control, mut coordinator) = launched();
        // Halted with only boundary frames on the stack: just returned from
        // an act call.
        let outcome = coordinator.handle_event(&halt(
            None,
            vec![boundary_frame(), internal_frame()],
        ));
        assert_ne!(outcome, EventOutcome::HaltedInUserCode);
        assert_eq!(outcome, EventOutcome::ResumedInternal);
        // Re-armed and resumed.
        let calls = control.take_calls();
        assert!(calls.contains(&ControlCall::Resume(EXEC)));
        assert!(calls.iter().any(|call| matches!(
            call,
            ControlCall::Install(_, _, BreakpointTag::InvokeBoundary)
        )));
    }

    #[test_timeout::timeout]
    fn user_frame_above_boundary_reports_exactly_once() {
        let (control, mut coordinator) = launched();
        let stack = vec![user_frame(), boundary_frame(), internal_frame()];
        let outcome = coordinator.handle_event(&halt(None, stack));
        assert_eq!(outcome, EventOutcome::HaltedInUserCode);
        assert_eq!(coordinator.state(), CoordinatorState::HaltedInUserCode);
        // The thread is left suspended: no resume, no step.
        let calls = control.take_calls();
        assert!(!calls.contains(&ControlCall::Resume(EXEC)));
        assert!(!calls.contains(&ControlCall::StepInto(EXEC)));

        let mut events = coordinator.simulation_events().subscribe();
        coordinator.handle_event(&DebugEvent::Resumed { thread: EXEC });
        assert_eq!(coordinator.state(), CoordinatorState::Armed);
        assert_eq!(events.try_recv(), Some(SimulationEvent::DebugResumed));
    }

    #[test_timeout::timeout]
    fn boundary_breakpoint_steps_into_user_code() {
        let (control, mut coordinator) = launched();
        // Arm boundaries by halting somewhere internal first.
        let outcome = coordinator.handle_event(&halt(None, vec![internal_frame()]));
        assert_eq!(outcome, EventOutcome::RanToBoundary);
        assert_eq!(coordinator.state(), CoordinatorState::SteppingInternal);
        control.take_calls();

        // The armed boundary fires: step across the threshold.
        let outcome = coordinator.handle_event(&halt(
            Some(BreakpointTag::InvokeBoundary),
            vec![boundary_frame()],
        ));
        assert_eq!(outcome, EventOutcome::SteppedTowardUserCode);
        let calls = control.take_calls();
        assert!(calls.contains(&ControlCall::StepInto(EXEC)));
        // Boundaries removed before stepping so user breakpoints behave.
        assert!(calls.iter().any(|call| matches!(
            call,
            ControlCall::Remove(_, _, BreakpointTag::InvokeBoundary)
        )));

        // The step lands in user code.
        let outcome =
            coordinator.handle_event(&halt(None, vec![user_frame(), boundary_frame()]));
        assert_eq!(outcome, EventOutcome::HaltedInUserCode);
    }

    #[test_timeout::timeout]
    fn pause_breakpoint_strips_instrumentation_before_surfacing() {
        let (control, mut coordinator) = launched();
        coordinator.handle_event(&halt(None, vec![internal_frame()]));
        control.take_calls();
        let mut events = coordinator.simulation_events().subscribe();

        let outcome = coordinator.handle_event(&halt(
            Some(BreakpointTag::SimulationPaused),
            vec![StackFrame::new("vivarium.runtime.Simulation", "paused")],
        ));
        assert_eq!(outcome, EventOutcome::HaltedAtPause);
        assert_eq!(coordinator.state(), CoordinatorState::HaltedAtPause);
        assert_eq!(events.try_recv(), Some(SimulationEvent::Paused));

        let calls = control.take_calls();
        let removes: Vec<_> = calls
            .iter()
            .filter(|call| matches!(call, ControlCall::Remove(_, _, BreakpointTag::InvokeBoundary)))
            .collect();
        assert_eq!(
            removes.len(),
            RuntimeLocations::default().invoke_methods.len(),
            "every boundary comes off before the pause is visible"
        );
        assert!(calls.contains(&ControlCall::Resume(EXEC)));
    }

    #[test_timeout::timeout]
    fn pause_wait_halt_is_resumed_quietly() {
        let (control, mut coordinator) = launched();
        let outcome = coordinator.handle_event(&halt(
            None,
            vec![StackFrame::new("vivarium.runtime.Simulation", "paused")],
        ));
        assert_eq!(outcome, EventOutcome::ResumedInternal);
        assert_eq!(control.take_calls(), vec![ControlCall::Resume(EXEC)]);
    }

    #[test_timeout::timeout]
    fn foreign_thread_halts_are_ignored() {
        let (control, mut coordinator) = launched();
        let outcome = coordinator.handle_event(&DebugEvent::Halted {
            thread: ThreadId(99),
            breakpoint: None,
            stack: vec![user_frame()],
        });
        assert_eq!(outcome, EventOutcome::Ignored);
        assert!(control.take_calls().is_empty());
    }

    #[test_timeout::timeout]
    fn shell_frames_count_as_boundaries() {
        let (_, mut coordinator) = launched();
        let stack = vec![StackFrame::new("scenario.__Shell3", "invoke")];
        let outcome = coordinator.handle_event(&halt(None, stack));
        // A shell frame alone is internal plumbing, not user code.
        assert_eq!(outcome, EventOutcome::ResumedInternal);
    }

    #[test_timeout::timeout]
    fn world_changed_extracts_current_world() {
        let (control, mut coordinator) = launched();
        control.stage_object(WORLD_FIELD, ObjectRef(0xBEEF));
        let mut events = coordinator.world_events().subscribe();

        let outcome = coordinator.handle_event(&halt(
            Some(BreakpointTag::WorldChanged),
            vec![StackFrame::new("vivarium.runtime.WorldHandler", "world_changed")],
        ));
        assert_eq!(outcome, EventOutcome::DataExtracted);
        assert_eq!(coordinator.state(), CoordinatorState::Armed);
        assert_eq!(
            events.try_recv(),
            Some(WorldEvent::Changed(Some(ObjectRef(0xBEEF))))
        );
        assert!(control.take_calls().contains(&ControlCall::Resume(EXEC)));
    }

    #[test_timeout::timeout]
    fn pick_results_are_copied_out_and_resumed() {
        let (control, mut coordinator) = launched();
        control.stage_int(PICK_ID_FIELD, 12);
        control.stage_object_array(PICK_ACTORS_FIELD, vec![ObjectRef(1), ObjectRef(2)]);
        control.stage_object(PICK_WORLD_FIELD, ObjectRef(3));
        let mut picks = coordinator.pick_events().subscribe();

        let outcome = coordinator.handle_event(&halt(
            Some(BreakpointTag::PickResults),
            vec![StackFrame::new("vivarium.runtime.PickHelper", "picked")],
        ));
        assert_eq!(outcome, EventOutcome::DataExtracted);
        assert_eq!(
            picks.try_recv(),
            Some(PickEvent {
                pick_id: 12,
                actors: vec![ObjectRef(1), ObjectRef(2)],
                world: Some(ObjectRef(3)),
            })
        );
    }

    #[test_timeout::timeout]
    fn actor_names_are_relayed() {
        let (control, mut coordinator) = launched();
        control.stage_string_array(ACTOR_NAMES_FIELD, vec!["crab1".into(), "lobster2".into()]);
        let mut events = coordinator.world_events().subscribe();
        coordinator.handle_event(&halt(
            Some(BreakpointTag::NameActors),
            vec![StackFrame::new("vivarium.runtime.WorldBridge", "name_actors")],
        ));
        assert_eq!(
            events.try_recv(),
            Some(WorldEvent::ActorsNamed(vec![
                "crab1".into(),
                "lobster2".into()
            ]))
        );
    }

    #[test_timeout::timeout]
    fn vm_termination_resets_and_relaunch_reinstalls() {
        let (control, mut coordinator) = launched();
        let mut events = coordinator.simulation_events().subscribe();

        let outcome = coordinator.handle_event(&DebugEvent::VmStateChanged {
            state: VmState::NotReady,
        });
        assert_eq!(outcome, EventOutcome::VmReset);
        assert_eq!(coordinator.state(), CoordinatorState::Unlaunched);
        assert_eq!(events.try_recv(), Some(SimulationEvent::VmTerminated));

        // Relaunch: instrumentation must be installed afresh.
        let outcome = coordinator.handle_event(&DebugEvent::VmStateChanged {
            state: VmState::Idle,
        });
        assert_eq!(outcome, EventOutcome::Launched);
        let installs = control
            .take_calls()
            .iter()
            .filter(|call| matches!(call, ControlCall::Install(..)))
            .count();
        assert_eq!(installs, 8);
    }

    #[test_timeout::timeout]
    fn run_command_crosses_into_user_code_with_no_visible_halts() {
        // Full run flow: resume, reach a boundary, step into user code, act
        // completes, return through the boundary, re-arm. Nothing surfaces.
        let (control, mut coordinator) = launched();
        let mut events = coordinator.simulation_events().subscribe();

        coordinator.handle_event(&halt(
            Some(BreakpointTag::SimulationResumed),
            vec![StackFrame::new("vivarium.runtime.Simulation", "resume_running")],
        ));
        assert_eq!(events.try_recv(), Some(SimulationEvent::StartedRunning));

        coordinator.handle_event(&halt(None, vec![internal_frame()]));
        coordinator.handle_event(&halt(
            Some(BreakpointTag::InvokeBoundary),
            vec![boundary_frame()],
        ));
        // act() ran to completion without user breakpoints; the thread next
        // halts back in the boundary frame.
        coordinator.handle_event(&halt(None, vec![boundary_frame()]));
        assert_eq!(coordinator.state(), CoordinatorState::Armed);
        assert_eq!(events.try_recv(), None, "no user-visible halt surfaced");
        control.take_calls();
    }
}
