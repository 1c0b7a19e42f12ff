//! Debugger-side coordination for the simulation process.
//!
//! The coordinator's one guarantee: the simulation's execution thread is
//! never user-visibly suspended outside user-authored code. Framework frames
//! that call into user `act` methods are stepped through transparently;
//! genuine entry into user code, or a deliberate pause, halts and surfaces
//! cleanly. Everything here is driven by [`DebugEvent`]s from an external
//! debugger-control collaborator, abstracted as [`DebugControl`].

pub mod coordinator;

pub use coordinator::{BreakpointCoordinator, CoordinatorState, EventOutcome, RuntimeLocations};

/// Opaque identity of a thread in the simulation process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u64);

/// Opaque reference to an object in the simulation process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef(pub u64);

/// A (class, method) pair, resolved once when instrumentation is installed
/// and carried on events so dispatch is a plain enum match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodLocation {
    pub class: String,
    pub method: String,
}

impl MethodLocation {
    pub fn new(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            method: method.into(),
        }
    }
}

/// Why a coordinator-owned breakpoint exists. Tags are attached at install
/// time and echoed back when the breakpoint is hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakpointTag {
    /// Startup marker: first halt identifies the execution thread.
    SimulationRun,
    /// The execution thread is about to enter its pause wait.
    SimulationPaused,
    /// The execution thread has resumed from a pause.
    SimulationResumed,
    /// A boundary call site that invokes user-authored code.
    InvokeBoundary,
    /// Data-extraction points; these never gate execution.
    WorldInitialising,
    WorldChanged,
    WorldInstantiationError,
    NameActors,
    PickResults,
}

/// One frame of a suspended thread's call stack, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub class: String,
    pub method: String,
}

impl StackFrame {
    pub fn new(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            method: method.into(),
        }
    }
}

/// Lifecycle of the debugger connection to the simulation process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// The process terminated (or has not started); a relaunch follows.
    NotReady,
    /// The process is up and idle, ready for instrumentation.
    Idle,
}

/// An event from the debugger-control collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    Halted {
        thread: ThreadId,
        /// Tag of the coordinator-owned breakpoint that fired, if any; a
        /// user breakpoint or step completion carries `None`.
        breakpoint: Option<BreakpointTag>,
        /// Call stack of the halted thread, innermost frame first.
        stack: Vec<StackFrame>,
    },
    Resumed {
        thread: ThreadId,
    },
    VmStateChanged {
        state: VmState,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum DebugError {
    #[error("breakpoint operation failed at {class}.{method}: {message}")]
    Breakpoint {
        class: String,
        method: String,
        message: String,
    },
    #[error("debugger transport failed: {0}")]
    Transport(String),
}

/// Capabilities the coordinator needs from the external debugger-control
/// collaborator: install/remove instrumentation, steer threads, and copy
/// field values out of the halted frame's receiver.
pub trait DebugControl: Send + Sync {
    fn install_breakpoint(
        &self,
        location: &MethodLocation,
        tag: BreakpointTag,
    ) -> Result<(), DebugError>;
    fn remove_breakpoint(
        &self,
        location: &MethodLocation,
        tag: BreakpointTag,
    ) -> Result<(), DebugError>;
    fn resume(&self, thread: ThreadId);
    fn step_into(&self, thread: ThreadId);
    fn suspend(&self, thread: ThreadId);
    /// Read an integer field of the halted frame's receiver.
    fn read_int_field(&self, thread: ThreadId, field: &str) -> Option<i64>;
    /// Read an object-reference field of the halted frame's receiver.
    fn read_object_field(&self, thread: ThreadId, field: &str) -> Option<ObjectRef>;
    /// Read an object-array field of the halted frame's receiver.
    fn read_object_array_field(&self, thread: ThreadId, field: &str) -> Option<Vec<ObjectRef>>;
    /// Read a string-array field of the halted frame's receiver.
    fn read_string_array_field(&self, thread: ThreadId, field: &str) -> Option<Vec<String>>;
}

/// Execution-state transitions surfaced to the primary's listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulationEvent {
    StartedRunning,
    Paused,
    HaltedInUserCode,
    DebugResumed,
    WorldInstantiationError,
    VmTerminated,
}

/// World bookkeeping extracted at data breakpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldEvent {
    Initialising,
    Changed(Option<ObjectRef>),
    ActorsNamed(Vec<String>),
}

/// Result of an actor/world pick request, extracted at the pick breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickEvent {
    pub pick_id: i32,
    pub actors: Vec<ObjectRef>,
    /// Only meaningful when `actors` is empty.
    pub world: Option<ObjectRef>,
}
