//! Decoded consumer-area state as consumed by the primary process.

/// A pending `ask` request from user code, relayed until answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AskRequest {
    pub id: i32,
    pub prompt: String,
}

/// Identity and geometry of the currently installed world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldStamp {
    /// Strictly increasing; bumps every time a world is installed.
    pub counter: i32,
    /// Cell size in pixels.
    pub cell_size: i32,
}

/// A rendered world frame, BGRA words in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldImage {
    pub paint_seq: i32,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<i32>,
}

/// Telemetry the simulation publishes on every exchange, image or not.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConsumerStatus {
    /// Sequence of the most recently processed command, -1 if none yet.
    pub last_ack_command: i32,
    /// Cumulative count of uncaught errors in user code.
    pub error_count: i32,
    /// Epoch millis when the current user-code execution started, 0 if idle.
    pub user_code_started_at: u64,
    /// Current execution speed, 1..=100.
    pub speed: i32,
    /// World counter, 0 when no world is installed.
    pub world_counter: i32,
    /// World cell size in pixels, 0 when no world is installed.
    pub cell_size: i32,
    /// Pending ask request, if user code is blocked in `ask`.
    pub ask: Option<AskRequest>,
    /// Whether the inter-act delay loop is currently running.
    pub delay_loop_active: bool,
    /// Whether the simulation process is ready to accept interactive
    /// invocations from the primary.
    pub ready_for_invocations: bool,
}

/// A snapshot handed to the primary's GUI collaborator after a poll.
///
/// `image` is only populated when a frame newer than the previously polled
/// one arrived; all other fields reflect the latest exchange regardless.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameUpdate {
    pub image: Option<WorldImage>,
    pub last_ack_command: i32,
    pub error_count: i32,
    pub user_code_started_at: u64,
    pub speed: i32,
    pub world: Option<WorldStamp>,
    pub ask: Option<AskRequest>,
    pub delay_loop_active: bool,
    pub ready_for_invocations: bool,
}

impl FrameUpdate {
    pub fn from_status(status: &ConsumerStatus, image: Option<WorldImage>) -> Self {
        FrameUpdate {
            image,
            last_ack_command: status.last_ack_command,
            error_count: status.error_count,
            user_code_started_at: status.user_code_started_at,
            speed: status.speed,
            world: (status.world_counter != 0).then(|| WorldStamp {
                counter: status.world_counter,
                cell_size: status.cell_size,
            }),
            ask: status.ask.clone(),
            delay_loop_active: status.delay_loop_active,
            ready_for_invocations: status.ready_for_invocations,
        }
    }
}
