//! Command records issued by the primary process.
//!
//! Wire kind values are part of the cross-process contract: both binaries are
//! compiled independently and must agree on them, so they are spelled out
//! rather than derived from discriminant order.

pub(crate) const CMD_KEY_DOWN: i32 = 0;
pub(crate) const CMD_KEY_UP: i32 = 1;
pub(crate) const CMD_KEY_TYPED: i32 = 2;
pub(crate) const CMD_MOUSE_CLICKED: i32 = 3;
pub(crate) const CMD_MOUSE_PRESSED: i32 = 4;
pub(crate) const CMD_MOUSE_RELEASED: i32 = 5;
pub(crate) const CMD_MOUSE_DRAGGED: i32 = 6;
pub(crate) const CMD_MOUSE_MOVED: i32 = 7;
pub(crate) const CMD_MOUSE_EXITED: i32 = 8;
pub(crate) const CMD_RUN: i32 = 9;
pub(crate) const CMD_PAUSE: i32 = 10;
pub(crate) const CMD_STEP_ONCE: i32 = 11;
pub(crate) const CMD_INSTANTIATE_WORLD: i32 = 12;
pub(crate) const CMD_DISCARD_WORLD: i32 = 13;
pub(crate) const CMD_CONTINUE_DRAG: i32 = 14;
pub(crate) const CMD_END_DRAG: i32 = 15;
pub(crate) const CMD_ASK_ANSWERED: i32 = 16;
pub(crate) const CMD_PROPERTY_CHANGED: i32 = 17;
pub(crate) const CMD_SET_SPEED: i32 = 18;
pub(crate) const CMD_WORLD_FOCUS_GAINED: i32 = 19;
pub(crate) const CMD_WORLD_FOCUS_LOST: i32 = 20;

/// Mouse event flavours; all carry the same (x, y, button, click-count)
/// argument shape on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseAction {
    Clicked,
    Pressed,
    Released,
    Dragged,
    Moved,
    Exited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandPayload {
    KeyDown { code: i32, text: String },
    KeyUp { code: i32, text: String },
    KeyTyped { code: i32, text: String },
    Mouse { action: MouseAction, x: i32, y: i32, button: i32, click_count: i32 },
    Run,
    Pause,
    StepOnce,
    InstantiateWorld { class_name: String },
    DiscardWorld,
    ContinueDrag { drag_id: i32, x: i32, y: i32 },
    EndDrag { drag_id: i32 },
    AskAnswered { answer: String },
    PropertyChanged { key: String, value: Option<String> },
    SetSpeed { speed: i32 },
    WorldFocusGained,
    WorldFocusLost,
}

impl CommandPayload {
    pub fn kind(&self) -> i32 {
        match self {
            CommandPayload::KeyDown { .. } => CMD_KEY_DOWN,
            CommandPayload::KeyUp { .. } => CMD_KEY_UP,
            CommandPayload::KeyTyped { .. } => CMD_KEY_TYPED,
            CommandPayload::Mouse { action, .. } => match action {
                MouseAction::Clicked => CMD_MOUSE_CLICKED,
                MouseAction::Pressed => CMD_MOUSE_PRESSED,
                MouseAction::Released => CMD_MOUSE_RELEASED,
                MouseAction::Dragged => CMD_MOUSE_DRAGGED,
                MouseAction::Moved => CMD_MOUSE_MOVED,
                MouseAction::Exited => CMD_MOUSE_EXITED,
            },
            CommandPayload::Run => CMD_RUN,
            CommandPayload::Pause => CMD_PAUSE,
            CommandPayload::StepOnce => CMD_STEP_ONCE,
            CommandPayload::InstantiateWorld { .. } => CMD_INSTANTIATE_WORLD,
            CommandPayload::DiscardWorld => CMD_DISCARD_WORLD,
            CommandPayload::ContinueDrag { .. } => CMD_CONTINUE_DRAG,
            CommandPayload::EndDrag { .. } => CMD_END_DRAG,
            CommandPayload::AskAnswered { .. } => CMD_ASK_ANSWERED,
            CommandPayload::PropertyChanged { .. } => CMD_PROPERTY_CHANGED,
            CommandPayload::SetSpeed { .. } => CMD_SET_SPEED,
            CommandPayload::WorldFocusGained => CMD_WORLD_FOCUS_GAINED,
            CommandPayload::WorldFocusLost => CMD_WORLD_FOCUS_LOST,
        }
    }

    /// Number of argument words following the kind word.
    pub(crate) fn arg_words(&self) -> usize {
        match self {
            CommandPayload::KeyDown { text, .. }
            | CommandPayload::KeyUp { text, .. }
            | CommandPayload::KeyTyped { text, .. } => 1 + text.chars().count(),
            CommandPayload::Mouse { .. } => 4,
            CommandPayload::Run
            | CommandPayload::Pause
            | CommandPayload::StepOnce
            | CommandPayload::DiscardWorld
            | CommandPayload::WorldFocusGained
            | CommandPayload::WorldFocusLost => 0,
            CommandPayload::InstantiateWorld { class_name } => class_name.chars().count(),
            CommandPayload::ContinueDrag { .. } => 3,
            CommandPayload::EndDrag { .. } => 1,
            CommandPayload::AskAnswered { answer } => answer.chars().count(),
            CommandPayload::PropertyChanged { key, value } => {
                2 + key.chars().count() + value.as_ref().map_or(0, |v| v.chars().count())
            }
            CommandPayload::SetSpeed { .. } => 1,
        }
    }
}

/// A sequenced command record as it travels through the producer area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub seq: i32,
    pub payload: CommandPayload,
}

impl Command {
    pub fn new(seq: i32, payload: CommandPayload) -> Self {
        Self { seq, payload }
    }

    /// Total record size in words: sequence, length, kind, args.
    pub(crate) fn record_words(&self) -> usize {
        3 + self.payload.arg_words()
    }
}
