//! Wire protocol for the vivarium primary/simulation process pair.
//!
//! Everything that crosses the shared region is defined here: the region
//! layout constants, the command records the primary issues, the consumer
//! frame the simulation publishes, and the codec that moves both through
//! 32-bit word slices. The crate is deliberately free of I/O so both
//! endpoints (and the tests) can drive it against plain buffers.

pub mod command;
pub mod frame;
pub mod layout;
pub mod wire;

pub use command::{Command, CommandPayload, MouseAction};
pub use frame::{AskRequest, ConsumerStatus, FrameUpdate, WorldImage, WorldStamp};
pub use wire::{
    decode_commands, decode_consumer_frame, encode_commands, encode_consumer_frame,
    DecodedCommands, DecodedFrame, ImageFrame, WireError,
};
