//! Core of the vivarium process pair: the shared-region channel between the
//! primary (IDE-side) process and the simulation process, and the breakpoint
//! coordinator that keeps the simulation's execution thread from ever being
//! visibly suspended outside user code.
//!
//! The GUI shell, editors, compiler and the concrete debugger backend are
//! external collaborators: they consume [`vmcomm::PrimaryComms::poll_frame`]
//! output, feed commands in through the typed senders, and drive
//! [`debugger::BreakpointCoordinator::handle_event`] with debugger events.

pub mod config;
pub mod debugger;
pub mod telemetry;
pub mod vmcomm;
