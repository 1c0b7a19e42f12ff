//! The inter-process communication channel between the primary and the
//! simulation process.
//!
//! The two sides never share memory through normal means: everything crosses
//! a memory-mapped temp file ([`region::SharedRegion`]) guarded by three
//! byte-range file locks whose handshake is documented in `region`. The
//! primary side ([`primary::PrimaryComms`]) owns the file, queues commands
//! and consumes frame updates; the simulation side
//! ([`simulation::SimulationComms`]) runs the exchange loop, renders world
//! frames into pooled buffers and carries the `ask` protocol for user code.

pub mod primary;
pub mod region;
pub mod simulation;

pub use primary::PrimaryComms;
pub use region::{LockArea, RegionError, SharedRegion};
pub use simulation::{CommandSink, PaintWhen, SimulationComms, WorldSurface};

/// Exchange-loop failure. Loops log these at their boundary and retry; they
/// never exit on error.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Region(#[from] RegionError),
    #[error(transparent)]
    Wire(#[from] sim_proto::WireError),
}
