//! Shared-region layout.
//!
//! The backing file is addressed as 32-bit words in native byte order (both
//! processes always run on the same host). Three non-overlapping byte ranges
//! are lockable independently; the lock handshake itself is documented in
//! `vmcomm::region` on the app side.
//!
//! ```text
//! bytes 0..4        sync cell: never carries data, locked as the handshake token
//! bytes 4..65536    producer area: written by the primary only
//! bytes 65536..end  consumer area: written by the simulation only
//! ```

/// Bytes per addressable word.
pub const WORD_BYTES: usize = 4;

/// The sync lock region: a single reserved word at the start of the file.
pub const SYNC_OFFSET_BYTES: u64 = 0;
pub const SYNC_SIZE_BYTES: u64 = WORD_BYTES as u64;

/// The producer-area lock starts right after the sync cell.
pub const PRODUCER_OFFSET_BYTES: u64 = SYNC_SIZE_BYTES;

/// First word of the consumer area; everything before it (16K words) is the
/// producer prefix.
pub const CONSUMER_OFFSET: usize = 0x4000;
pub const CONSUMER_OFFSET_BYTES: u64 = (CONSUMER_OFFSET * WORD_BYTES) as u64;

pub const PRODUCER_SIZE_BYTES: u64 = CONSUMER_OFFSET_BYTES - PRODUCER_OFFSET_BYTES;

/// Default mapped size of the backing file. Large worlds need more; the
/// primary passes the negotiated size to the simulation process at launch.
pub const DEFAULT_REGION_BYTES: usize = 10_000_000;

// Producer-area word indices. Word 0 belongs to the sync region.

/// Negative of the last exchange sequence the primary observed; a negative
/// value tells the simulation that fresh producer data is present.
pub const PRODUCER_MARKER: usize = 1;
/// Sequence number of the last image frame the primary fully consumed.
pub const PRODUCER_LAST_CONSUMED: usize = 2;
/// Command count, immediately followed by the command records.
pub const PRODUCER_COMMAND_COUNT: usize = 3;

// Consumer-area word indices, relative to `CONSUMER_OFFSET`.

pub const CONSUMER_SEQ: usize = 0;
pub const CONSUMER_PAINT_SEQ: usize = 1;
pub const CONSUMER_WIDTH: usize = 2;
pub const CONSUMER_HEIGHT: usize = 3;
/// Pixel words start here when width and height are both non-zero; the
/// telemetry trailer follows the pixel span.
pub const CONSUMER_PIXELS: usize = 4;

/// Number of words in the consumer area for a region of `bytes` total size.
pub fn consumer_words(bytes: usize) -> usize {
    (bytes / WORD_BYTES).saturating_sub(CONSUMER_OFFSET)
}
