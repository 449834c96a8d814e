//! Range streaming.
//!
//! Serves single HTTP byte ranges from whichever backing currently holds an
//! entry's bytes:
//!
//! - **Local**: a file in the cache directory, possibly still being written.
//!   Reads past the current end wait for the file to grow, up to a bound.
//! - **Chunked**: a completed upload in the chunk store. Only the chunks that
//!   intersect the range are fetched, and the boundary chunks are trimmed.

mod range;
mod streamer;
mod wait;

pub use range::ByteRange;
pub use streamer::{Progress, RangeStreamer, StreamSource};
pub use wait::wait_until;
