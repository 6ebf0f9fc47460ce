//! Wire protocol for the starling graph stream.
//!
//! Three layers, innermost first:
//!
//! - [`record`] — the 28-byte little-endian node record. A binary frame is
//!   a headerless concatenation of records; the count derives from the
//!   byte length.
//! - [`frame`] — the compression gate. Small bodies pass through
//!   byte-identical, large ones are deflated. There is no compression flag
//!   on the wire: the receiver inflates-then-validates and falls back to
//!   treating the body as raw.
//! - [`control`] — tagged-JSON control messages multiplexed on the same
//!   transport as text frames.

pub mod control;
pub mod error;
pub mod frame;
pub mod record;

pub use control::{ClientControl, ServerControl};
pub use error::ProtoError;
pub use record::{NodeRecord, Slot, Vec3, RECORD_SIZE};
