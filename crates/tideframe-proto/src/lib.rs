//! Wire frame model and codecs for the tideframe protocol.
//!
//! A [`Frame`] is the unit of the protocol: `source`, `target`, `command`
//! and a key/value-list mapping (`kval`). Two interchangeable encodings
//! carry it on the wire with identical semantics:
//!
//! - [`BinaryCodec`]: a length-prefixed, NUL-separated token stream with a
//!   double-NUL terminator.
//! - [`JsonCodec`]: a two-element JSON array followed by a single NUL.
//!
//! On top of the codecs sit [`FrameBuffer`] (ingress byte accumulation and
//! terminator splitting) and the [`multipart`] planner, which splits one
//! logical payload across multiple frames when it cannot fit in
//! [`MAXFRAME`] bytes.

pub mod buffer;
pub mod codec;
pub mod errors;
pub mod frame;
pub mod multipart;
pub mod target;

pub use buffer::FrameBuffer;
pub use codec::{BinaryCodec, FrameCodec, JsonCodec};
pub use errors::{MultipartError, ParserError};
pub use frame::{Frame, Kval};

/// Maximum on-wire size of a single frame, in bytes.
pub const MAXFRAME: usize = 1400;

/// Maximum length of a target (handle or group name), in bytes.
pub const MAXTARGET: usize = 48;

/// Maximum length of a command name, in bytes.
pub const MAXCOMMAND: usize = 32;
