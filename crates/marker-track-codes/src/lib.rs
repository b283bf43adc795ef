//! Identity codes for tracked fiducial markers.
//!
//! - [`square`]: 5×5 grid codes carrying identifiers `0..=31`, decodable in
//!   any of four rotations and, optionally, through a mirror.
//! - [`qr`]: QR-style targets whose orientation is read from finder-pattern
//!   run lengths, with hysteresis against the previous pose.
//!
//! Both decoders work on a clockwise image quadrilateral and report the
//! rotation that moves the marker's top-left corner to `quad[0]`.

mod error;
pub mod qr;
pub mod sampling;
pub mod square;

pub use error::{CodeError, DecodeError};
pub use qr::{
    assumed_rotation, read_rotation, render_qr_target, QrParams, QrReading, RotationHysteresis,
};
pub use square::{
    decode_square, encode_square, render_square, SquareDecode, SquareParams, MAX_SQUARE_ID,
};
