//! Frame codec
//!
//! Stateless conversions between float samples and PCM16, and between binary
//! frames and their text-safe wire form.

pub mod pcm;
pub mod wire;

pub use pcm::{apply_edge_fades, decode_playback, encode_capture};
pub use wire::{from_wire_format, to_wire_format};
