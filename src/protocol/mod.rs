//! Sensor wire protocol: notification decoding, command encoding and
//! stream framing.

pub mod assembler;
pub mod command;
pub mod frame;

pub use assembler::FrameAssembler;
pub use command::{DeviceCommand, COMMAND_LEN};
pub use frame::{checksum, decode, decode_with_diagnostics, Decoded, RawReading, FRAME_LEN};
