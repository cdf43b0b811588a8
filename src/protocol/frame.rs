//! Sample notification decoder.
//!
//! The sensor emits one fixed 18-byte frame per ping:
//!
//! ```text
//! offset  meaning
//!  0..2   signature 'S','F'
//!  2..4   reserved (zero)
//!  4      flags, bit 3 = out of water
//!  5      reserved (zero)
//!  6, 7   depth, whole feet + hundredths
//!  8      bottom echo strength 0-255
//!  9, 10  fish depth, whole feet + hundredths
//!  11     low nibble fish strength 0-15, high nibble battery 0-6
//!  12, 13 water temperature, whole °F + hundredths
//!  14..17 reserved (zero)
//!  17     sum of bytes 0..17 mod 256
//! ```
//!
//! All functions here are pure.

use tracing::debug;

use crate::error::FrameError;

/// Length of a sample notification.
pub const FRAME_LEN: usize = 18;

/// Leading signature bytes shared by notifications and commands.
pub const SIGNATURE: [u8; 2] = [b'S', b'F'];

/// Depth reported for a dry (out of water) transducer.
pub const DRY_DEPTH_M: f32 = -0.01;

const FEET_TO_METRES: f32 = 0.3048;
const DRY_FLAG: u8 = 0x08;
const RESERVED_OFFSETS: [usize; 6] = [2, 3, 5, 14, 15, 16];
const FISH_STRENGTH_MAX: u8 = 15;
const BATTERY_MAX: u8 = 6;

/// One decoded sensor reading. Only produced by [`decode`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawReading {
    /// Transducer is out of water.
    pub is_dry: bool,
    /// Negative when no valid depth is available.
    pub depth_m: f32,
    /// Bottom echo strength, 0-100.
    pub bottom_strength_pct: u8,
    /// Depth of the strongest fish echo in metres.
    pub fish_depth_m: f32,
    /// Fish echo strength, 0-100.
    pub fish_strength_pct: u8,
    /// Battery charge, 0-100.
    pub battery_pct: u8,
    /// Water temperature in °C.
    pub temperature_c: f32,
}

impl RawReading {
    /// Whether `depth_m` carries a real measurement.
    pub fn has_depth(&self) -> bool {
        !self.is_dry && self.depth_m >= 0.0
    }
}

/// A reading plus non-fatal observations made while decoding it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decoded {
    /// The decoded values.
    pub reading: RawReading,
    /// One of the always-zero bytes was set.
    pub reserved_nonzero: bool,
}

/// Sum of `bytes` modulo 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Decode a frame, emitting a debug event if reserved bytes are non-zero.
pub fn decode(bytes: &[u8]) -> Result<RawReading, FrameError> {
    let decoded = decode_with_diagnostics(bytes)?;
    if decoded.reserved_nonzero {
        debug!(
            reserved = ?RESERVED_OFFSETS.map(|offset| bytes[offset]),
            "Sample frame has non-zero reserved bytes"
        );
    }
    Ok(decoded.reading)
}

/// Decode a frame and report reserved-byte diagnostics to the caller.
pub fn decode_with_diagnostics(bytes: &[u8]) -> Result<Decoded, FrameError> {
    if bytes.len() != FRAME_LEN {
        return Err(FrameError::BadLength { len: bytes.len() });
    }
    // Checksum first: a corrupted signature byte is a transmission error.
    let expected = checksum(&bytes[..FRAME_LEN - 1]);
    let found = bytes[FRAME_LEN - 1];
    if expected != found {
        return Err(FrameError::BadChecksum { expected, found });
    }
    if bytes[0..2] != SIGNATURE {
        return Err(FrameError::BadSignature {
            found: [bytes[0], bytes[1]],
        });
    }

    let is_dry = bytes[4] & DRY_FLAG != 0;
    let depth_m = if is_dry {
        DRY_DEPTH_M
    } else {
        feet_to_metres(bytes[6], bytes[7])
    };

    let reading = RawReading {
        is_dry,
        depth_m,
        bottom_strength_pct: scale_pct(bytes[8], u8::MAX),
        fish_depth_m: feet_to_metres(bytes[9], bytes[10]),
        fish_strength_pct: scale_pct(bytes[11] & 0x0F, FISH_STRENGTH_MAX),
        battery_pct: scale_pct(bytes[11] >> 4, BATTERY_MAX),
        temperature_c: fahrenheit_to_celsius(fixed_point(bytes[12], bytes[13])),
    };

    let reserved_nonzero = RESERVED_OFFSETS.iter().any(|&offset| bytes[offset] != 0);

    Ok(Decoded {
        reading,
        reserved_nonzero,
    })
}

/// Whole units plus hundredths.
fn fixed_point(whole: u8, hundredths: u8) -> f32 {
    f32::from(whole) + f32::from(hundredths) / 100.0
}

fn feet_to_metres(feet: u8, hundredths: u8) -> f32 {
    fixed_point(feet, hundredths) * FEET_TO_METRES
}

fn fahrenheit_to_celsius(f: f32) -> f32 {
    (f - 32.0) * 5.0 / 9.0
}

/// `100 * value / max`, saturating at 100 for out-of-range device values.
fn scale_pct(value: u8, max: u8) -> u8 {
    let pct = 100 * u32::from(value) / u32::from(max);
    pct.min(100) as u8
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a valid frame from its 17 payload bytes.
    pub(crate) fn frame(payload: [u8; 17]) -> [u8; FRAME_LEN] {
        let mut out = [0u8; FRAME_LEN];
        out[..17].copy_from_slice(&payload);
        out[17] = checksum(&payload);
        out
    }

    fn reference_frame() -> [u8; FRAME_LEN] {
        frame([83, 70, 0, 0, 0, 9, 10, 50, 128, 2, 30, 0x31, 70, 0, 0, 0, 0])
    }

    #[test]
    fn test_reference_frame() {
        let bytes = reference_frame();
        let decoded = decode_with_diagnostics(&bytes).unwrap();
        let reading = decoded.reading;

        assert!(!reading.is_dry);
        assert!((reading.depth_m - 3.2004).abs() < 1e-4);
        assert_eq!(reading.bottom_strength_pct, 50);
        assert!((reading.fish_depth_m - 0.70104).abs() < 1e-4);
        assert_eq!(reading.fish_strength_pct, 6);
        assert_eq!(reading.battery_pct, 50);
        assert!((reading.temperature_c - 21.111).abs() < 1e-2);
        // Byte 5 is 9 in the reference capture.
        assert!(decoded.reserved_nonzero);
    }

    #[test]
    fn test_rejects_bad_length() {
        assert_eq!(decode(&[]), Err(FrameError::BadLength { len: 0 }));
        let long = [0u8; 19];
        assert_eq!(decode(&long), Err(FrameError::BadLength { len: 19 }));
    }

    #[test]
    fn test_rejects_bad_signature() {
        let mut bytes = reference_frame();
        bytes[1] = b'G';
        bytes[17] = checksum(&bytes[..17]);
        assert_eq!(
            decode(&bytes),
            Err(FrameError::BadSignature { found: [b'S', b'G'] })
        );
    }

    #[test]
    fn test_single_bit_flip_fails_checksum() {
        let valid = reference_frame();
        for byte in 0..17 {
            for bit in 0..8 {
                let mut bytes = valid;
                bytes[byte] ^= 1 << bit;
                assert!(
                    matches!(decode(&bytes), Err(FrameError::BadChecksum { .. })),
                    "flip of byte {byte} bit {bit} was not detected"
                );
            }
        }
    }

    #[test]
    fn test_dry_frame_uses_sentinel() {
        let bytes = frame([83, 70, 0, 0, 0x08, 0, 10, 50, 0, 0, 0, 0x60, 60, 0, 0, 0, 0]);
        let reading = decode(&bytes).unwrap();
        assert!(reading.is_dry);
        assert_eq!(reading.depth_m, DRY_DEPTH_M);
        assert!(!reading.has_depth());
        assert_eq!(reading.battery_pct, 100);
    }

    #[test]
    fn test_strength_scaling_limits() {
        let bytes = frame([83, 70, 0, 0, 0, 0, 0, 0, 255, 0, 0, 0x0F, 32, 0, 0, 0, 0]);
        let reading = decode(&bytes).unwrap();
        assert_eq!(reading.bottom_strength_pct, 100);
        assert_eq!(reading.fish_strength_pct, 100);
        assert_eq!(reading.battery_pct, 0);
        assert!(reading.temperature_c.abs() < 1e-4);
        assert!(reading.has_depth());
    }

    #[test]
    fn test_battery_nibble_above_range_saturates() {
        let bytes = frame([83, 70, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xF0, 32, 0, 0, 0, 0]);
        assert_eq!(decode(&bytes).unwrap().battery_pct, 100);
    }

    #[test]
    fn test_synthetic_frames_round_trip_within_tolerance() {
        for feet in [0u8, 1, 17, 99, 255] {
            for hundredths in [0u8, 1, 50, 99] {
                let bytes = frame([
                    83, 70, 0, 0, 0, 0, feet, hundredths, 0, feet, hundredths, 0x00, feet,
                    hundredths, 0, 0, 0,
                ]);
                let decoded = decode_with_diagnostics(&bytes).unwrap();
                let expected_ft = f32::from(feet) + f32::from(hundredths) / 100.0;
                let reading = decoded.reading;
                assert!((reading.depth_m - expected_ft * 0.3048).abs() < 1e-3);
                assert!((reading.fish_depth_m - expected_ft * 0.3048).abs() < 1e-3);
                assert!(
                    (reading.temperature_c - (expected_ft - 32.0) * 5.0 / 9.0).abs() < 1e-3
                );
                assert!(!decoded.reserved_nonzero);
            }
        }
    }
}
