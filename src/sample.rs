//! Durable sample record.
//!
//! Only the position, time and bottom fields survive a round trip through the
//! ring log. The remaining fields are cached from the last decoded reading so
//! the significant-change filter and live displays can use them.
//!
//! # Persisted layout (little-endian, 29 bytes)
//! ```text
//! timestamp_ms: i64 | latitude: f64 | longitude: f64 | depth_m: f32 | bottom_strength_pct: u8
//! ```
//!
//! The layout carries no version tag. Changing it requires a new log file.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::error::RingLogError;
use crate::protocol::RawReading;

/// Persisted size of one [`Sample`].
pub const SAMPLE_BYTES: usize = 8 + 8 + 8 + 4 + 1;

/// A WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
}

impl Location {
    /// A position in decimal degrees.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// One accepted sonar sample.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sample {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
    /// Depth in metres, negative when unknown.
    pub depth_m: f32,
    /// Bottom echo strength, 0-100.
    pub bottom_strength_pct: u8,

    // Cached, not persisted.
    /// Water temperature in °C.
    #[serde(skip)]
    pub temperature_c: f32,
    /// Depth of the strongest fish echo in metres.
    #[serde(skip)]
    pub fish_depth_m: f32,
    /// Fish echo strength, 0-100.
    #[serde(skip)]
    pub fish_strength_pct: u8,
    /// Battery charge, 0-100.
    #[serde(skip)]
    pub battery_pct: u8,
}

impl Sample {
    /// Combine a decoded reading with the current position.
    pub fn from_reading(reading: &RawReading, location: Location, timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            latitude: location.latitude,
            longitude: location.longitude,
            depth_m: reading.depth_m,
            bottom_strength_pct: reading.bottom_strength_pct,
            temperature_c: reading.temperature_c,
            fish_depth_m: reading.fish_depth_m,
            fish_strength_pct: reading.fish_strength_pct,
            battery_pct: reading.battery_pct,
        }
    }

    /// Position the sample was taken at.
    pub fn location(&self) -> Location {
        Location::new(self.latitude, self.longitude)
    }

    /// Encode the persisted subset.
    pub fn encode(&self) -> [u8; SAMPLE_BYTES] {
        let mut out = [0u8; SAMPLE_BYTES];
        let mut buf = &mut out[..];
        buf.put_i64_le(self.timestamp_ms);
        buf.put_f64_le(self.latitude);
        buf.put_f64_le(self.longitude);
        buf.put_f32_le(self.depth_m);
        buf.put_u8(self.bottom_strength_pct);
        out
    }

    /// Decode the persisted subset. Cached fields are left at zero.
    pub fn decode(bytes: &[u8]) -> Result<Self, RingLogError> {
        if bytes.len() != SAMPLE_BYTES {
            return Err(RingLogError::Truncated(format!(
                "sample record is {} bytes, expected {}",
                bytes.len(),
                SAMPLE_BYTES
            )));
        }
        let mut buf = bytes;
        Ok(Self {
            timestamp_ms: buf.get_i64_le(),
            latitude: buf.get_f64_le(),
            longitude: buf.get_f64_le(),
            depth_m: buf.get_f32_le(),
            bottom_strength_pct: buf.get_u8(),
            ..Self::default()
        })
    }

    /// Copy with the non-persisted fields cleared, i.e. what [`Sample::decode`]
    /// would return for this sample.
    pub fn persisted(&self) -> Self {
        Self {
            timestamp_ms: self.timestamp_ms,
            latitude: self.latitude,
            longitude: self.longitude,
            depth_m: self.depth_m,
            bottom_strength_pct: self.bottom_strength_pct,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_bytes_constant() {
        assert_eq!(SAMPLE_BYTES, 29);
        assert_eq!(Sample::default().encode().len(), 29);
    }

    #[test]
    fn test_encode_is_little_endian() {
        let sample = Sample {
            timestamp_ms: 1,
            bottom_strength_pct: 0xAB,
            ..Sample::default()
        };
        let bytes = sample.encode();
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..8], &[0; 7]);
        assert_eq!(bytes[28], 0xAB);
    }

    #[test]
    fn test_decode_drops_cached_fields() {
        let sample = Sample {
            timestamp_ms: 1_700_000_000_123,
            latitude: 59.329_3,
            longitude: 18.068_6,
            depth_m: 4.25,
            bottom_strength_pct: 77,
            temperature_c: 12.5,
            fish_depth_m: 1.0,
            fish_strength_pct: 40,
            battery_pct: 83,
        };
        let decoded = Sample::decode(&sample.encode()).unwrap();
        assert_eq!(decoded, sample.persisted());
        assert_eq!(decoded.battery_pct, 0);
    }

    #[test]
    fn test_decode_rejects_short_record() {
        assert!(matches!(
            Sample::decode(&[0u8; 28]),
            Err(RingLogError::Truncated(_))
        ));
    }
}
