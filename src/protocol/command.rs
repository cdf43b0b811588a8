//! Outbound device configuration command.

use super::frame::{checksum, SIGNATURE};

/// Length of an encoded command.
pub const COMMAND_LEN: usize = 12;

const CMD_CONFIGURE: u8 = 1;
const CONFIGURE_PAYLOAD_LEN: u8 = 3;

/// Sonar gain/filter/range settings sent to the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCommand {
    /// Sonar gain, 0-10.
    pub sensitivity: u8,
    /// Noise rejection level, 0-4.
    pub noise: u8,
    /// Depth range index, 0-7.
    pub range: u8,
}

impl DeviceCommand {
    /// Configuration command for the given settings.
    pub fn configure(sensitivity: u8, noise: u8, range: u8) -> Self {
        Self {
            sensitivity,
            noise,
            range,
        }
    }

    /// `['S','F',0,0,1,3,sensitivity,noise,range,checksum,0,0]`, checksum over bytes 0-8.
    pub fn encode(&self) -> [u8; COMMAND_LEN] {
        let mut out = [0u8; COMMAND_LEN];
        out[0..2].copy_from_slice(&SIGNATURE);
        out[4] = CMD_CONFIGURE;
        out[5] = CONFIGURE_PAYLOAD_LEN;
        out[6] = self.sensitivity;
        out[7] = self.noise;
        out[8] = self.range;
        out[9] = checksum(&out[..9]);
        out
    }
}
