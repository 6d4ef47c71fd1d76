use std::fmt;

use crate::modbus::{Crc, ModbusError};

/// Length of the telemetry block the MPU pushes out.
pub const TELEMETRY_LENGTH: usize = 45;

/// Decoded MPU telemetry block.
///
/// The block is 45 bytes, all fields big-endian, closed by a Modbus CRC
/// over the first 43 bytes. Unlike the bus frames, the CRC arrives
/// big-endian here - the block is FPGA-composed, not a bus frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpuTelemetry {
    pub instruction_pointer: u16,
    pub output_counter: u64,
    pub input_counter: u64,
    pub output_timeouts: u64,
    pub input_timeouts: u64,
    pub instruction_pointer_on_error: u16,
    pub write_timeout: u16,
    pub read_timeout: u16,
    pub error_status: u8,
    pub error_code: u16,
}

impl MpuTelemetry {
    /// Decode and CRC-check a telemetry block.
    pub fn parse(data: &[u8]) -> Result<Self, ModbusError> {
        if data.len() != TELEMETRY_LENGTH {
            return Err(ModbusError::InvalidLength {
                received: data.len(),
                expected: "45 bytes",
            });
        }

        let u16_at = |offset: usize| u16::from_be_bytes([data[offset], data[offset + 1]]);
        let u64_at = |offset: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&data[offset..offset + 8]);
            u64::from_be_bytes(raw)
        };

        let received = u16_at(43);
        let computed = Crc::from_data(&data[..43]).get();
        if computed != received {
            return Err(ModbusError::CrcError { computed, received });
        }

        Ok(Self {
            instruction_pointer: u16_at(0),
            output_counter: u64_at(2),
            input_counter: u64_at(10),
            output_timeouts: u64_at(18),
            input_timeouts: u64_at(26),
            instruction_pointer_on_error: u16_at(34),
            write_timeout: u16_at(36),
            read_timeout: u16_at(38),
            error_status: data[40],
            error_code: u16_at(41),
        })
    }
}

impl fmt::Display for MpuTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>20} {}", "IP:", self.instruction_pointer)?;
        writeln!(f, "{:>20} {}", "Output (Writes):", self.output_counter)?;
        writeln!(f, "{:>20} {}", "Input (Reads):", self.input_counter)?;
        writeln!(f, "{:>20} {}", "Out Timeouts:", self.output_timeouts)?;
        writeln!(f, "{:>20} {}", "In Timeouts:", self.input_timeouts)?;
        writeln!(
            f,
            "{:>20} {}",
            "IP on error:", self.instruction_pointer_on_error
        )?;
        writeln!(f, "{:>20} {}", "Write timeout:", self.write_timeout)?;
        writeln!(f, "{:>20} {}", "Read timeout:", self.read_timeout)?;
        writeln!(f, "{:>20} {}", "Error status:", self.error_status)?;
        write!(f, "{:>20} {}", "Error code:", self.error_code)
    }
}
