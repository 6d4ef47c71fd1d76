//! Intel-HEX firmware image loading.
//!
//! Reads the subset of the format the ILC firmware builds use: Data,
//! End-of-File and Extended-Linear-Address records. A non-zero extended
//! address marks the trailing filler section appended by the build; data
//! after it is ignored. The assembled image reports its lowest address
//! and the concatenated bytes, which is exactly what the firmware
//! programmer consumes.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use thiserror::Error;

use crate::ilc::firmware::FirmwareImage;

/// Intel-HEX record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordType {
    Data,
    EndOfFile,
    ExtendedSegmentAddress,
    StartSegmentAddress,
    ExtendedLinearAddress,
    StartLinearAddress,
}

impl RecordType {
    fn from_byte(value: u8, line: usize) -> Result<Self, HexLoadError> {
        match value {
            0 => Ok(Self::Data),
            1 => Ok(Self::EndOfFile),
            2 => Ok(Self::ExtendedSegmentAddress),
            3 => Ok(Self::StartSegmentAddress),
            4 => Ok(Self::ExtendedLinearAddress),
            5 => Ok(Self::StartLinearAddress),
            _ => Err(HexLoadError::UnknownRecordType { line, value }),
        }
    }
}

/// Errors raised while loading a hex file.
#[derive(Debug, Error)]
pub enum HexLoadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("line {line}: expected ':' start code, got '{got}'")]
    BadStartCode { line: usize, got: char },

    #[error("line {line}: truncated record")]
    Truncated { line: usize },

    #[error("line {line}: invalid hex digit")]
    BadDigit { line: usize },

    #[error("line {line}: unknown record type {value}")]
    UnknownRecordType { line: usize, value: u8 },

    #[error("line {line} (address 0x{address:04X}): checksum mismatch - expected 0x{expected:02X}, got 0x{got:02X}")]
    ChecksumMismatch {
        line: usize,
        address: u16,
        expected: u8,
        got: u8,
    },

    #[error("no data records found")]
    Empty,
}

struct HexLine {
    address: u16,
    record_type: RecordType,
    data: Vec<u8>,
}

/// Parsed firmware image.
pub struct IntelHex {
    start_address: u16,
    data: Vec<u8>,
}

impl IntelHex {
    /// Load and parse a hex file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HexLoadError> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    /// Parse hex records from a reader.
    pub fn from_reader(reader: impl BufRead) -> Result<Self, HexLoadError> {
        let mut lines = Vec::new();
        let mut ignore_data = false;

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = index + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let parsed = Self::parse_line(trimmed, line_no)?;
            match parsed.record_type {
                RecordType::Data => {
                    if !ignore_data {
                        lines.push(parsed);
                    }
                }
                RecordType::EndOfFile => break,
                RecordType::ExtendedLinearAddress => {
                    // a non-zero upper address means the rest of the file
                    // is filler appended after the application image
                    ignore_data = parsed.data.iter().any(|b| *b != 0);
                }
                _ => {}
            }
        }

        if lines.is_empty() {
            return Err(HexLoadError::Empty);
        }

        lines.sort_by_key(|l| l.address);
        let start_address = lines[0].address;

        let mut data = Vec::new();
        for line in &lines {
            let offset = usize::from(line.address - start_address);
            // fill any gap the way the bootloader expands pages: 0xFF,
            // with a 0x00 on every fourth byte
            while data.len() < offset {
                let position = data.len();
                data.push(if position % 4 == 3 { 0x00 } else { 0xFF });
            }
            if data.len() > offset {
                data.truncate(offset);
            }
            data.extend_from_slice(&line.data);
        }

        Ok(Self {
            start_address,
            data,
        })
    }

    /// Lowest address of the image.
    pub fn start_address(&self) -> u16 {
        self.start_address
    }

    /// The concatenated image bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn parse_line(line: &str, line_no: usize) -> Result<HexLine, HexLoadError> {
        let mut chars = line.chars();
        let start = chars.next().ok_or(HexLoadError::Truncated { line: line_no })?;
        if start != ':' {
            return Err(HexLoadError::BadStartCode {
                line: line_no,
                got: start,
            });
        }

        let hex = chars.as_str();
        if hex.len() % 2 != 0 {
            return Err(HexLoadError::Truncated { line: line_no });
        }
        let bytes: Vec<u8> = hex
            .as_bytes()
            .chunks(2)
            .map(|pair| {
                u8::from_str_radix(std::str::from_utf8(pair).unwrap_or(""), 16)
                    .map_err(|_| HexLoadError::BadDigit { line: line_no })
            })
            .collect::<Result<_, _>>()?;

        // byte count, 2-byte address, record type, data, checksum
        if bytes.len() < 5 {
            return Err(HexLoadError::Truncated { line: line_no });
        }
        let byte_count = usize::from(bytes[0]);
        if bytes.len() != byte_count + 5 {
            return Err(HexLoadError::Truncated { line: line_no });
        }

        let address = u16::from_be_bytes([bytes[1], bytes[2]]);
        let record_type = RecordType::from_byte(bytes[3], line_no)?;
        let data = bytes[4..4 + byte_count].to_vec();
        let got = bytes[4 + byte_count];

        // two's complement of the sum of everything before the checksum
        let sum: u8 = bytes[..4 + byte_count]
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b));
        let expected = sum.wrapping_neg();
        if expected != got {
            return Err(HexLoadError::ChecksumMismatch {
                line: line_no,
                address,
                expected,
                got,
            });
        }

        Ok(HexLine {
            address,
            record_type,
            data,
        })
    }
}

impl FirmwareImage for IntelHex {
    fn start_address(&self) -> u16 {
        self.start_address
    }

    fn data(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_two_data_records() {
        let text = ":0B0010006164647265737320676170A7\n:00000001FF\n";
        let hex = IntelHex::from_reader(text.as_bytes()).unwrap();
        assert_eq!(hex.start_address(), 0x0010);
        assert_eq!(hex.data(), b"address gap");
    }

    #[test]
    fn records_sorted_by_address() {
        // two records given high address first
        let text = ":020014000506DF\n:0400100001020304E2\n:00000001FF\n";
        let hex = IntelHex::from_reader(text.as_bytes()).unwrap();
        assert_eq!(hex.start_address(), 0x0010);
        assert_eq!(hex.data(), &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    }

    #[test]
    fn gap_gets_filled() {
        let text = ":020010000102EB\n:020018000304DF\n:00000001FF\n";
        let hex = IntelHex::from_reader(text.as_bytes()).unwrap();
        assert_eq!(hex.start_address(), 0x0010);
        assert_eq!(
            hex.data(),
            &[0x01, 0x02, 0xFF, 0x00, 0xFF, 0xFF, 0xFF, 0x00, 0x03, 0x04]
        );
    }

    #[test]
    fn bad_checksum_rejected() {
        let text = ":0B0010006164647265737320676170A8\n";
        assert!(matches!(
            IntelHex::from_reader(text.as_bytes()),
            Err(HexLoadError::ChecksumMismatch { line: 1, .. })
        ));
    }

    #[test]
    fn bad_start_code_rejected() {
        let text = "x0B0010006164647265737320676170A7\n";
        assert!(matches!(
            IntelHex::from_reader(text.as_bytes()),
            Err(HexLoadError::BadStartCode { line: 1, got: 'x' })
        ));
    }

    #[test]
    fn empty_input_rejected() {
        assert!(matches!(
            IntelHex::from_reader(&b""[..]),
            Err(HexLoadError::Empty)
        ));
    }

    #[test]
    fn nonzero_extended_address_ends_image() {
        let text = ":020010000102EB\n:02000004FFFFFC\n:020018000304DF\n:00000001FF\n";
        let hex = IntelHex::from_reader(text.as_bytes()).unwrap();
        assert_eq!(hex.data(), &[0x01, 0x02]);
    }
}
