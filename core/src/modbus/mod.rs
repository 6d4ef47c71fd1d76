//! Modbus RTU framing: CRC engine, frame writer, frame parser and the
//! bus list that pairs outstanding requests with their reply handlers.
//!
//! All multi-byte payload fields on the wire are big-endian; the CRC
//! appended at the end of every frame is little-endian (low byte first),
//! per Modbus RTU convention. The FPGA timestamp path is little-endian and
//! lives elsewhere - the two codecs must never mix.

pub mod bus_list;
pub mod buffer;
pub mod crc;
pub mod parser;

pub use bus_list::{BusList, DeviceErrorRecord, Request};
pub use buffer::{Buffer, FrameData, Int24};
pub use crc::Crc;
pub use parser::Parser;

use thiserror::Error;

/// Reply function codes have this bit set when the device reports an
/// exception instead of a regular reply.
pub const ERROR_MASK: u8 = 0x80;

/// Broadcast addresses which never produce a reply: the general broadcast
/// and the reserved group addresses. The temporary-address broadcast (255)
/// is not listed - function 72 sent to it is answered.
pub const BROADCAST_ADDRESSES: [u8; 4] = [0, 148, 149, 250];

/// Returns true for addresses whose requests produce no reply.
pub fn is_broadcast(address: u8) -> bool {
    BROADCAST_ADDRESSES.contains(&address)
}

/// Errors raised while composing, parsing or matching Modbus frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModbusError {
    /// Frame shorter than the 4-byte minimum (address, function, CRC).
    #[error("cannot parse {length} byte frame - minimal Modbus frame length is 4 bytes")]
    ShortFrame { length: usize },

    /// Bytes remain in the frame after the CRC - framing drift.
    #[error("{extra} extra byte(s) after CRC")]
    LongResponse { extra: usize },

    /// Computed CRC does not match the received one.
    #[error("invalid CRC - computed 0x{computed:04x}, received 0x{received:04x}")]
    CrcError { computed: u16, received: u16 },

    /// A read past the end of the received frame.
    #[error("read of {length} byte(s) at offset {offset} runs past the frame end")]
    OutOfRange { offset: usize, length: usize },

    /// Reply does not match the pending request.
    #[error(
        "wrong response - received address {address} function {function}, \
         expected address {expected_address} function {expected_function}"
    )]
    WrongResponse {
        address: u8,
        function: u8,
        expected_address: u8,
        expected_function: u8,
    },

    /// Received function has no registered handler.
    #[error("unexpected response - no handler for function {function} (address {address})")]
    UnexpectedResponse { address: u8, function: u8 },

    /// Device replied with the error mask set and no error handler was
    /// registered for the function.
    #[error("Modbus exception {exception} from address {address}, function {function}")]
    ErrorResponse {
        address: u8,
        function: u8,
        exception: u8,
    },

    /// A reply arrived with no outstanding request left to match it.
    #[error("no outstanding request for reply from address {address}, function {function}")]
    MissingResponse { address: u8, function: u8 },

    /// Domain handler received a payload of impossible length.
    #[error("invalid response length {received}, expected {expected}")]
    InvalidLength {
        received: usize,
        expected: &'static str,
    },

    /// No status reply has been observed for the address yet.
    #[error("mode of ILC at address {address} is not known")]
    UnknownMode { address: u8 },
}
