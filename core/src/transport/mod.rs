//! Byte transports carrying Modbus frames to the ILC buses.
//!
//! A [`Transport`] is a raw byte channel plus the [`Transport::commands`]
//! driver that pushes a whole [`BusList`] through it under one deadline.
//! Two implementations ship here: the FPGA serial device (bytes framed
//! through a command/response FIFO pair) and a pure in-memory simulation
//! for host-side tests.

pub mod fpga_serial;
pub mod simulated;

pub use fpga_serial::{FpgaSerialDevice, SerialFifo};
pub use simulated::{ResponseGenerator, SimulatedTransport};

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::exec::RunControl;
use crate::modbus::{BusList, ModbusError};

/// Transport layer failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The `commands` deadline expired.
    #[error("timeout while waiting for transport response")]
    Timeout,

    /// A non-broadcast request produced no reply bytes at all.
    #[error("empty answer to request for address {address}, function {function}")]
    EmptyAnswer { address: u8, function: u8 },

    /// FPGA transport-layer error: the device answered a FIFO request
    /// with an error code.
    #[error("communication error - request 0x{request:02x} failed with code {code}")]
    CommunicationError { request: u8, code: u32 },

    /// Frame-level failure while parsing a reply.
    #[error(transparent)]
    Modbus(#[from] ModbusError),
}

/// Abstract byte channel to a Modbus bus.
///
/// `open`, `close` and `flush` default to no-ops for transports without a
/// connection lifecycle (the simulation). Blocking reads accept an
/// optional [`RunControl`] so a worker thread's stop request interrupts
/// the wait.
pub trait Transport {
    fn open(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Discard anything pending on the channel.
    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Write raw bytes to the bus.
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Read up to the remaining expected bytes, blocking at most
    /// `timeout`. `len == 0` means the expected length is not known yet -
    /// return whatever arrives first.
    fn read(
        &mut self,
        len: usize,
        timeout: Duration,
        control: Option<&RunControl>,
    ) -> Result<Vec<u8>, TransportError>;

    /// Cumulative `(written, read)` byte counters.
    fn telemetry(&mut self) -> Result<(u64, u64), TransportError>;

    /// Bus silence to keep after each unicast exchange.
    fn quiet_time(&self) -> Duration {
        Duration::ZERO
    }

    /// Drive every request of the bus list: write the frame, accumulate
    /// reply bytes (sizing reads with [`BusList::response_length`]), parse
    /// the reply, honor broadcast silence.
    ///
    /// `Timeout`, `EmptyAnswer` and `CommunicationError` abort the run and
    /// leave the list partially parsed - call [`BusList::clear`] before
    /// reuse. Frame-level parse errors advance past the failed slot and
    /// the run continues; the first such error is returned once the whole
    /// list was driven, so batch callers observe partial success. On a
    /// clean or partially-successful run the list ends empty.
    fn commands(
        &mut self,
        bus_list: &mut BusList,
        timeout: Duration,
        control: Option<&RunControl>,
    ) -> Result<(), TransportError> {
        let end = Instant::now() + timeout;
        let mut first_error = None;

        for index in 0..bus_list.len() {
            let request = &bus_list.requests()[index];
            let bytes = request.buffer.as_slice().to_vec();
            let expects_reply = request.expects_reply;
            let delay = request.timeout;
            let address = request.address;
            let function = request.function;

            if Instant::now() >= end {
                return Err(TransportError::Timeout);
            }

            self.write(&bytes)?;

            if !expects_reply {
                // broadcast - no reply, keep the bus silent while the
                // devices process the frame
                sleep_or_wait(delay, control);
                continue;
            }

            let mut answer: Vec<u8> = Vec::new();
            let mut expected = 0usize;
            loop {
                let now = Instant::now();
                if now >= end {
                    break;
                }
                let chunk = self.read(expected, end - now, control)?;
                answer.extend(chunk);

                let total = bus_list.response_length(&answer);
                if total >= 0 {
                    let total = total as usize;
                    if answer.len() >= total {
                        break;
                    }
                    expected = total - answer.len();
                } else {
                    // length unknown - keep accumulating until the
                    // deadline, the parser sorts it out
                    expected = 0;
                }
            }

            if answer.is_empty() {
                return Err(TransportError::EmptyAnswer { address, function });
            }

            if let Err(error) = bus_list.parse(&answer) {
                first_error.get_or_insert(error);
            }

            let quiet = self.quiet_time();
            if !quiet.is_zero() {
                sleep_or_wait(quiet, control);
            }
        }

        bus_list.clear();
        match first_error {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }
}

/// Sleep for `duration`, through the run control when one is given so a
/// stop request cuts the sleep short.
fn sleep_or_wait(duration: Duration, control: Option<&RunControl>) {
    match control {
        Some(control) => {
            control.wait_until(Instant::now() + duration);
        }
        None => std::thread::sleep(duration),
    }
}
