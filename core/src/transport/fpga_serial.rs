use std::time::{Duration, Instant};

use crate::exec::RunControl;

use super::{Transport, TransportError};

/// Command codes written into the FPGA command FIFO. Each operation is a
/// `(code, length)` header followed by `length` payload bytes; the reply
/// echoes the code. The values are an implementation choice, but stable
/// across peers - the FPGA personality uses the same table.
pub mod fifo_cmd {
    pub const WRITE: u8 = 1;
    pub const READ: u8 = 2;
    pub const FLUSH: u8 = 3;
    pub const TELEMETRY: u8 = 4;
    pub const ERROR_RESPONSE: u8 = 255;
}

/// Raw FIFO pair on the FPGA. The NI vendor binding implements this on
/// the cRIO; tests script it.
pub trait SerialFifo: Send {
    /// Push bytes into the command FIFO.
    fn write_fifo(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Pull exactly `len` bytes from the response FIFO, waiting at most
    /// `timeout`.
    fn read_fifo(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;
}

/// Poll interval while waiting for response bytes to show up.
const READ_POLL: Duration = Duration::from_millis(10);

/// Timeout for the FIFO round-trips themselves (header echo, length).
const FIFO_TIMEOUT: Duration = Duration::from_millis(1);

/// Serial bus reached through an FPGA command/response FIFO pair.
///
/// Every write is framed as `(WRITE, len)` plus the payload; reads are
/// polled with `(READ)` requests, each answered by an echo, a length byte
/// and that many data bytes. An `ERROR_RESPONSE` echo carries a 32-bit
/// big-endian error code and surfaces as
/// [`TransportError::CommunicationError`].
pub struct FpgaSerialDevice<F: SerialFifo> {
    fifo: F,
    quiet_time: Duration,
    bytes_written: u64,
    bytes_read: u64,
}

impl<F: SerialFifo> FpgaSerialDevice<F> {
    pub fn new(fifo: F, quiet_time: Duration) -> Self {
        Self {
            fifo,
            quiet_time,
            bytes_written: 0,
            bytes_read: 0,
        }
    }

    /// Access the underlying FIFO pair (simulations, tests).
    pub fn fifo_mut(&mut self) -> &mut F {
        &mut self.fifo
    }

    fn check_echo(&mut self, request: u8, echo: u8) -> Result<(), TransportError> {
        if echo == fifo_cmd::ERROR_RESPONSE {
            let code = self.fifo.read_fifo(4, FIFO_TIMEOUT)?;
            if code.len() == 4 {
                return Err(TransportError::CommunicationError {
                    request,
                    code: u32::from_be_bytes([code[0], code[1], code[2], code[3]]),
                });
            }
            return Err(TransportError::CommunicationError { request, code: 0 });
        }
        if echo != request {
            return Err(TransportError::CommunicationError {
                request,
                code: u32::from(echo),
            });
        }
        Ok(())
    }
}

impl<F: SerialFifo> Transport for FpgaSerialDevice<F> {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        debug_assert!(data.len() < 255, "frame too long for one FIFO write");

        self.fifo.write_fifo(&[fifo_cmd::WRITE, data.len() as u8])?;
        self.fifo.write_fifo(data)?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    fn read(
        &mut self,
        len: usize,
        timeout: Duration,
        control: Option<&RunControl>,
    ) -> Result<Vec<u8>, TransportError> {
        let end = Instant::now() + timeout;
        let mut ret = Vec::new();
        let mut first = true;

        loop {
            if !first {
                let wait_end = (Instant::now() + READ_POLL).min(end);
                match control {
                    Some(control) => {
                        if !control.wait_until(wait_end) {
                            break;
                        }
                    }
                    None => std::thread::sleep(wait_end.saturating_duration_since(Instant::now())),
                }
            }
            first = false;

            self.fifo.write_fifo(&[fifo_cmd::READ])?;
            let echo = self.fifo.read_fifo(1, FIFO_TIMEOUT)?;
            if echo.is_empty() {
                return Err(TransportError::CommunicationError {
                    request: fifo_cmd::READ,
                    code: 0,
                });
            }
            self.check_echo(fifo_cmd::READ, echo[0])?;

            let length = self.fifo.read_fifo(1, FIFO_TIMEOUT)?;
            let length = usize::from(*length.first().unwrap_or(&0));
            if length > 0 {
                let data = self.fifo.read_fifo(length, FIFO_TIMEOUT)?;
                self.bytes_read += data.len() as u64;
                ret.extend(data);
                if ret.len() >= len {
                    break;
                }
            }

            if Instant::now() >= end {
                break;
            }
        }

        Ok(ret)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.fifo.write_fifo(&[fifo_cmd::FLUSH])?;
        let echo = self.fifo.read_fifo(1, FIFO_TIMEOUT)?;
        self.check_echo(fifo_cmd::FLUSH, *echo.first().unwrap_or(&0))
    }

    fn telemetry(&mut self) -> Result<(u64, u64), TransportError> {
        self.fifo.write_fifo(&[fifo_cmd::TELEMETRY])?;
        let echo = self.fifo.read_fifo(1, FIFO_TIMEOUT)?;
        self.check_echo(fifo_cmd::TELEMETRY, *echo.first().unwrap_or(&0))?;

        let data = self.fifo.read_fifo(16, FIFO_TIMEOUT)?;
        if data.len() != 16 {
            return Err(TransportError::CommunicationError {
                request: fifo_cmd::TELEMETRY,
                code: data.len() as u32,
            });
        }
        let mut written = [0u8; 8];
        written.copy_from_slice(&data[0..8]);
        let mut read = [0u8; 8];
        read.copy_from_slice(&data[8..16]);
        Ok((u64::from_be_bytes(written), u64::from_be_bytes(read)))
    }

    fn quiet_time(&self) -> Duration {
        self.quiet_time
    }
}
