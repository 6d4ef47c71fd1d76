use std::time::Duration;

use crate::exec::RunControl;
use crate::modbus::Buffer;

use super::{Transport, TransportError};

/// Synthesizes device replies for the simulated transport. Every written
/// request is handed here together with a fresh [`Buffer`]; whatever the
/// generator composes into it becomes the bytes the next reads drain.
pub trait ResponseGenerator: Send {
    fn generate_response(&mut self, request: &[u8], response: &mut Buffer);
}

impl<F: FnMut(&[u8], &mut Buffer) + Send> ResponseGenerator for F {
    fn generate_response(&mut self, request: &[u8], response: &mut Buffer) {
        self(request, response)
    }
}

/// Pure in-memory transport for host-side tests and CI.
///
/// `write` feeds the request to the response generator; `read` drains the
/// generated bytes. No connection lifecycle, no timing - reads return
/// immediately with whatever is buffered.
pub struct SimulatedTransport<G: ResponseGenerator> {
    generator: G,
    response: Vec<u8>,
    bytes_written: u64,
    bytes_read: u64,
}

impl<G: ResponseGenerator> SimulatedTransport<G> {
    pub fn new(generator: G) -> Self {
        Self {
            generator,
            response: Vec::new(),
            bytes_written: 0,
            bytes_read: 0,
        }
    }
}

impl<G: ResponseGenerator> Transport for SimulatedTransport<G> {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut reply = Buffer::new();
        self.generator.generate_response(data, &mut reply);
        self.response.extend_from_slice(&reply);
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    fn read(
        &mut self,
        len: usize,
        _timeout: Duration,
        _control: Option<&RunControl>,
    ) -> Result<Vec<u8>, TransportError> {
        let take = if len == 0 {
            self.response.len()
        } else {
            len.min(self.response.len())
        };

        let bytes: Vec<u8> = self.response.drain(..take).collect();
        self.bytes_read += bytes.len() as u64;
        Ok(bytes)
    }

    fn telemetry(&mut self) -> Result<(u64, u64), TransportError> {
        Ok((self.bytes_written, self.bytes_read))
    }
}
