use std::collections::VecDeque;
use std::time::Duration;

use ilcbus_core::transport::fpga_serial::{fifo_cmd, FpgaSerialDevice, SerialFifo};
use ilcbus_core::transport::{Transport, TransportError};

/// Scripted FIFO pair: records everything written, serves reads from a
/// pre-loaded byte queue.
#[derive(Default)]
struct MockFifo {
    written: Vec<Vec<u8>>,
    responses: VecDeque<u8>,
}

impl MockFifo {
    fn preload(&mut self, bytes: &[u8]) {
        self.responses.extend(bytes);
    }
}

impl SerialFifo for MockFifo {
    fn write_fifo(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.written.push(data.to_vec());
        Ok(())
    }

    fn read_fifo(&mut self, len: usize, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let take = len.min(self.responses.len());
        Ok(self.responses.drain(..take).collect())
    }
}

#[test]
fn test_write_framing() {
    let mut device = FpgaSerialDevice::new(MockFifo::default(), Duration::ZERO);

    device.write(&[0x11, 0x22, 0x33]).unwrap();

    // header first, payload second
    let fifo = device.fifo_mut();
    assert_eq!(fifo.written[0], vec![fifo_cmd::WRITE, 3]);
    assert_eq!(fifo.written[1], vec![0x11, 0x22, 0x33]);
}

#[test]
fn test_read_round_trip() {
    let mut fifo = MockFifo::default();
    // echo, length, payload
    fifo.preload(&[fifo_cmd::READ, 4, 0xDE, 0xAD, 0xBE, 0xEF]);

    let mut device = FpgaSerialDevice::new(fifo, Duration::ZERO);
    let data = device.read(4, Duration::from_millis(50), None).unwrap();
    assert_eq!(data, vec![0xDE, 0xAD, 0xBE, 0xEF]);

    // the poll request went out
    assert_eq!(device.fifo_mut().written[0], vec![fifo_cmd::READ]);
}

#[test]
fn test_read_accumulates_chunks() {
    let mut fifo = MockFifo::default();
    fifo.preload(&[fifo_cmd::READ, 2, 0x01, 0x02]);
    fifo.preload(&[fifo_cmd::READ, 2, 0x03, 0x04]);

    let mut device = FpgaSerialDevice::new(fifo, Duration::ZERO);
    let data = device.read(4, Duration::from_millis(200), None).unwrap();
    assert_eq!(data, vec![0x01, 0x02, 0x03, 0x04]);
}

#[test]
fn test_error_response_carries_code() {
    let mut fifo = MockFifo::default();
    fifo.preload(&[fifo_cmd::ERROR_RESPONSE, 0xDE, 0xAD, 0xBE, 0xEF]);

    let mut device = FpgaSerialDevice::new(fifo, Duration::ZERO);
    assert!(matches!(
        device.read(1, Duration::from_millis(50), None),
        Err(TransportError::CommunicationError {
            request: fifo_cmd::READ,
            code: 0xDEADBEEF
        })
    ));
}

#[test]
fn test_flush_checks_echo() {
    let mut fifo = MockFifo::default();
    fifo.preload(&[fifo_cmd::FLUSH]);
    let mut device = FpgaSerialDevice::new(fifo, Duration::ZERO);
    device.flush().unwrap();

    let mut fifo = MockFifo::default();
    fifo.preload(&[fifo_cmd::WRITE]);
    let mut device = FpgaSerialDevice::new(fifo, Duration::ZERO);
    assert!(matches!(
        device.flush(),
        Err(TransportError::CommunicationError {
            request: fifo_cmd::FLUSH,
            ..
        })
    ));
}

#[test]
fn test_commands_over_fifo() {
    use std::sync::{Arc, Mutex};

    use ilcbus_core::ilc::IlcBusList;
    use ilcbus_core::ilc::{IlcResponses, ServerId};
    use ilcbus_core::modbus::Buffer;

    #[derive(Default)]
    struct StatusRecorder {
        status: Option<(u8, u8, u16, u16)>,
    }

    impl IlcResponses for StatusRecorder {
        fn server_id(&mut self, _address: u8, _id: ServerId) {}
        fn server_status(&mut self, address: u8, mode: u8, status: u16, faults: u16) {
            self.status = Some((address, mode, status, faults));
        }
        fn change_mode(&mut self, _address: u8, _mode: u16) {}
        fn set_temp_address(&mut self, _address: u8, _new_address: u8) {}
        fn reset_server(&mut self, _address: u8) {}
    }

    let responder = Arc::new(Mutex::new(StatusRecorder::default()));
    let mut ilc = IlcBusList::new(1, responder.clone());
    ilc.report_server_status(19);

    // script the device side: the reply frame arrives in one FIFO chunk
    let mut reply = Buffer::new();
    reply.write_u8(19);
    reply.write_u8(18);
    reply.write_u8(2);
    reply.write_u16(0x0008);
    reply.write_u16(0);
    reply.write_crc();

    let mut fifo = MockFifo::default();
    fifo.preload(&[fifo_cmd::READ, reply.len() as u8]);
    fifo.preload(&reply);

    let mut device = FpgaSerialDevice::new(fifo, Duration::from_micros(50));
    device
        .commands(ilc.as_mut(), Duration::from_millis(100), None)
        .unwrap();

    assert_eq!(
        responder.lock().unwrap().status,
        Some((19, 2, 0x0008, 0))
    );

    // request framing went out before the poll
    let fifo = device.fifo_mut();
    assert_eq!(fifo.written[0], vec![fifo_cmd::WRITE, 4]);
    assert_eq!(fifo.written[1].len(), 4);
    assert_eq!(fifo.written[2], vec![fifo_cmd::READ]);
}

#[test]
fn test_telemetry_counters_from_device() {
    let mut fifo = MockFifo::default();
    fifo.preload(&[fifo_cmd::TELEMETRY]);
    fifo.preload(&1234u64.to_be_bytes());
    fifo.preload(&567u64.to_be_bytes());

    let mut device = FpgaSerialDevice::new(fifo, Duration::ZERO);
    assert_eq!(device.telemetry().unwrap(), (1234, 567));
}
