//! Sensor monitor ILCs - temperature, displacement and inclinometer
//! application firmwares, all answering function 84 with a row of floats.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::modbus::{BusList, ModbusError};

use super::{IlcBusList, IlcResponses};

/// Readout of measured sensor values.
pub const SENSOR_VALUES: u8 = 84;

/// Callback for sensor value replies.
pub trait SensorResponses: IlcResponses {
    fn sensor_values(&mut self, address: u8, values: Vec<f32>);
}

/// ILC bus list for sensor monitor buses.
///
/// The function 84 reply carries one `f32` per sensor channel with no
/// count field; with the 2-byte header and 2-byte CRC the frame length
/// must be a multiple of 4, and `(len - 4) / 4` values follow.
pub struct SensorMonitorIlc {
    ilc: IlcBusList,
}

impl SensorMonitorIlc {
    pub fn new<R: SensorResponses + 'static>(bus: u8, responder: Arc<Mutex<R>>) -> Self {
        let mut ilc = IlcBusList::new(bus, responder.clone());

        ilc.add_response(
            SENSOR_VALUES,
            Box::new(move |parser| {
                if parser.len() % 4 != 0 {
                    return Err(ModbusError::InvalidLength {
                        received: parser.len(),
                        expected: "a multiple of 4",
                    });
                }
                let count = parser.len() / 4 - 1;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(parser.read_f32()?);
                }
                parser.check_crc()?;
                responder.lock().unwrap().sensor_values(parser.address(), values);
                Ok(())
            }),
            None,
        );

        Self { ilc }
    }

    /// Request measured sensor values - function 84 (0x54).
    pub fn report_sensor_values(&mut self, address: u8) {
        self.ilc
            .call_function(address, SENSOR_VALUES, Duration::from_micros(400), ());
    }
}

impl Deref for SensorMonitorIlc {
    type Target = IlcBusList;

    fn deref(&self) -> &IlcBusList {
        &self.ilc
    }
}

impl DerefMut for SensorMonitorIlc {
    fn deref_mut(&mut self) -> &mut IlcBusList {
        &mut self.ilc
    }
}

impl AsMut<BusList> for SensorMonitorIlc {
    fn as_mut(&mut self) -> &mut BusList {
        self.ilc.as_mut()
    }
}
