#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use ilcbus_core::ilc::electromechanical::{CalibrationData, ElectromechanicalResponses};
use ilcbus_core::ilc::firmware::FirmwareResponses;
use ilcbus_core::ilc::sensor::SensorResponses;
use ilcbus_core::ilc::thermal::ThermalResponses;
use ilcbus_core::ilc::{IlcResponses, ServerId};
use ilcbus_core::modbus::Buffer;

/// Records every callback an ILC bus list delivers, for assertions.
#[derive(Default)]
pub struct TestResponder {
    pub server_id_calls: u32,
    pub server_id: Option<(u8, ServerId)>,
    pub status: Option<(u8, u8, u16, u16)>,
    pub new_mode: Option<(u8, u16)>,
    pub temp_address: Option<(u8, u8)>,
    pub last_reset: Option<u8>,

    pub hardpoint: Option<(u8, u8, i32, f32)>,
    pub dca_gain: Option<(u8, f32, f32)>,
    pub lvdt: Option<(u8, f32, f32)>,
    pub saa: Option<(u8, u8, f32)>,
    pub daa: Option<(u8, u8, f32, f32)>,
    pub calibration: Option<(u8, CalibrationData)>,
    pub pressure: Option<(u8, f32, f32, f32, f32)>,

    pub thermal: Option<(u8, u8, f32, u8, f32)>,
    pub reheater: Option<(u8, f32, f32)>,

    pub sensors: Option<(u8, Vec<f32>)>,

    pub erased: u32,
    pub pages_written: u32,
    pub stats_written: u32,
    pub verified: Option<(u8, u16)>,
}

impl IlcResponses for TestResponder {
    fn server_id(&mut self, address: u8, id: ServerId) {
        self.server_id_calls += 1;
        self.server_id = Some((address, id));
    }

    fn server_status(&mut self, address: u8, mode: u8, status: u16, faults: u16) {
        self.status = Some((address, mode, status, faults));
    }

    fn change_mode(&mut self, address: u8, mode: u16) {
        self.new_mode = Some((address, mode));
    }

    fn set_temp_address(&mut self, address: u8, new_address: u8) {
        self.temp_address = Some((address, new_address));
    }

    fn reset_server(&mut self, address: u8) {
        self.last_reset = Some(address);
    }
}

impl ElectromechanicalResponses for TestResponder {
    fn hardpoint_force_status(
        &mut self,
        address: u8,
        status: u8,
        encoder_position: i32,
        load_cell_force: f32,
    ) {
        self.hardpoint = Some((address, status, encoder_position, load_cell_force));
    }

    fn dca_gain(&mut self, address: u8, primary: f32, secondary: f32) {
        self.dca_gain = Some((address, primary, secondary));
    }

    fn hardpoint_lvdt(&mut self, address: u8, breakaway: f32, displacement: f32) {
        self.lvdt = Some((address, breakaway, displacement));
    }

    fn saa_force_status(&mut self, address: u8, status: u8, primary: f32) {
        self.saa = Some((address, status, primary));
    }

    fn daa_force_status(&mut self, address: u8, status: u8, primary: f32, secondary: f32) {
        self.daa = Some((address, status, primary, secondary));
    }

    fn calibration_data(&mut self, address: u8, data: CalibrationData) {
        self.calibration = Some((address, data));
    }

    fn mezzanine_pressure(
        &mut self,
        address: u8,
        primary_push: f32,
        primary_pull: f32,
        secondary_push: f32,
        secondary_pull: f32,
    ) {
        self.pressure = Some((
            address,
            primary_push,
            primary_pull,
            secondary_push,
            secondary_pull,
        ));
    }
}

impl ThermalResponses for TestResponder {
    fn thermal_status(
        &mut self,
        address: u8,
        status: u8,
        differential_temperature: f32,
        fan_rpm: u8,
        absolute_temperature: f32,
    ) {
        self.thermal = Some((
            address,
            status,
            differential_temperature,
            fan_rpm,
            absolute_temperature,
        ));
    }

    fn reheater_gains(&mut self, address: u8, proportional_gain: f32, integral_gain: f32) {
        self.reheater = Some((address, proportional_gain, integral_gain));
    }
}

impl SensorResponses for TestResponder {
    fn sensor_values(&mut self, address: u8, values: Vec<f32>) {
        self.sensors = Some((address, values));
    }
}

impl FirmwareResponses for TestResponder {
    fn application_erased(&mut self, _address: u8) {
        self.erased += 1;
    }

    fn application_page_written(&mut self, _address: u8) {
        self.pages_written += 1;
    }

    fn application_stats_written(&mut self, _address: u8) {
        self.stats_written += 1;
    }

    fn application_verified(&mut self, address: u8, status: u16) {
        self.verified = Some((address, status));
    }
}

pub fn new_responder() -> Arc<Mutex<TestResponder>> {
    Arc::new(Mutex::new(TestResponder::default()))
}

/// Append a valid CRC to the given frame bytes.
pub fn reply(bytes: &[u8]) -> Vec<u8> {
    let mut buffer = Buffer::new();
    for b in bytes {
        buffer.write_u8(*b);
    }
    buffer.write_crc();
    buffer.into_vec()
}

/// A ServerID reply: unique ID 0x010203040506, application type 7, node
/// type 8, options 9/10, revision 11.12, firmware name "AbC".
pub fn server_id_reply(address: u8) -> Vec<u8> {
    let mut payload = vec![address, 17, 15];
    payload.extend(1..=12u8);
    payload.extend(b"AbC");
    reply(&payload)
}
