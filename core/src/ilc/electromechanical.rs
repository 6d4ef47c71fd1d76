//! Electromechanical (hardpoint) and pneumatic (force actuator) ILCs.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::modbus::{BusList, Int24, ModbusError, Parser};

use super::{IlcBusList, IlcResponses};

/// Function codes added on top of the common ILC set.
pub mod cmd {
    pub const SET_STEPPER_STEPS: u8 = 66;
    pub const STEPPER_FORCE_STATUS: u8 = 67;
    pub const SET_DCA_GAIN: u8 = 73;
    pub const REPORT_DCA_GAIN: u8 = 74;
    pub const SET_FORCE_OFFSET: u8 = 75;
    pub const REPORT_FA_FORCE_STATUS: u8 = 76;
    pub const SET_OFFSET_AND_SENSITIVITY: u8 = 81;
    pub const REPORT_CALIBRATION_DATA: u8 = 110;
    pub const REPORT_MEZZANINE_PRESSURE: u8 = 119;
    pub const REPORT_HARDPOINT_LVDT: u8 = 122;
}

/// Calibration block returned by function 110: per-channel ADC gains,
/// offsets and sensitivities for the main and backup converters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalibrationData {
    pub main_adc_k: [f32; 4],
    pub main_offset: [f32; 4],
    pub main_sensitivity: [f32; 4],
    pub backup_adc_k: [f32; 4],
    pub backup_offset: [f32; 4],
    pub backup_sensitivity: [f32; 4],
}

/// Callbacks for electromechanical/pneumatic replies.
///
/// Function 76 replies come in two shapes: 9 bytes for a single-axis
/// actuator, 13 bytes for a dual-axis one. The handler dispatches on the
/// frame length, so the two variants get separate callbacks.
pub trait ElectromechanicalResponses: IlcResponses {
    fn hardpoint_force_status(
        &mut self,
        address: u8,
        status: u8,
        encoder_position: i32,
        load_cell_force: f32,
    );

    fn dca_gain(&mut self, address: u8, primary: f32, secondary: f32);

    fn hardpoint_lvdt(&mut self, address: u8, breakaway: f32, displacement: f32);

    fn saa_force_status(&mut self, address: u8, status: u8, primary: f32);

    fn daa_force_status(&mut self, address: u8, status: u8, primary: f32, secondary: f32);

    fn calibration_data(&mut self, address: u8, data: CalibrationData);

    fn mezzanine_pressure(
        &mut self,
        address: u8,
        primary_push: f32,
        primary_pull: f32,
        secondary_push: f32,
        secondary_pull: f32,
    );
}

/// ILC bus list for hardpoint and force-actuator buses.
pub struct ElectromechanicalPneumaticIlc {
    ilc: IlcBusList,
}

impl ElectromechanicalPneumaticIlc {
    pub fn new<R: ElectromechanicalResponses + 'static>(bus: u8, responder: Arc<Mutex<R>>) -> Self {
        let mut ilc = IlcBusList::new(bus, responder.clone());

        let force_status = |r: Arc<Mutex<R>>| {
            Box::new(move |parser: &mut Parser| -> Result<(), ModbusError> {
                let status = parser.read_u8()?;
                let encoder_position = parser.read_i32()?;
                let load_cell_force = parser.read_f32()?;
                parser.check_crc()?;
                r.lock().unwrap().hardpoint_force_status(
                    parser.address(),
                    status,
                    encoder_position,
                    load_cell_force,
                );
                Ok(())
            })
        };
        ilc.add_response(cmd::SET_STEPPER_STEPS, force_status(responder.clone()), None);
        ilc.add_response(cmd::STEPPER_FORCE_STATUS, force_status(responder.clone()), None);

        ilc.add_response(
            cmd::SET_DCA_GAIN,
            Box::new(|parser| parser.check_crc()),
            None,
        );

        let r = responder.clone();
        ilc.add_response(
            cmd::REPORT_DCA_GAIN,
            Box::new(move |parser| {
                let primary = parser.read_f32()?;
                let secondary = parser.read_f32()?;
                parser.check_crc()?;
                r.lock().unwrap().dca_gain(parser.address(), primary, secondary);
                Ok(())
            }),
            None,
        );

        // 75 and 76 both answer with the force actuator status; the reply
        // length tells single-axis (9 bytes) from dual-axis (13 bytes)
        let fa_force_status = |r: Arc<Mutex<R>>| {
            Box::new(move |parser: &mut Parser| -> Result<(), ModbusError> {
                let status = parser.read_u8()?;
                let primary = parser.read_f32()?;
                match parser.len() {
                    9 => {
                        parser.check_crc()?;
                        r.lock().unwrap().saa_force_status(parser.address(), status, primary);
                    }
                    13 => {
                        let secondary = parser.read_f32()?;
                        parser.check_crc()?;
                        r.lock().unwrap().daa_force_status(
                            parser.address(),
                            status,
                            primary,
                            secondary,
                        );
                    }
                    received => {
                        return Err(ModbusError::InvalidLength {
                            received,
                            expected: "9 or 13",
                        });
                    }
                }
                Ok(())
            })
        };
        ilc.add_response(cmd::SET_FORCE_OFFSET, fa_force_status(responder.clone()), None);
        ilc.add_response(
            cmd::REPORT_FA_FORCE_STATUS,
            fa_force_status(responder.clone()),
            None,
        );

        ilc.add_response(
            cmd::SET_OFFSET_AND_SENSITIVITY,
            Box::new(|parser| parser.check_crc()),
            None,
        );

        let r = responder.clone();
        ilc.add_response(
            cmd::REPORT_CALIBRATION_DATA,
            Box::new(move |parser| {
                let mut read4 = |parser: &mut Parser| -> Result<[f32; 4], ModbusError> {
                    Ok([
                        parser.read_f32()?,
                        parser.read_f32()?,
                        parser.read_f32()?,
                        parser.read_f32()?,
                    ])
                };
                let data = CalibrationData {
                    main_adc_k: read4(parser)?,
                    main_offset: read4(parser)?,
                    main_sensitivity: read4(parser)?,
                    backup_adc_k: read4(parser)?,
                    backup_offset: read4(parser)?,
                    backup_sensitivity: read4(parser)?,
                };
                parser.check_crc()?;
                r.lock().unwrap().calibration_data(parser.address(), data);
                Ok(())
            }),
            None,
        );

        let r = responder.clone();
        ilc.add_response(
            cmd::REPORT_MEZZANINE_PRESSURE,
            Box::new(move |parser| {
                let primary_push = parser.read_f32()?;
                let primary_pull = parser.read_f32()?;
                let secondary_pull = parser.read_f32()?;
                let secondary_push = parser.read_f32()?;
                parser.check_crc()?;
                r.lock().unwrap().mezzanine_pressure(
                    parser.address(),
                    primary_push,
                    primary_pull,
                    secondary_push,
                    secondary_pull,
                );
                Ok(())
            }),
            None,
        );

        let r = responder;
        ilc.add_response(
            cmd::REPORT_HARDPOINT_LVDT,
            Box::new(move |parser| {
                let breakaway = parser.read_f32()?;
                let displacement = parser.read_f32()?;
                parser.check_crc()?;
                r.lock().unwrap().hardpoint_lvdt(parser.address(), breakaway, displacement);
                Ok(())
            }),
            None,
        );

        ilc.set_length_hint(Box::new(|partial| {
            if partial.len() < 2 {
                return -1;
            }
            match partial[1] {
                cmd::SET_STEPPER_STEPS | cmd::STEPPER_FORCE_STATUS => 13,
                cmd::SET_DCA_GAIN | cmd::SET_OFFSET_AND_SENSITIVITY => 4,
                cmd::REPORT_DCA_GAIN | cmd::REPORT_HARDPOINT_LVDT => 12,
                cmd::REPORT_CALIBRATION_DATA => 100,
                cmd::REPORT_MEZZANINE_PRESSURE => 20,
                // 75/76 answer 9 or 13 bytes depending on the actuator -
                // length cannot be told from the reply alone
                cmd::SET_FORCE_OFFSET | cmd::REPORT_FA_FORCE_STATUS => -1,
                _ => super::ilc_response_length(partial),
            }
        }));

        Self { ilc }
    }

    /// Command hardpoint stepper motion - function 66 (0x42). The reply
    /// mirrors the force/status report.
    pub fn set_stepper_steps(&mut self, address: u8, steps: i8) {
        self.ilc.call_function(
            address,
            cmd::SET_STEPPER_STEPS,
            Duration::from_micros(1800),
            steps,
        );
    }

    /// Hardpoint force and status request - function 67 (0x43).
    pub fn report_hardpoint_force_status(&mut self, address: u8) {
        self.ilc.call_function(
            address,
            cmd::STEPPER_FORCE_STATUS,
            Duration::from_micros(1800),
            (),
        );
    }

    /// Set DCA booster valve gains - function 73 (0x49).
    pub fn set_dca_gain(&mut self, address: u8, primary: f32, secondary: f32) {
        self.ilc.call_function(
            address,
            cmd::SET_DCA_GAIN,
            Duration::from_micros(40000),
            (primary, secondary),
        );
    }

    /// Read DCA booster valve gains - function 74 (0x4A).
    pub fn report_dca_gain(&mut self, address: u8) {
        self.ilc.call_function(
            address,
            cmd::REPORT_DCA_GAIN,
            Duration::from_micros(2000),
            (),
        );
    }

    /// Single-axis force offset - function 75 (0x4B). The force is sent as
    /// a 24-bit signed value scaled by 1000.
    pub fn set_saa_force_offset(&mut self, address: u8, slew_flag: bool, primary: f32) {
        self.ilc.call_function(
            address,
            cmd::SET_FORCE_OFFSET,
            Duration::from_micros(1800),
            (
                if slew_flag { 0xFFu8 } else { 0x00u8 },
                Int24((primary * 1000.0) as i32),
            ),
        );
    }

    /// Dual-axis force offset - function 75 (0x4B).
    pub fn set_daa_force_offset(
        &mut self,
        address: u8,
        slew_flag: bool,
        primary: f32,
        secondary: f32,
    ) {
        self.ilc.call_function(
            address,
            cmd::SET_FORCE_OFFSET,
            Duration::from_micros(1800),
            (
                if slew_flag { 0xFFu8 } else { 0x00u8 },
                Int24((primary * 1000.0) as i32),
                Int24((secondary * 1000.0) as i32),
            ),
        );
    }

    /// Force actuator force and status request - function 76 (0x4C).
    pub fn report_force_actuator_force_status(&mut self, address: u8) {
        self.ilc.call_function(
            address,
            cmd::REPORT_FA_FORCE_STATUS,
            Duration::from_micros(1800),
            (),
        );
    }

    /// Set ADC channel offset and sensitivity - function 81 (0x51).
    pub fn set_offset_and_sensitivity(
        &mut self,
        address: u8,
        channel: u8,
        offset: f32,
        sensitivity: f32,
    ) {
        self.ilc.call_function(
            address,
            cmd::SET_OFFSET_AND_SENSITIVITY,
            Duration::from_micros(36500),
            (channel, offset, sensitivity),
        );
    }

    /// Read the ADC calibration block - function 110 (0x6E).
    pub fn report_calibration_data(&mut self, address: u8) {
        self.ilc.call_function(
            address,
            cmd::REPORT_CALIBRATION_DATA,
            Duration::from_micros(1800),
            (),
        );
    }

    /// Read mezzanine pressures - function 119 (0x77).
    pub fn report_mezzanine_pressure(&mut self, address: u8) {
        self.ilc.call_function(
            address,
            cmd::REPORT_MEZZANINE_PRESSURE,
            Duration::from_micros(1800),
            (),
        );
    }

    /// Read hardpoint LVDTs - function 122 (0x7A).
    pub fn report_hardpoint_lvdt(&mut self, address: u8) {
        self.ilc.call_function(
            address,
            cmd::REPORT_HARDPOINT_LVDT,
            Duration::from_micros(400),
            (),
        );
    }
}

impl Deref for ElectromechanicalPneumaticIlc {
    type Target = IlcBusList;

    fn deref(&self) -> &IlcBusList {
        &self.ilc
    }
}

impl DerefMut for ElectromechanicalPneumaticIlc {
    fn deref_mut(&mut self) -> &mut IlcBusList {
        &mut self.ilc
    }
}

impl AsMut<BusList> for ElectromechanicalPneumaticIlc {
    fn as_mut(&mut self) -> &mut BusList {
        self.ilc.as_mut()
    }
}
