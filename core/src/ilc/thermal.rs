//! Thermal ILCs - one heater/fan channel per controller.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::modbus::{BusList, ModbusError, Parser};

use super::{IlcBusList, IlcResponses};

/// Function codes added on top of the common ILC set.
pub mod cmd {
    pub const SET_THERMAL_DEMAND: u8 = 88;
    pub const REPORT_THERMAL_STATUS: u8 = 89;
    pub const SET_REHEATER_GAINS: u8 = 92;
    pub const REPORT_REHEATER_GAINS: u8 = 93;
}

/// Number of thermal ILCs addressed by one demand broadcast.
pub const THERMAL_ILC_COUNT: usize = 96;

bitflags::bitflags! {
    /// Thermal-specific bits of the function 18 status word, extending the
    /// generic [`IlcStatus`] set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThermalIlcStatus: u16 {
        const REF_RESISTOR = 0x0040;
        const RTD_ERROR = 0x0080;
        const HEATER_BREAKER = 0x0400;
        const FAN_BREAKER = 0x0800;
        const _ = !0;
    }
}

bitflags::bitflags! {
    /// Status byte of the thermal demand/status replies (functions 88/89).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThermalStatus: u8 {
        const ILC_FAULT = 0x01;
        const HEATER_DISABLED = 0x02;
        const HEATER_BREAKER_OPEN = 0x04;
        const FAN_BREAKER_OPEN = 0x08;
        const _ = !0;
    }
}

/// Callbacks for thermal replies. Setting a demand (88) answers with the
/// same payload as the status report (89).
pub trait ThermalResponses: IlcResponses {
    fn thermal_status(
        &mut self,
        address: u8,
        status: u8,
        differential_temperature: f32,
        fan_rpm: u8,
        absolute_temperature: f32,
    );

    fn reheater_gains(&mut self, address: u8, proportional_gain: f32, integral_gain: f32);
}

/// ILC bus list for the thermal bus.
pub struct ThermalIlc {
    ilc: IlcBusList,
}

impl ThermalIlc {
    pub fn new<R: ThermalResponses + 'static>(bus: u8, responder: Arc<Mutex<R>>) -> Self {
        let mut ilc = IlcBusList::new(bus, responder.clone());

        let thermal_status = |r: Arc<Mutex<R>>| {
            Box::new(move |parser: &mut Parser| -> Result<(), ModbusError> {
                let status = parser.read_u8()?;
                let differential_temperature = parser.read_f32()?;
                let fan_rpm = parser.read_u8()?;
                let absolute_temperature = parser.read_f32()?;
                parser.check_crc()?;
                r.lock().unwrap().thermal_status(
                    parser.address(),
                    status,
                    differential_temperature,
                    fan_rpm,
                    absolute_temperature,
                );
                Ok(())
            })
        };
        ilc.add_response(cmd::SET_THERMAL_DEMAND, thermal_status(responder.clone()), None);
        ilc.add_response(
            cmd::REPORT_THERMAL_STATUS,
            thermal_status(responder.clone()),
            None,
        );

        ilc.add_response(
            cmd::SET_REHEATER_GAINS,
            Box::new(|parser| parser.check_crc()),
            None,
        );

        let r = responder;
        ilc.add_response(
            cmd::REPORT_REHEATER_GAINS,
            Box::new(move |parser| {
                let proportional_gain = parser.read_f32()?;
                let integral_gain = parser.read_f32()?;
                parser.check_crc()?;
                r.lock()
                    .unwrap()
                    .reheater_gains(parser.address(), proportional_gain, integral_gain);
                Ok(())
            }),
            None,
        );

        ilc.set_length_hint(Box::new(|partial| {
            if partial.len() < 2 {
                return -1;
            }
            match partial[1] {
                cmd::SET_THERMAL_DEMAND | cmd::REPORT_THERMAL_STATUS => 14,
                cmd::SET_REHEATER_GAINS => 4,
                cmd::REPORT_REHEATER_GAINS => 12,
                _ => super::ilc_response_length(partial),
            }
        }));

        Self { ilc }
    }

    /// Set heater PWM and fan RPM demand for one ILC - function 88 (0x58).
    pub fn set_thermal_demand(&mut self, address: u8, heater_pwm: u8, fan_rpm: u8) {
        self.ilc.call_function(
            address,
            cmd::SET_THERMAL_DEMAND,
            Duration::from_micros(500),
            (heater_pwm, fan_rpm),
        );
    }

    /// Read thermal status - function 89 (0x59).
    pub fn report_thermal_status(&mut self, address: u8) {
        self.ilc.call_function(
            address,
            cmd::REPORT_THERMAL_STATUS,
            Duration::from_micros(300),
            (),
        );
    }

    /// Set reheater PID gains - function 92 (0x5C).
    pub fn set_reheater_gains(&mut self, address: u8, proportional: f32, integral: f32) {
        self.ilc.call_function(
            address,
            cmd::SET_REHEATER_GAINS,
            Duration::from_micros(500),
            (proportional, integral),
        );
    }

    /// Read reheater PID gains - function 93 (0x5D).
    pub fn report_reheater_gains(&mut self, address: u8) {
        self.ilc.call_function(
            address,
            cmd::REPORT_REHEATER_GAINS,
            Duration::from_micros(300),
            (),
        );
    }

    /// Broadcast heater and fan demand to all 96 thermal ILCs in one
    /// frame - function 88 to group address 250. Payload interleaves
    /// `(heater_pwm, fan_rpm)` per ILC in bus order; no reply follows, the
    /// bus stays silent for 450 us.
    pub fn broadcast_thermal_demand(
        &mut self,
        heater_pwm: &[u8; THERMAL_ILC_COUNT],
        fan_rpm: &[u8; THERMAL_ILC_COUNT],
    ) {
        let mut params = Vec::with_capacity(THERMAL_ILC_COUNT * 2);
        for i in 0..THERMAL_ILC_COUNT {
            params.push(heater_pwm[i]);
            params.push(fan_rpm[i]);
        }
        let counter = self.ilc.next_broadcast_counter();
        self.ilc.broadcast_function(
            250,
            cmd::SET_THERMAL_DEMAND,
            Duration::from_micros(450),
            counter,
            &params,
        );
    }

    /// Status word decoding including the thermal-specific bits.
    pub fn status_strings(&self, status: u16) -> Vec<&'static str> {
        let mut ret = self.ilc.status_strings(status);
        let status = ThermalIlcStatus::from_bits_retain(status);
        if status.contains(ThermalIlcStatus::REF_RESISTOR) {
            ret.push("Ref Resistor Error");
        }
        if status.contains(ThermalIlcStatus::RTD_ERROR) {
            ret.push("RTD Error");
        }
        if status.contains(ThermalIlcStatus::HEATER_BREAKER) {
            ret.push("Heater Breaker Failed");
        }
        if status.contains(ThermalIlcStatus::FAN_BREAKER) {
            ret.push("Fan Breaker Failed");
        }
        ret
    }

    /// Decode the status byte of a demand/status reply.
    pub fn thermal_status_strings(&self, status: u8) -> Vec<&'static str> {
        let status = ThermalStatus::from_bits_retain(status);
        let mut ret = Vec::new();
        if status.contains(ThermalStatus::ILC_FAULT) {
            ret.push("ILC Fault");
        }
        if status.contains(ThermalStatus::HEATER_DISABLED) {
            ret.push("Heater Disabled");
        }
        if status.contains(ThermalStatus::HEATER_BREAKER_OPEN) {
            ret.push("Heater Breaker Open");
        }
        if status.contains(ThermalStatus::FAN_BREAKER_OPEN) {
            ret.push("Fan Breaker Open");
        }
        ret
    }
}

impl Deref for ThermalIlc {
    type Target = IlcBusList;

    fn deref(&self) -> &IlcBusList {
        &self.ilc
    }
}

impl DerefMut for ThermalIlc {
    fn deref_mut(&mut self) -> &mut IlcBusList {
        &mut self.ilc
    }
}

impl AsMut<BusList> for ThermalIlc {
    fn as_mut(&mut self) -> &mut BusList {
        self.ilc.as_mut()
    }
}
