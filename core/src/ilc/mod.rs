//! Inner-Loop Controller bus lists.
//!
//! [`IlcBusList`] layers the function set every ILC implements (identify,
//! status, mode change, temporary addressing, reset) on top of the generic
//! [`BusList`]. The domain lists - electromechanical/pneumatic, thermal,
//! sensor monitor - and the firmware programmer extend it with their own
//! function sets.
//!
//! Reply decoding is delivered through responder traits. A controller
//! implements [`IlcResponses`] (and the domain extension traits) and hands
//! itself in as `Arc<Mutex<_>>`; the registered handlers capture the `Arc`,
//! so the controller outlives the bus list while both see one state.

pub mod electromechanical;
pub mod firmware;
pub mod sensor;
pub mod thermal;

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::modbus::{BusList, ModbusError, ERROR_MASK};

/// Common ILC function codes.
pub mod cmd {
    pub const SERVER_ID: u8 = 17;
    pub const SERVER_STATUS: u8 = 18;
    pub const CHANGE_MODE: u8 = 65;
    pub const SET_TEMP_ADDRESS: u8 = 72;
    pub const RESET_SERVER: u8 = 107;
}

/// ILC operating modes. `Bootloader` is never requested - ILCs report it
/// in status replies after a transition into `FirmwareUpdate` handed
/// control to the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    Standby = 0,
    Disabled = 1,
    Enabled = 2,
    FirmwareUpdate = 3,
    Fault = 4,
    ClearFaults = 5,
    Bootloader = 6,
}

/// Human-readable mode name, as reported in status replies.
pub fn mode_str(mode: u8) -> &'static str {
    match mode {
        0 => "Standby",
        1 => "Disabled",
        2 => "Enabled",
        3 => "Firmware Update",
        4 => "Fault",
        5 => "Clear Faults",
        6 => "Bootloader",
        _ => "unknown",
    }
}

bitflags::bitflags! {
    /// Status word of the function 18 reply. Bits above `FAULT_OVERRIDE`
    /// are domain-specific; see the thermal extension.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IlcStatus: u16 {
        const MAJOR_FAULT = 0x0001;
        const MINOR_FAULT = 0x0002;
        // 0x0004 reserved
        const FAULT_OVERRIDE = 0x0008;
        const _ = !0;
    }
}

bitflags::bitflags! {
    /// Fault word of the function 18 reply.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IlcFault: u16 {
        const UNIQUE_ID_CRC = 0x0001;
        const APP_TYPE = 0x0002;
        const NO_ILC = 0x0004;
        const ILC_APP_CRC = 0x0008;
        const NO_TEDS = 0x0010;
        const TEDS1 = 0x0020;
        const TEDS2 = 0x0040;
        // 0x0080 reserved
        const WATCHDOG_RESET = 0x0100;
        const BROWN_OUT = 0x0200;
        const EVENT_TRAP = 0x0400;
        // 0x0800 electromechanical only
        const SSR = 0x1000;
        const AUX = 0x2000;
        const _ = !0;
    }
}

/// Expected total reply length for the common ILC function set, judged
/// from the partial bytes received so far. -1 when it cannot be told yet
/// (or the function is not a common one). Used by transports to size
/// reads; the domain lists wrap this with their own tables.
pub fn ilc_response_length(partial: &[u8]) -> i32 {
    if partial.len() < 2 {
        return -1;
    }
    if partial[1] & ERROR_MASK != 0 {
        // error-mask reply: address, function, exception code, CRC
        return 5;
    }
    match partial[1] {
        cmd::SERVER_ID => {
            if partial.len() < 3 {
                -1
            } else {
                i32::from(partial[2]) + 5
            }
        }
        cmd::SERVER_STATUS => 9,
        cmd::CHANGE_MODE => 6,
        cmd::SET_TEMP_ADDRESS => 5,
        cmd::RESET_SERVER => 4,
        _ => -1,
    }
}

/// Identity block returned by the ServerID call (function 17).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerId {
    pub unique_id: u64,
    pub app_type: u8,
    pub node_type: u8,
    pub selected_options: u8,
    pub node_options: u8,
    pub major_rev: u8,
    pub minor_rev: u8,
    pub firmware_name: String,
}

/// Callbacks for the common ILC replies. Implementors receive decoded
/// payloads; raw mode/status/fault words are passed through untouched so
/// observed-only values (such as `Bootloader`) survive the trip.
pub trait IlcResponses: Send {
    fn server_id(&mut self, address: u8, id: ServerId);

    fn server_status(&mut self, address: u8, mode: u8, status: u16, faults: u16);

    fn change_mode(&mut self, address: u8, mode: u16);

    fn set_temp_address(&mut self, address: u8, new_address: u8);

    fn reset_server(&mut self, address: u8);
}

/// Bus list speaking the common ILC function set.
///
/// Construction registers handlers for functions 17, 18, 65, 72 and 107.
/// The most recently observed mode per address is cached and drives the
/// mode-change timeout selection (bootloader switches take far longer than
/// regular transitions).
pub struct IlcBusList {
    list: BusList,
    bus: u8,
    broadcast_counter: u8,
    last_mode: Arc<Mutex<HashMap<u8, u8>>>,
}

impl IlcBusList {
    pub fn new<R: IlcResponses + 'static>(bus: u8, responder: Arc<Mutex<R>>) -> Self {
        let mut list = BusList::new();
        let last_mode = Arc::new(Mutex::new(HashMap::new()));

        let r = responder.clone();
        list.add_response(
            cmd::SERVER_ID,
            Box::new(move |parser| {
                let len = parser.read_u8()?;
                if len < 12 {
                    return Err(ModbusError::InvalidLength {
                        received: len as usize,
                        expected: "at least 12",
                    });
                }
                let id = ServerId {
                    unique_id: parser.read_u48()?,
                    app_type: parser.read_u8()?,
                    node_type: parser.read_u8()?,
                    selected_options: parser.read_u8()?,
                    node_options: parser.read_u8()?,
                    major_rev: parser.read_u8()?,
                    minor_rev: parser.read_u8()?,
                    firmware_name: parser.read_string(usize::from(len) - 12)?,
                };
                parser.check_crc()?;
                r.lock().unwrap().server_id(parser.address(), id);
                Ok(())
            }),
            None,
        );

        let r = responder.clone();
        let modes = last_mode.clone();
        list.add_response(
            cmd::SERVER_STATUS,
            Box::new(move |parser| {
                let mode = parser.read_u8()?;
                let status = parser.read_u16()?;
                let faults = parser.read_u16()?;
                parser.check_crc()?;
                modes.lock().unwrap().insert(parser.address(), mode);
                r.lock().unwrap().server_status(parser.address(), mode, status, faults);
                Ok(())
            }),
            None,
        );

        let r = responder.clone();
        let modes = last_mode.clone();
        list.add_response(
            cmd::CHANGE_MODE,
            Box::new(move |parser| {
                let mode = parser.read_u16()?;
                parser.check_crc()?;
                modes.lock().unwrap().insert(parser.address(), mode as u8);
                r.lock().unwrap().change_mode(parser.address(), mode);
                Ok(())
            }),
            None,
        );

        let r = responder.clone();
        list.add_response(
            cmd::SET_TEMP_ADDRESS,
            Box::new(move |parser| {
                let new_address = parser.read_u8()?;
                parser.check_crc()?;
                r.lock().unwrap().set_temp_address(parser.address(), new_address);
                Ok(())
            }),
            None,
        );

        let r = responder;
        list.add_response(
            cmd::RESET_SERVER,
            Box::new(move |parser| {
                parser.check_crc()?;
                r.lock().unwrap().reset_server(parser.address());
                Ok(())
            }),
            None,
        );

        list.set_length_hint(Box::new(ilc_response_length));

        Self {
            list,
            bus,
            broadcast_counter: 0,
            last_mode,
        }
    }

    /// Bus number this list talks on.
    pub fn bus(&self) -> u8 {
        self.bus
    }

    /// Ask for the ILC identity - function 17 (0x11).
    pub fn report_server_id(&mut self, address: u8) {
        self.list
            .call_function(address, cmd::SERVER_ID, Duration::from_micros(835), ());
    }

    /// Ask for the ILC status - function 18 (0x12).
    pub fn report_server_status(&mut self, address: u8) {
        self.list
            .call_function(address, cmd::SERVER_STATUS, Duration::from_micros(270), ());
    }

    /// Request a mode transition - function 65 (0x41).
    ///
    /// A regular transition completes within the standard 335 us reply
    /// window. Transitions into or out of `FirmwareUpdate` hand control to
    /// the bootloader and take up to 100 ms.
    pub fn change_ilc_mode(&mut self, address: u8, mode: Mode) {
        let firmware_boundary = mode == Mode::FirmwareUpdate
            || matches!(
                self.last_mode(address),
                Ok(m) if m == Mode::FirmwareUpdate as u8 || m == Mode::Bootloader as u8
            );
        let timeout = if firmware_boundary {
            Duration::from_millis(100)
        } else {
            Duration::from_micros(335)
        };
        self.list
            .call_function(address, cmd::CHANGE_MODE, timeout, mode as u16);
    }

    /// Assign a temporary address - function 72 (0x48), sent to the
    /// temp-address broadcast 255. Only an address-less ILC (one that
    /// failed to read its network address and fell back to 255) answers.
    pub fn set_temp_ilc_address(&mut self, temporary_address: u8) {
        self.list.call_function(
            255,
            cmd::SET_TEMP_ADDRESS,
            Duration::from_micros(250),
            temporary_address,
        );
    }

    /// Reboot the ILC - function 107 (0x6B).
    pub fn reset_server(&mut self, address: u8) {
        self.list
            .call_function(address, cmd::RESET_SERVER, Duration::from_micros(86840), ());
    }

    /// Write a broadcast frame. The bus must stay silent for `delay`
    /// after the send so the ILCs can process it; no reply will arrive.
    ///
    /// `address` shall be one of the broadcast addresses (0, 148, 149,
    /// 250); `counter` the rolling 4-bit broadcast counter, echoed by the
    /// devices in later unicast status replies for verification.
    pub fn broadcast_function(
        &mut self,
        address: u8,
        function: u8,
        delay: Duration,
        counter: u8,
        data: &[u8],
    ) {
        self.list.call_function(address, function, delay, (counter, data));
    }

    /// Advance and return the rolling 4-bit broadcast counter.
    pub fn next_broadcast_counter(&mut self) -> u8 {
        self.broadcast_counter = (self.broadcast_counter + 1) & 0x0F;
        self.broadcast_counter
    }

    /// Current broadcast counter value.
    pub fn broadcast_counter(&self) -> u8 {
        self.broadcast_counter
    }

    /// Most recently observed mode of the ILC at `address`.
    pub fn last_mode(&self, address: u8) -> Result<u8, ModbusError> {
        self.last_mode
            .lock()
            .unwrap()
            .get(&address)
            .copied()
            .ok_or(ModbusError::UnknownMode { address })
    }

    /// Decode the generic bits of a function 18 status word.
    pub fn status_strings(&self, status: u16) -> Vec<&'static str> {
        let mut ret = Vec::new();
        let status = IlcStatus::from_bits_retain(status);
        if status.contains(IlcStatus::MAJOR_FAULT) {
            ret.push("Major Fault");
        }
        if status.contains(IlcStatus::MINOR_FAULT) {
            ret.push("Minor Fault");
        }
        if status.contains(IlcStatus::FAULT_OVERRIDE) {
            ret.push("Fault Override");
        }
        // remaining bits are ILC specific - decoded by the domain lists
        ret
    }

    /// Decode a function 18 fault word.
    pub fn fault_strings(&self, faults: u16) -> Vec<&'static str> {
        let faults = IlcFault::from_bits_retain(faults);
        [
            (IlcFault::UNIQUE_ID_CRC, "Unique ID CRC error"),
            (IlcFault::APP_TYPE, "App Type & Network Node Type do not match"),
            (IlcFault::NO_ILC, "No ILC App programmed"),
            (IlcFault::ILC_APP_CRC, "ILC App CRC error"),
            (IlcFault::NO_TEDS, "No TEDS found"),
            (IlcFault::TEDS1, "TEDS copy 1 error"),
            (IlcFault::TEDS2, "TEDS copy 2 error"),
            (IlcFault::WATCHDOG_RESET, "Reset due to Watchdog Timeout"),
            (IlcFault::BROWN_OUT, "Brown Out"),
            (IlcFault::EVENT_TRAP, "Event Trap"),
            (IlcFault::SSR, "SSR power fail"),
            (IlcFault::AUX, "Aux power fail"),
        ]
        .iter()
        .filter(|(bit, _)| faults.contains(*bit))
        .map(|(_, name)| *name)
        .collect()
    }
}

impl Deref for IlcBusList {
    type Target = BusList;

    fn deref(&self) -> &BusList {
        &self.list
    }
}

impl DerefMut for IlcBusList {
    fn deref_mut(&mut self) -> &mut BusList {
        &mut self.list
    }
}

impl AsMut<BusList> for IlcBusList {
    fn as_mut(&mut self) -> &mut BusList {
        &mut self.list
    }
}
