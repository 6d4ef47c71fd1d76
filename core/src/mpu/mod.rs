//! Modbus Processing Unit support.
//!
//! The MPU is an FPGA-hosted engine executing a meta-program of bus
//! instructions on behalf of the host. [`Mpu`] composes such programs for
//! holding-register and input-status traffic, tracks which addresses were
//! asked for, and maps the raw reply frames back into keyed stores.

pub mod telemetry;

pub use telemetry::MpuTelemetry;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::modbus::{Buffer, ModbusError, Parser, ERROR_MASK};

/// MPU meta-instruction opcodes. Values are an implementation choice but
/// stable across peers - the FPGA interpreter uses the same table.
pub mod cmd {
    /// `WRITE len bytes…` - send bytes out the bus.
    pub const WRITE: u8 = 1;
    /// `WAIT_MS ms` - sleep before reading.
    pub const WAIT_MS: u8 = 2;
    /// `READ len` - read exactly `len` bytes.
    pub const READ: u8 = 3;
    /// Verify the CRC of the last READ.
    pub const CHECK_CRC: u8 = 4;
    /// Push the last READ into the reply FIFO.
    pub const OUTPUT: u8 = 5;
    /// End of program.
    pub const EXIT: u8 = 255;
}

/// Modbus functions the MPU programs use.
mod func {
    pub const READ_INPUT_STATUS: u8 = 2;
    pub const READ_HOLDING_REGISTERS: u8 = 3;
    pub const PRESET_HOLDING_REGISTER: u8 = 6;
    pub const PRESET_HOLDING_REGISTERS: u8 = 16;
}

/// MPU failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MpuError {
    /// Accessor asked for an address the MPU has not returned.
    #[error("register/input {address} was not read")]
    NotRead { address: u16 },

    /// A reply arrived with no matching request recorded.
    #[error("no recorded request for function {function} reply")]
    NoCommandedRequest { function: u8 },

    /// A preset echo did not match what was commanded.
    #[error("preset echo mismatch - register 0x{register:04x}, value {value}, expected 0x{expected_register:04x}, {expected_value}")]
    PresetMismatch {
        register: u16,
        value: u16,
        expected_register: u16,
        expected_value: u16,
    },

    /// Requests remain whose replies never arrived.
    #[error("{count} commanded request(s) without a reply")]
    CommandedNotEmpty { count: usize },

    #[error(transparent)]
    Modbus(#[from] ModbusError),
}

#[derive(Default)]
struct Stores {
    input_status: HashMap<u16, bool>,
    registers: HashMap<u16, u16>,
}

/// Cloneable handle onto the MPU value stores. One mutex guards both maps
/// - the parsing thread writes while readers poll from elsewhere.
#[derive(Clone, Default)]
pub struct MpuRegisters {
    inner: Arc<Mutex<Stores>>,
}

impl MpuRegisters {
    /// Value of an input status bit, by absolute input address.
    pub fn input_status(&self, address: u16) -> Result<bool, MpuError> {
        self.inner
            .lock()
            .unwrap()
            .input_status
            .get(&address)
            .copied()
            .ok_or(MpuError::NotRead { address })
    }

    /// Value of a holding register, by absolute register address.
    pub fn register(&self, address: u16) -> Result<u16, MpuError> {
        self.inner
            .lock()
            .unwrap()
            .registers
            .get(&address)
            .copied()
            .ok_or(MpuError::NotRead { address })
    }
}

/// Composes MPU meta-programs and decodes the reply stream.
///
/// Each `read_*`/`preset_*` call appends a `WRITE`/`WAIT_MS`/`READ` block
/// to the program and remembers what was asked, in order; consecutive
/// calls elide all but the final `EXIT`. Reply frames fed to
/// [`Mpu::process_response`] are matched against the remembered requests
/// and update the [`MpuRegisters`] stores.
pub struct Mpu {
    bus: u8,
    address: u8,
    commands: Vec<u8>,
    contains_read: bool,

    commanded_inputs: VecDeque<(u16, u16)>,
    commanded_registers: VecDeque<u16>,
    commanded_preset: VecDeque<(u16, u16)>,
    commanded_presets: VecDeque<(u16, u16)>,

    store: MpuRegisters,
}

impl Mpu {
    /// `bus` is the internal FPGA identifier of the serial port the MPU
    /// drives; `address` the Modbus address of the device behind it.
    pub fn new(bus: u8, address: u8) -> Self {
        Self {
            bus,
            address,
            commands: Vec::new(),
            contains_read: false,
            commanded_inputs: VecDeque::new(),
            commanded_registers: VecDeque::new(),
            commanded_preset: VecDeque::new(),
            commanded_presets: VecDeque::new(),
            store: MpuRegisters::default(),
        }
    }

    pub fn bus(&self) -> u8 {
        self.bus
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn set_address(&mut self, address: u8) {
        self.address = address;
    }

    /// True when the program reads anything back.
    pub fn contains_read(&self) -> bool {
        self.contains_read
    }

    /// The composed meta-program.
    pub fn command_vector(&self) -> &[u8] {
        &self.commands
    }

    /// Drop the program and all remembered requests.
    pub fn clear_commanded(&mut self) {
        self.commands.clear();
        self.contains_read = false;
        self.commanded_inputs.clear();
        self.commanded_registers.clear();
        self.commanded_preset.clear();
        self.commanded_presets.clear();
    }

    /// Fails when remembered requests are still waiting for replies.
    pub fn check_commanded_empty(&self) -> Result<(), MpuError> {
        let count = self.commanded_inputs.len()
            + self.commanded_registers.len()
            + self.commanded_preset.len()
            + self.commanded_presets.len();
        if count > 0 {
            return Err(MpuError::CommandedNotEmpty { count });
        }
        Ok(())
    }

    /// Cloneable handle onto the register/input stores.
    pub fn registers(&self) -> MpuRegisters {
        self.store.clone()
    }

    fn pop_exit(&mut self) {
        if self.commands.last() == Some(&cmd::EXIT) {
            self.commands.pop();
        }
    }

    fn push_request(&mut self, frame: &Buffer, timeout_ms: u8) {
        self.commands.push(cmd::WRITE);
        self.commands.push(frame.len() as u8);
        self.commands.extend_from_slice(frame);
        self.commands.push(cmd::WAIT_MS);
        self.commands.push(timeout_ms);
    }

    /// Read `count` input status bits starting at `address` - function 2.
    pub fn read_input_status(&mut self, address: u16, count: u16, timeout_ms: u8) {
        self.pop_exit();
        let frame = Buffer::for_function(self.address, func::READ_INPUT_STATUS, (address, count));
        self.push_request(&frame, timeout_ms);

        self.commands.push(cmd::READ);
        self.contains_read = true;
        // device address, function, length byte, CRC = 5 extra bytes
        self.commands.push(5 + count.div_ceil(8) as u8);
        self.commands.push(cmd::CHECK_CRC);
        self.commands.push(cmd::OUTPUT);
        self.commands.push(cmd::EXIT);

        self.commanded_inputs.push_back((address, count));
    }

    /// Read `count` holding registers starting at `address` - function 3.
    pub fn read_holding_registers(&mut self, address: u16, count: u16, timeout_ms: u8) {
        self.pop_exit();
        let frame = Buffer::for_function(
            self.address,
            func::READ_HOLDING_REGISTERS,
            (address, count),
        );
        self.push_request(&frame, timeout_ms);

        self.commands.push(cmd::READ);
        self.contains_read = true;
        // device address, function, length byte, CRC = 5 extra bytes
        self.commands.push(5 + (count * 2) as u8);
        self.commands.push(cmd::OUTPUT);
        self.commands.push(cmd::EXIT);

        for register in address..address + count {
            self.commanded_registers.push_back(register);
        }
    }

    /// Write a single holding register - function 6.
    pub fn preset_holding_register(&mut self, address: u16, value: u16, timeout_ms: u8) {
        self.pop_exit();
        let frame = Buffer::for_function(
            self.address,
            func::PRESET_HOLDING_REGISTER,
            (address, value),
        );
        self.push_request(&frame, timeout_ms);

        self.commands.push(cmd::READ);
        self.contains_read = true;
        // echo: address, function, register, value, CRC = 8 bytes
        self.commands.push(8);
        self.commands.push(cmd::CHECK_CRC);
        self.commands.push(cmd::OUTPUT);
        self.commands.push(cmd::EXIT);

        self.commanded_preset.push_back((address, value));
    }

    /// Write consecutive holding registers - function 16.
    pub fn preset_holding_registers(&mut self, address: u16, values: &[u16], timeout_ms: u8) {
        self.pop_exit();
        let mut frame = Buffer::new();
        frame.write_u8(self.address);
        frame.write_u8(func::PRESET_HOLDING_REGISTERS);
        frame.write_u16(address);
        frame.write_u16(values.len() as u16);
        frame.write_u8((values.len() * 2) as u8);
        for value in values {
            frame.write_u16(*value);
        }
        frame.write_crc();
        self.push_request(&frame, timeout_ms);

        self.commands.push(cmd::READ);
        self.contains_read = true;
        // echo: address, function, register, count, CRC = 8 bytes
        self.commands.push(8);
        self.commands.push(cmd::CHECK_CRC);
        self.commands.push(cmd::OUTPUT);
        self.commands.push(cmd::EXIT);

        self.commanded_presets
            .push_back((address, values.len() as u16));
    }

    /// Decode one reply frame from the MPU output stream.
    pub fn process_response(&mut self, frame: &[u8]) -> Result<(), MpuError> {
        let mut parser = Parser::new(frame.to_vec())?;

        let address = parser.address();
        let function = parser.func();
        if address != self.address {
            return Err(ModbusError::WrongResponse {
                address,
                function,
                expected_address: self.address,
                expected_function: function & !ERROR_MASK,
            }
            .into());
        }

        match function {
            func::READ_INPUT_STATUS => self.process_input_status(&mut parser),
            func::READ_HOLDING_REGISTERS => self.process_holding_registers(&mut parser),
            func::PRESET_HOLDING_REGISTER => self.process_preset(&mut parser),
            func::PRESET_HOLDING_REGISTERS => self.process_presets(&mut parser),
            f if f & ERROR_MASK != 0 => {
                let exception = parser.read_u8()?;
                parser.check_crc()?;
                Err(ModbusError::ErrorResponse {
                    address,
                    function: f & !ERROR_MASK,
                    exception,
                }
                .into())
            }
            f => Err(ModbusError::UnexpectedResponse {
                address,
                function: f,
            }
            .into()),
        }
    }

    fn process_input_status(&mut self, parser: &mut Parser) -> Result<(), MpuError> {
        let Some((start, count)) = self.commanded_inputs.front().copied() else {
            return Err(MpuError::NoCommandedRequest {
                function: func::READ_INPUT_STATUS,
            });
        };
        let len = parser.read_u8()?;
        if u16::from(len) != count.div_ceil(8) {
            return Err(ModbusError::InvalidLength {
                received: usize::from(len),
                expected: "ceil(count / 8) status bytes",
            }
            .into());
        }

        {
            let mut stores = self.store.inner.lock().unwrap();
            let mut data = 0u8;
            for offset in 0..count {
                if offset % 8 == 0 {
                    data = parser.read_u8()?;
                }
                // first status bit arrives in the least-significant bit
                stores.input_status.insert(start + offset, data & 0x01 != 0);
                data >>= 1;
            }
        }
        parser.check_crc()?;
        self.commanded_inputs.pop_front();
        Ok(())
    }

    fn process_holding_registers(&mut self, parser: &mut Parser) -> Result<(), MpuError> {
        let len = parser.read_u8()?;

        {
            let mut stores = self.store.inner.lock().unwrap();
            for _ in (0..len).step_by(2) {
                let Some(register) = self.commanded_registers.pop_front() else {
                    return Err(MpuError::NoCommandedRequest {
                        function: func::READ_HOLDING_REGISTERS,
                    });
                };
                let value = parser.read_u16()?;
                stores.registers.insert(register, value);
            }
        }
        parser.check_crc()?;
        Ok(())
    }

    fn process_preset(&mut self, parser: &mut Parser) -> Result<(), MpuError> {
        let register = parser.read_u16()?;
        let value = parser.read_u16()?;
        parser.check_crc()?;
        let Some((expected_register, expected_value)) = self.commanded_preset.pop_front() else {
            return Err(MpuError::NoCommandedRequest {
                function: func::PRESET_HOLDING_REGISTER,
            });
        };
        if register != expected_register || value != expected_value {
            return Err(MpuError::PresetMismatch {
                register,
                value,
                expected_register,
                expected_value,
            });
        }
        Ok(())
    }

    fn process_presets(&mut self, parser: &mut Parser) -> Result<(), MpuError> {
        let register = parser.read_u16()?;
        let count = parser.read_u16()?;
        parser.check_crc()?;
        let Some((expected_register, expected_count)) = self.commanded_presets.pop_front() else {
            return Err(MpuError::NoCommandedRequest {
                function: func::PRESET_HOLDING_REGISTERS,
            });
        };
        if register != expected_register || count != expected_count {
            return Err(MpuError::PresetMismatch {
                register,
                value: count,
                expected_register,
                expected_value: expected_count,
            });
        }
        Ok(())
    }
}
