//! Modbus/ILC bus protocol engine for telescope-control cRIO systems.
//!
//! The crate composes command frames for chains of Inner-Loop Controllers
//! on Modbus-over-serial (or FPGA-FIFO) buses, dispatches them through a
//! transport, validates and parses the replies, and delivers decoded
//! callbacks to the higher-level subsystems - actuators, thermal
//! channels, sensor monitors and Modbus Processing Units. The controller
//! task queue the bus engine and the firmware-programming flow run on is
//! included, together with the worker-thread and interrupt-watcher
//! primitives built around it.

pub mod exec;
pub mod hex;
pub mod ilc;
pub mod modbus;
pub mod mpu;
pub mod pid;
pub mod settings;
pub mod timestamp;
pub mod transport;

pub mod prelude {
    pub use crate::exec::{ControllerThread, Reschedule, Task, TaskError, Worker, WorkerLoop};
    pub use crate::ilc::{IlcBusList, IlcResponses, Mode, ServerId};
    pub use crate::modbus::{Buffer, BusList, Crc, ModbusError, Parser};
    pub use crate::mpu::Mpu;
    pub use crate::transport::{SimulatedTransport, Transport, TransportError};
}
