//! ILC firmware programming over the bootloader function set.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::modbus::{BusList, Crc, ModbusError};
use crate::transport::{Transport, TransportError};

use super::{IlcBusList, IlcResponses, Mode};

/// Bootloader function codes.
pub mod cmd {
    pub const WRITE_APPLICATION_STATS: u8 = 100;
    pub const ERASE_APPLICATION: u8 = 101;
    pub const WRITE_APPLICATION_PAGE: u8 = 102;
    pub const VERIFY_APPLICATION: u8 = 103;
}

/// Bytes transmitted per 256-byte logical page. The bootloader expands
/// each page back, inserting the dropped fourth byte after every third.
pub const APPLICATION_PAGE_LENGTH: usize = 192;

/// Firmware image input, as produced by the Intel-HEX loader.
pub trait FirmwareImage {
    /// Lowest memory address the image occupies.
    fn start_address(&self) -> u16;

    /// The image bytes, concatenated from the start address up.
    fn data(&self) -> &[u8];
}

/// Callbacks for bootloader acknowledgements. All default to no-ops;
/// implement them to track programming progress.
pub trait FirmwareResponses: IlcResponses {
    fn application_stats_written(&mut self, _address: u8) {}

    fn application_erased(&mut self, _address: u8) {}

    fn application_page_written(&mut self, _address: u8) {}

    fn application_verified(&mut self, _address: u8, _status: u16) {}
}

/// Firmware programming failures.
#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("cannot enter bootloader mode on ILC {address}")]
    CannotEnterBootloader { address: u8 },

    #[error("application stats error on ILC {address}")]
    StatsError { address: u8 },

    #[error("application error on ILC {address}")]
    ApplicationError { address: u8 },

    #[error("application stats and application error on ILC {address}")]
    StatsAndApplicationError { address: u8 },

    #[error("unknown verify status 0x{status:04x} from ILC {address}")]
    UnknownVerifyStatus { address: u8, status: u16 },

    #[error("no verify status received from ILC {address}")]
    MissingVerifyStatus { address: u8 },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Modbus(#[from] ModbusError),
}

/// Reply wait for the slow bootloader operations (erase, stats, verify).
const BOOTLOADER_TIMEOUT: Duration = Duration::from_micros(500_000);

/// Deadline for each command batch while programming.
const ILC_TIMEOUT: Duration = Duration::from_secs(1);

/// Deadline for one page write.
const PAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// ILC bus list extended with the bootloader function set, and the
/// sequencer walking an ILC through a complete firmware update.
pub struct Programmer {
    ilc: IlcBusList,
    verify_status: Arc<Mutex<Option<u16>>>,
}

impl Programmer {
    pub fn new<R: FirmwareResponses + 'static>(bus: u8, responder: Arc<Mutex<R>>) -> Self {
        let mut ilc = IlcBusList::new(bus, responder.clone());
        let verify_status = Arc::new(Mutex::new(None));

        let r = responder.clone();
        ilc.add_response(
            cmd::WRITE_APPLICATION_STATS,
            Box::new(move |parser| {
                parser.check_crc()?;
                r.lock().unwrap().application_stats_written(parser.address());
                Ok(())
            }),
            None,
        );

        let r = responder.clone();
        ilc.add_response(
            cmd::ERASE_APPLICATION,
            Box::new(move |parser| {
                parser.check_crc()?;
                r.lock().unwrap().application_erased(parser.address());
                Ok(())
            }),
            None,
        );

        let r = responder.clone();
        ilc.add_response(
            cmd::WRITE_APPLICATION_PAGE,
            Box::new(move |parser| {
                parser.check_crc()?;
                r.lock().unwrap().application_page_written(parser.address());
                Ok(())
            }),
            None,
        );

        let r = responder;
        let status_slot = verify_status.clone();
        ilc.add_response(
            cmd::VERIFY_APPLICATION,
            Box::new(move |parser| {
                let status = parser.read_u16()?;
                parser.check_crc()?;
                *status_slot.lock().unwrap() = Some(status);
                r.lock().unwrap().application_verified(parser.address(), status);
                Ok(())
            }),
            None,
        );

        ilc.set_length_hint(Box::new(|partial| {
            if partial.len() < 2 {
                return -1;
            }
            match partial[1] {
                cmd::WRITE_APPLICATION_STATS
                | cmd::ERASE_APPLICATION
                | cmd::WRITE_APPLICATION_PAGE => 4,
                cmd::VERIFY_APPLICATION => 6,
                _ => super::ilc_response_length(partial),
            }
        }));

        Self { ilc, verify_status }
    }

    /// Erase the application image - function 101 (0x65).
    pub fn erase_application(&mut self, address: u8) {
        self.ilc
            .call_function(address, cmd::ERASE_APPLICATION, BOOTLOADER_TIMEOUT, ());
    }

    /// Write one shrunk 192-byte page - function 102 (0x66). `start` is
    /// the logical (unshrunk) address of the page, a multiple of 256.
    pub fn write_application_page(&mut self, address: u8, start: u16, page: &[u8]) {
        debug_assert_eq!(page.len(), APPLICATION_PAGE_LENGTH);
        self.ilc.call_function(
            address,
            cmd::WRITE_APPLICATION_PAGE,
            BOOTLOADER_TIMEOUT,
            (start, page.len() as u16, page),
        );
    }

    /// Write the application statistics - function 100 (0x64). The last
    /// argument on the wire is a Modbus CRC computed over the three
    /// values, each encoded little-endian and padded to 32 bits.
    pub fn write_application_stats(
        &mut self,
        address: u8,
        data_crc: u16,
        start_address: u16,
        data_length: u16,
    ) {
        let mut stats = Crc::new();
        for value in [data_crc, start_address, data_length] {
            stats.add_slice(&value.to_le_bytes());
            stats.add_slice(&[0, 0]);
        }
        self.ilc.call_function(
            address,
            cmd::WRITE_APPLICATION_STATS,
            BOOTLOADER_TIMEOUT,
            (data_crc, start_address, data_length, stats.get()),
        );
    }

    /// Verify the uploaded application - function 103 (0x67).
    pub fn verify_application(&mut self, address: u8) {
        self.ilc
            .call_function(address, cmd::VERIFY_APPLICATION, BOOTLOADER_TIMEOUT, ());
    }

    /// Walk the ILC through a complete firmware update:
    /// leave Enabled/Disabled/Fault for Standby, switch to the bootloader,
    /// erase, stream the image in 192-byte shrunk pages, record the stats,
    /// verify, and return to Disabled.
    pub fn program(
        &mut self,
        transport: &mut dyn Transport,
        address: u8,
        image: &dyn FirmwareImage,
    ) -> Result<(), ProgramError> {
        self.ilc.clear();
        self.ilc.report_server_status(address);
        transport.commands(self.ilc.as_mut(), ILC_TIMEOUT, None)?;

        match self.ilc.last_mode(address)? {
            m if m == Mode::Enabled as u8 => {
                self.ilc.change_ilc_mode(address, Mode::Disabled);
                self.ilc.change_ilc_mode(address, Mode::Standby);
            }
            m if m == Mode::Disabled as u8 => {
                self.ilc.change_ilc_mode(address, Mode::Standby);
            }
            m if m == Mode::Fault as u8 => {
                self.ilc.change_ilc_mode(address, Mode::ClearFaults);
            }
            _ => {}
        }
        if !self.ilc.is_empty() {
            transport.commands(self.ilc.as_mut(), ILC_TIMEOUT, None)?;
        }

        if !self.in_bootloader(address) {
            self.ilc.change_ilc_mode(address, Mode::FirmwareUpdate);
            if transport
                .commands(self.ilc.as_mut(), ILC_TIMEOUT, None)
                .is_err()
            {
                // some bootloaders misreport status while switching -
                // re-read, clear a reported fault, then try once more
                self.ilc.clear();
                self.ilc.report_server_status(address);
                transport.commands(self.ilc.as_mut(), ILC_TIMEOUT, None)?;
                if self.ilc.last_mode(address)? == Mode::Fault as u8 {
                    self.ilc.change_ilc_mode(address, Mode::ClearFaults);
                    transport.commands(self.ilc.as_mut(), ILC_TIMEOUT, None)?;
                    self.ilc.report_server_status(address);
                    transport.commands(self.ilc.as_mut(), ILC_TIMEOUT, None)?;
                }
                if !self.in_bootloader(address) {
                    self.ilc.change_ilc_mode(address, Mode::FirmwareUpdate);
                    transport.commands(self.ilc.as_mut(), ILC_TIMEOUT, None)?;
                }
            }
        }

        if self.ilc.last_mode(address)? == Mode::Fault as u8 {
            self.ilc.change_ilc_mode(address, Mode::ClearFaults);
            transport.commands(self.ilc.as_mut(), ILC_TIMEOUT, None)?;
        }

        if !self.in_bootloader(address) {
            return Err(ProgramError::CannotEnterBootloader { address });
        }

        self.erase_application(address);
        transport.commands(self.ilc.as_mut(), ILC_TIMEOUT, None)?;

        let start_address = image.start_address();
        let data_length = image.data().len() as u16;
        let data_crc = self.write_pages(transport, address, start_address, image.data())?;

        self.write_application_stats(address, data_crc, start_address, data_length);
        transport.commands(self.ilc.as_mut(), ILC_TIMEOUT, None)?;

        *self.verify_status.lock().unwrap() = None;
        self.verify_application(address);
        transport.commands(self.ilc.as_mut(), ILC_TIMEOUT, None)?;

        let status = self.verify_status.lock().unwrap().take();
        match status {
            Some(0x0000) => {}
            Some(0x00FF) => return Err(ProgramError::StatsError { address }),
            Some(0xFF00) => return Err(ProgramError::ApplicationError { address }),
            Some(0xFFFF) => return Err(ProgramError::StatsAndApplicationError { address }),
            Some(status) => return Err(ProgramError::UnknownVerifyStatus { address, status }),
            None => return Err(ProgramError::MissingVerifyStatus { address }),
        }

        self.ilc.change_ilc_mode(address, Mode::Standby);
        transport.commands(self.ilc.as_mut(), ILC_TIMEOUT, None)?;

        if self.ilc.last_mode(address)? == Mode::Fault as u8 {
            self.ilc.change_ilc_mode(address, Mode::ClearFaults);
            transport.commands(self.ilc.as_mut(), ILC_TIMEOUT, None)?;
        }

        self.ilc.change_ilc_mode(address, Mode::Disabled);
        transport.commands(self.ilc.as_mut(), ILC_TIMEOUT, None)?;

        info!(address, "firmware programmed");
        Ok(())
    }

    /// Pad the image to whole 256-byte pages, stream every page as its
    /// 192 kept bytes (every fourth byte dropped) and return the Modbus
    /// CRC over the transmitted bytes.
    fn write_pages(
        &mut self,
        transport: &mut dyn Transport,
        address: u8,
        start_address: u16,
        data: &[u8],
    ) -> Result<u16, ProgramError> {
        let mut data = data.to_vec();
        let tail = data.len() % 256;
        if tail != 0 {
            for i in tail..256 {
                data.push(if i % 4 == 3 { 0x00 } else { 0xFF });
            }
        }

        info!(
            address,
            pages = data.len() / 256,
            "writing application pages"
        );

        let mut crc = Crc::new();
        let mut page_address = start_address;
        for page in data.chunks(256) {
            let kept: Vec<u8> = page
                .iter()
                .enumerate()
                .filter(|(i, _)| i % 4 != 3)
                .map(|(_, b)| *b)
                .collect();
            crc.add_slice(&kept);

            self.write_application_page(address, page_address, &kept);
            transport.commands(self.ilc.as_mut(), PAGE_TIMEOUT, None)?;
            debug!(address, page_address, "page written");

            page_address = page_address.wrapping_add(256);
        }

        Ok(crc.get())
    }

    fn in_bootloader(&self, address: u8) -> bool {
        matches!(
            self.ilc.last_mode(address),
            Ok(m) if m == Mode::FirmwareUpdate as u8 || m == Mode::Bootloader as u8
        )
    }
}

impl Deref for Programmer {
    type Target = IlcBusList;

    fn deref(&self) -> &IlcBusList {
        &self.ilc
    }
}

impl DerefMut for Programmer {
    fn deref_mut(&mut self) -> &mut IlcBusList {
        &mut self.ilc
    }
}

impl AsMut<BusList> for Programmer {
    fn as_mut(&mut self) -> &mut BusList {
        self.ilc.as_mut()
    }
}
