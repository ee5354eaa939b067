#![doc = include_str ! ("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

pub mod address;
pub mod carousel;
pub mod column;
pub mod control;
pub mod device;
pub mod error;
pub mod layout;
pub mod platform;

pub use address::FlashAddress;
pub use carousel::Carousel;
pub use column::{ColumnStore, PixelColumn};
pub use control::{ControlField, ControlRegisters};
pub use device::{DataFlash, DeviceId, StatusRegister};
pub use layout::Layout;

use crate::device::{DEFAULT_POLL_LIMIT, MANUFACTURER_ADESTO};
use crate::error::Error;
use crate::layout::FILENAME_SIZE;
use crate::platform::Transport;
use core::fmt;
#[cfg(feature = "defmt")]
use defmt::{debug, warn};

/// A filename as stored in the filename table: up to 16 printable ASCII characters, zero padded.
/// There is no terminator if the name uses all 16 bytes.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Filename([u8; FILENAME_SIZE]);

impl Filename {
    /// The blank entry of an unused slot.
    pub const EMPTY: Filename = Filename([0u8; FILENAME_SIZE]);

    /// Usage: `Filename::new("sunset.bmp")`
    pub fn new(name: &str) -> Result<Self, Error> {
        let bytes = name.as_bytes();
        if bytes.len() > FILENAME_SIZE {
            return Err(Error::FilenameTooLong);
        }
        if !bytes.iter().all(|b| (0x20..=0x7E).contains(b)) {
            return Err(Error::FilenameMalformed);
        }

        let mut raw = [0u8; FILENAME_SIZE];
        raw[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(raw))
    }

    /// Wraps an entry as read from flash without any validation.
    pub const fn from_raw(raw: [u8; FILENAME_SIZE]) -> Self {
        Self(raw)
    }

    pub const fn as_bytes(&self) -> &[u8; FILENAME_SIZE] {
        &self.0
    }

    /// The name without padding. Both 0x00 and the erased value 0xFF end the name.
    pub fn as_str(&self) -> Result<&str, Error> {
        let end = self
            .0
            .iter()
            .position(|&b| b == 0x00 || b == 0xFF)
            .unwrap_or(FILENAME_SIZE);
        let name = &self.0[..end];
        if !name.iter().all(|b| (0x20..=0x7E).contains(b)) {
            return Err(Error::FilenameMalformed);
        }
        core::str::from_utf8(name).map_err(|_| Error::FilenameMalformed)
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0x00 || self.0[0] == 0xFF
    }
}

impl TryFrom<&str> for Filename {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Debug for Filename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filename(b\"")?;
        for &byte in &self.0 {
            // escape_default would escape 0 as \x00, but \0 is more readable
            if byte == 0 {
                write!(f, "\\0")?;
                continue;
            }
            write!(f, "{}", core::ascii::escape_default(byte))?;
        }
        write!(f, "\")")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Status register reads before an erase or program is given up as `DeviceBusyTimeout`.
    pub poll_limit: u32,
    pub layout: Layout,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_limit: DEFAULT_POLL_LIMIT,
            layout: Layout::REVOLUTION,
        }
    }
}

/// Everything the display keeps on its DataFlash: the carousel, the LED driver control
/// registers and the image columns.
///
/// The carousel and the control registers are cached in memory. Changes to either only reach
/// the flash with [`Storage::save_carousel`] and [`Storage::save_control_registers`].
pub struct Storage<T: Transport> {
    flash: DataFlash<T>,
    layout: Layout,
    carousel: Carousel,
    controls: ControlRegisters,
    columns: ColumnStore,
    faulted: bool,
}

impl<T: Transport> Storage<T> {
    /// Brings the chip into a known state and loads the cached metadata:
    /// 1. Reject a `config.layout` that fails [`Layout::is_valid`]
    /// 2. Verify the manufacturer of the chip
    /// 3. Switch to 512 byte pages if the chip still uses 528 byte pages
    /// 4. Disable the sector protection
    /// 5. Load the carousel and the control registers
    pub fn new(transport: T, config: Config) -> Result<Self, Error> {
        if !config.layout.is_valid() {
            return Err(Error::InvalidLayout);
        }

        let mut flash = DataFlash::new(transport, config.poll_limit);

        let id = flash.read_device_id()?;
        if id.manufacturer() != MANUFACTURER_ADESTO {
            return Err(Error::UnknownDevice(id.manufacturer()));
        }

        let status = flash.wait_ready()?;
        if !status.is_page_size_binary() {
            #[cfg(feature = "defmt")]
            warn!("chip uses 528 byte pages, switching to binary page size");

            flash.configure_page_size_binary()?;
        }
        flash.disable_sector_protection()?;

        let carousel = Carousel::load(&mut flash, &config.layout)?;
        let controls = ControlRegisters::load(&mut flash, &config.layout)?;

        #[cfg(feature = "defmt")]
        debug!(
            "storage ready: {} images, controls {}",
            carousel.count(),
            controls
        );

        Ok(Self {
            flash,
            layout: config.layout,
            carousel,
            controls,
            columns: ColumnStore::new(config.layout),
            faulted: false,
        })
    }

    /// Runs a flash operation unless a previous one faulted. A transport failure marks the
    /// storage as faulted since the chip state is unknown afterwards.
    fn guard<R>(&mut self, op: impl FnOnce(&mut Self) -> Result<R, Error>) -> Result<R, Error> {
        if self.faulted {
            return Err(Error::Faulted);
        }

        match op(self) {
            Err(Error::DeviceIo) => {
                self.faulted = true;
                Err(Error::DeviceIo)
            }
            other => other,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Direct access to the command layer, e.g. for diagnostics.
    pub fn flash(&mut self) -> &mut DataFlash<T> {
        &mut self.flash
    }

    pub fn release(self) -> T {
        self.flash.release()
    }

    pub fn carousel(&self) -> &Carousel {
        &self.carousel
    }

    pub fn set_present(&mut self, slot: u8) -> Result<(), Error> {
        self.carousel.set_present(slot)
    }

    pub fn is_present(&self, slot: u8) -> Result<bool, Error> {
        self.carousel.is_present(slot)
    }

    /// Removes `slot` from the carousel and blanks its filename on flash.
    pub fn clear_present(&mut self, slot: u8) -> Result<(), Error> {
        self.guard(|s| s.carousel.clear_present(&mut s.flash, slot))
    }

    /// Empties the carousel and blanks all filenames. Image data is left in place.
    pub fn clear_all(&mut self) -> Result<(), Error> {
        self.guard(|s| s.carousel.clear_all(&mut s.flash))
    }

    pub fn count(&self) -> u8 {
        self.carousel.count()
    }

    pub fn next_free_slot(&self) -> u8 {
        self.carousel.next_free_slot()
    }

    pub fn save_carousel(&mut self) -> Result<(), Error> {
        self.guard(|s| s.carousel.save(&mut s.flash))
    }

    /// Drops unsaved carousel changes.
    pub fn reload_carousel(&mut self) -> Result<(), Error> {
        self.guard(|s| {
            s.carousel = Carousel::load(&mut s.flash, &s.layout)?;
            Ok(())
        })
    }

    pub fn filename(&mut self, slot: u8) -> Result<Filename, Error> {
        self.guard(|s| s.carousel.filename(&mut s.flash, slot))
    }

    pub fn set_filename(&mut self, slot: u8, filename: &Filename) -> Result<(), Error> {
        self.guard(|s| s.carousel.set_filename(&mut s.flash, slot, filename))
    }

    pub fn control_registers(&self) -> &ControlRegisters {
        &self.controls
    }

    pub fn set_control_registers(&mut self, values: ControlRegisters) {
        self.controls = values;
    }

    pub fn save_control_registers(&mut self) -> Result<(), Error> {
        self.guard(|s| s.controls.save(&mut s.flash, &s.layout))
    }

    /// Drops unsaved control register changes.
    pub fn reload_control_registers(&mut self) -> Result<(), Error> {
        self.guard(|s| {
            s.controls = ControlRegisters::load(&mut s.flash, &s.layout)?;
            Ok(())
        })
    }

    pub fn column_address(&self, slot: u8, column: u16) -> Result<FlashAddress, Error> {
        self.columns.column_address(slot, column)
    }

    pub fn read_column(&mut self, slot: u8, column: u16) -> Result<PixelColumn, Error> {
        self.guard(|s| s.columns.read_column(&mut s.flash, slot, column))
    }

    /// Same as [`Storage::read_column`] without moving the column through the stack, for the
    /// display refresh loop.
    pub fn read_column_into(
        &mut self,
        slot: u8,
        column: u16,
        column_buf: &mut PixelColumn,
    ) -> Result<(), Error> {
        self.guard(|s| s.columns.read_column_into(&mut s.flash, slot, column, column_buf))
    }

    pub fn write_column(&mut self, slot: u8, column: u16, data: &PixelColumn) -> Result<(), Error> {
        self.guard(|s| s.columns.write_column(&mut s.flash, slot, column, data))
    }

    pub fn erase_slot(&mut self, slot: u8) -> Result<(), Error> {
        self.guard(|s| s.columns.erase_slot(&mut s.flash, slot))
    }

    /// Prepares a slot for an upload: takes the next free slot, or slot 0 if the carousel is
    /// full, removes it from the carousel, erases its image region and records the filename.
    ///
    /// Write the columns with [`Storage::write_column`] and finish with
    /// [`Storage::commit_image`].
    pub fn begin_image(&mut self, filename: &Filename) -> Result<u8, Error> {
        self.guard(|s| {
            let slot = s.carousel.next_free_slot();
            if s.carousel.is_present(slot)? {
                #[cfg(feature = "defmt")]
                debug!("carousel full, evicting slot {}", slot);

                s.carousel.clear_present(&mut s.flash, slot)?;
                s.carousel.save(&mut s.flash)?;
            }
            s.columns.erase_slot(&mut s.flash, slot)?;
            s.carousel.set_filename(&mut s.flash, slot, filename)?;
            Ok(slot)
        })
    }

    /// Adds a completely written slot to the carousel and persists the carousel.
    pub fn commit_image(&mut self, slot: u8) -> Result<(), Error> {
        self.guard(|s| {
            s.carousel.set_present(slot)?;
            s.carousel.save(&mut s.flash)
        })
    }

    /// Erases the whole chip. The carousel is emptied, the control registers are written back
    /// so the display keeps its calibration.
    pub fn format(&mut self) -> Result<(), Error> {
        self.guard(|s| {
            s.flash.erase_chip()?;
            s.carousel = Carousel::new(s.layout);
            s.carousel.save(&mut s.flash)?;
            s.controls.save(&mut s.flash, &s.layout)
        })
    }

    pub fn status(&mut self) -> Result<StatusRegister, Error> {
        self.guard(|s| s.flash.read_status_register())
    }

    /// Writes the decoded status register to a debug console.
    pub fn dump_status(&mut self, console: &mut impl fmt::Write) -> Result<(), Error> {
        let status = self.status()?;
        write!(console, "{status}").map_err(|_| Error::Console)
    }

    /// Writes one column of an image as hex to a debug console.
    pub fn dump_column(
        &mut self,
        slot: u8,
        column: u16,
        console: &mut impl fmt::Write,
    ) -> Result<(), Error> {
        let data = self.read_column(slot, column)?;
        writeln!(console, "image {slot} column {column}:").map_err(|_| Error::Console)?;
        write!(console, "{data}").map_err(|_| Error::Console)
    }
}
