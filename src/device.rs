//! Command level driver for the AT45DQ321 DataFlash. Every public operation is one or more
//! complete chip-select framed command sequences; erase and program operations only return once
//! the chip reports ready again.

use crate::address::{CAPACITY, FlashAddress, PAGE_SIZE};
use crate::error::Error;
use crate::platform::Transport;
use core::fmt;
use core::ops::Range;
#[cfg(feature = "defmt")]
use defmt::{trace, warn};
use embedded_storage::nor_flash::{ErrorType, NorFlash, ReadNorFlash};

/// Upper bound of status register reads while waiting for an erase or program to finish.
/// A full chip erase takes up to 60s, at a few microseconds per status read this leaves plenty
/// of headroom while still turning a dead chip into an error.
pub const DEFAULT_POLL_LIMIT: u32 = 50_000_000;

/// Manufacturer byte of Adesto/Atmel DataFlash devices.
pub const MANUFACTURER_ADESTO: u8 = 0x1F;

/// Dummy bytes between address and data of a main memory page read.
const PAGE_READ_DUMMY_BYTES: usize = 4;
/// Dummy bytes between address and data of a continuous array read.
const CONTINUOUS_READ_DUMMY_BYTES: usize = 2;

pub(crate) const CHIP_ERASE: [u8; 4] = [0xC7, 0x94, 0x80, 0x9A];
pub(crate) const BINARY_PAGE_SIZE: [u8; 4] = [0x3D, 0x2A, 0x80, 0xA6];
pub(crate) const DISABLE_SECTOR_PROTECT: [u8; 4] = [0x3D, 0x2A, 0x7F, 0x9A];

/// First byte of every command the driver sends. Addressed commands continue with 3 address
/// bytes, so the op-code and the address take 4 bytes on the wire.
#[derive(strum::FromRepr, strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Opcode {
    /// 3 address bytes, 4 dummy bytes; the byte counter wraps within the page
    MainMemoryPageRead = 0xD2,
    /// 3 address bytes, 2 dummy bytes; continues on the next page
    ContinuousArrayRead = 0x1B,
    /// 3 address bytes followed by data. On deselect the page is erased and the complete SRAM
    /// buffer 1 is programmed into it
    ProgramThroughBuffer1 = 0x82,
    /// Same as `ProgramThroughBuffer1` using SRAM buffer 2
    ProgramThroughBuffer2 = 0x85,
    PageErase = 0x81,
    DeviceId = 0x9F,
    StatusRegisterRead = 0xD7,
    ConfigurationRegisterRead = 0x3F,
    /// Leads the 4 byte chip erase sequence
    ChipErase = 0xC7,
    /// Leads the 4 byte page size and sector protection sequences
    Configure = 0x3D,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SramBuffer {
    One,
    Two,
}

impl SramBuffer {
    fn program_opcode(self) -> Opcode {
        match self {
            SramBuffer::One => Opcode::ProgramThroughBuffer1,
            SramBuffer::Two => Opcode::ProgramThroughBuffer2,
        }
    }

    fn other(self) -> Self {
        match self {
            SramBuffer::One => SramBuffer::Two,
            SramBuffer::Two => SramBuffer::One,
        }
    }
}

/// Both status register bytes, byte 1 in the upper half.
#[derive(Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusRegister(pub u16);

impl StatusRegister {
    /// RDY/BUSY bit of both bytes. The chip drives them high once it is ready.
    pub const READY_MASK: u16 = 0x8080;
    const COMPARE: u16 = 0x4000;
    const DENSITY_SHIFT: u16 = 10;
    const DENSITY_MASK: u16 = 0x0F;
    const PROTECT: u16 = 0x0200;
    const PAGE_SIZE_BINARY: u16 = 0x0100;
    const PROGRAM_ERROR: u16 = 0x0020;
    const SECTOR_LOCKDOWN: u16 = 0x0008;

    pub fn is_ready(&self) -> bool {
        self.0 & Self::READY_MASK == Self::READY_MASK
    }

    pub fn is_busy(&self) -> bool {
        !self.is_ready()
    }

    /// Result of the last buffer compare, true if main memory and buffer differed.
    pub fn compare_mismatch(&self) -> bool {
        self.0 & Self::COMPARE != 0
    }

    pub fn density(&self) -> u8 {
        ((self.0 >> Self::DENSITY_SHIFT) & Self::DENSITY_MASK) as u8
    }

    pub fn is_sector_protection_enabled(&self) -> bool {
        self.0 & Self::PROTECT != 0
    }

    /// True once the chip is switched from 528 to 512 byte pages.
    pub fn is_page_size_binary(&self) -> bool {
        self.0 & Self::PAGE_SIZE_BINARY != 0
    }

    /// Set if the last erase or program operation failed.
    pub fn program_error(&self) -> bool {
        self.0 & Self::PROGRAM_ERROR != 0
    }

    pub fn is_sector_lockdown_enabled(&self) -> bool {
        self.0 & Self::SECTOR_LOCKDOWN != 0
    }
}

impl fmt::Debug for StatusRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusRegister({:#06x})", self.0)
    }
}

impl fmt::Display for StatusRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        writeln!(f, "status register: {:#018b}", self.0)?;
        writeln!(f, "  ready:             {}", yes_no(self.is_ready()))?;
        writeln!(
            f,
            "  compare:           {}",
            if self.compare_mismatch() { "mismatch" } else { "match" }
        )?;
        writeln!(f, "  density:           {:#06b}", self.density())?;
        writeln!(
            f,
            "  sector protection: {}",
            yes_no(self.is_sector_protection_enabled())
        )?;
        writeln!(
            f,
            "  page size:         {}",
            if self.is_page_size_binary() { 512 } else { 528 }
        )?;
        writeln!(f, "  program error:     {}", yes_no(self.program_error()))?;
        writeln!(
            f,
            "  sector lockdown:   {}",
            yes_no(self.is_sector_lockdown_enabled())
        )
    }
}

/// The five byte answer to [`Opcode::DeviceId`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceId(pub [u8; 5]);

impl DeviceId {
    pub fn manufacturer(&self) -> u8 {
        self.0[0]
    }

    /// Upper three bits of device ID byte 1, 0b001 for DataFlash.
    pub fn family(&self) -> u8 {
        self.0[1] >> 5
    }

    /// Lower five bits of device ID byte 1, 0b00111 for 32 Mbit.
    pub fn density(&self) -> u8 {
        self.0[1] & 0x1F
    }
}

/// Owns the transport of exactly one DataFlash. `&mut self` on every operation keeps command
/// sequences from interleaving, including the busy polling after erase and program.
pub struct DataFlash<T: Transport> {
    transport: T,
    poll_limit: u32,
    buffer: SramBuffer,
}

impl<T: Transport> DataFlash<T> {
    pub fn new(transport: T, poll_limit: u32) -> Self {
        Self {
            transport,
            poll_limit,
            buffer: SramBuffer::One,
        }
    }

    pub fn release(self) -> T {
        self.transport
    }

    /// Runs `f` with chip-select asserted. Chip-select is released even if `f` fails.
    fn command<R>(
        &mut self,
        f: impl FnOnce(&mut T) -> Result<R, T::Error>,
    ) -> Result<R, Error> {
        self.transport.select().map_err(|_| Error::DeviceIo)?;
        let result = f(&mut self.transport);
        let released = self.transport.deselect();
        let value = result.map_err(|_| Error::DeviceIo)?;
        released.map_err(|_| Error::DeviceIo)?;
        Ok(value)
    }

    pub fn read_status_register(&mut self) -> Result<StatusRegister, Error> {
        let raw = self.command(|t| {
            t.transfer(Opcode::StatusRegisterRead as u8)?;
            let high = t.transfer(0x00)?;
            let low = t.transfer(0x00)?;
            Ok(u16::from_be_bytes([high, low]))
        })?;
        Ok(StatusRegister(raw))
    }

    pub fn is_busy(&mut self) -> Result<bool, Error> {
        Ok(self.read_status_register()?.is_busy())
    }

    /// Polls the status register until the chip is ready, at most `poll_limit` times.
    pub fn wait_ready(&mut self) -> Result<StatusRegister, Error> {
        for _ in 0..self.poll_limit.max(1) {
            let status = self.read_status_register()?;
            if status.is_ready() {
                return Ok(status);
            }
        }

        #[cfg(feature = "defmt")]
        warn!("wait_ready: still busy after {} polls", self.poll_limit);

        Err(Error::DeviceBusyTimeout)
    }

    /// Waits for an erase or program to finish and checks its outcome.
    fn finish_operation(&mut self) -> Result<(), Error> {
        if self.wait_ready()?.program_error() {
            return Err(Error::ProgramFailed);
        }
        Ok(())
    }

    pub fn read_configuration_register(&mut self) -> Result<u8, Error> {
        self.command(|t| {
            t.transfer(Opcode::ConfigurationRegisterRead as u8)?;
            t.transfer(0x00)
        })
    }

    pub fn read_device_id(&mut self) -> Result<DeviceId, Error> {
        let mut id = [0u8; 5];
        self.command(|t| {
            t.transfer(Opcode::DeviceId as u8)?;
            for byte in id.iter_mut() {
                *byte = t.transfer(0x00)?;
            }
            Ok(())
        })?;
        Ok(DeviceId(id))
    }

    /// Fills `buf` starting at `addr`. Reads that stay within the page use a page read, longer
    /// ones a continuous read that moves on to the following pages.
    pub fn read_bytes(&mut self, addr: FlashAddress, buf: &mut [u8]) -> Result<(), Error> {
        if addr.to_linear() as usize + buf.len() > CAPACITY {
            return Err(Error::OutOfBounds);
        }

        let (opcode, dummy_bytes) = if buf.len() <= addr.remaining_in_page() {
            (Opcode::MainMemoryPageRead, PAGE_READ_DUMMY_BYTES)
        } else {
            (Opcode::ContinuousArrayRead, CONTINUOUS_READ_DUMMY_BYTES)
        };

        #[cfg(feature = "defmt")]
        trace!("read_bytes: {} @{}[{}]", opcode, addr, buf.len());

        #[cfg(feature = "debug-logs")]
        println!("  device: read_bytes: {opcode} {addr:?}[{}]", buf.len());

        self.command(|t| {
            t.transfer(opcode as u8)?;
            for byte in addr.to_command_bytes() {
                t.transfer(byte)?;
            }
            for _ in 0..dummy_bytes {
                t.transfer(0x00)?;
            }
            for byte in buf.iter_mut() {
                *byte = t.transfer(0x00)?;
            }
            Ok(())
        })
    }

    pub fn read_byte(&mut self, addr: FlashAddress) -> Result<u8, Error> {
        let mut buf = [0u8; 1];
        self.read_bytes(addr, &mut buf)?;
        Ok(buf[0])
    }

    /// Little endian, the two bytes follow the in-page wrap of [`DataFlash::write_u16`].
    pub fn read_u16(&mut self, addr: FlashAddress) -> Result<u16, Error> {
        Ok(u16::from_le_bytes([
            self.read_byte(addr)?,
            self.read_byte(addr.translate(1))?,
        ]))
    }

    /// Replaces the bytes starting at `addr` with `data`. Bytes beyond the end of the page wrap
    /// around to byte 0 of the same page, like a buffered write on the chip.
    ///
    /// Both program op-codes erase the page and program the complete SRAM buffer. Unless `data`
    /// covers the whole page, the page is read first so the remaining bytes are programmed back
    /// unchanged.
    pub fn write_bytes(&mut self, addr: FlashAddress, data: &[u8]) -> Result<(), Error> {
        if data.len() > PAGE_SIZE {
            return Err(Error::OutOfBounds);
        }
        if data.is_empty() {
            return Ok(());
        }

        let start = addr.page_start();
        let mut content = [0u8; PAGE_SIZE];
        if data.len() < PAGE_SIZE {
            self.read_bytes(start, &mut content)?;
        }
        for (i, &byte) in data.iter().enumerate() {
            content[addr.translate(i as u32).byte() as usize] = byte;
        }
        self.program_page(addr.page(), &content)
    }

    pub fn write_byte(&mut self, addr: FlashAddress, byte: u8) -> Result<(), Error> {
        self.write_bytes(addr, &[byte])
    }

    pub fn write_u16(&mut self, addr: FlashAddress, value: u16) -> Result<(), Error> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    pub fn write_u32(&mut self, addr: FlashAddress, value: u32) -> Result<(), Error> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    /// Writes `data` to consecutive addresses starting at `offset`, carrying into the next page
    /// instead of wrapping. Programs every touched page once.
    pub fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), Error> {
        if offset as usize + data.len() > CAPACITY {
            return Err(Error::OutOfBounds);
        }

        let mut offset = offset;
        let mut remaining = data;
        while !remaining.is_empty() {
            let addr = FlashAddress::from_linear(offset)?;
            let (chunk, rest) = remaining.split_at(addr.remaining_in_page().min(remaining.len()));
            self.write_bytes(addr, chunk)?;
            offset += chunk.len() as u32;
            remaining = rest;
        }
        Ok(())
    }

    /// Reads `page`, lets `patch` modify it and programs the patched content if anything
    /// changed.
    pub fn rewrite_page(
        &mut self,
        page: u16,
        patch: impl FnOnce(&mut [u8; PAGE_SIZE]),
    ) -> Result<(), Error> {
        let start = FlashAddress::try_new(page, 0)?;
        let mut current = [0u8; PAGE_SIZE];
        self.read_bytes(start, &mut current)?;

        let mut patched = current;
        patch(&mut patched);
        if patched == current {
            return Ok(());
        }

        #[cfg(feature = "defmt")]
        trace!("rewrite_page: {}", page);

        self.program_page(page, &patched)
    }

    /// Same as [`DataFlash::write_bytes`], but leaves the page alone if it already holds `data`.
    pub fn rewrite_bytes(&mut self, addr: FlashAddress, data: &[u8]) -> Result<(), Error> {
        if data.len() > PAGE_SIZE {
            return Err(Error::OutOfBounds);
        }

        self.rewrite_page(addr.page(), |page| {
            for (i, &byte) in data.iter().enumerate() {
                page[addr.translate(i as u32).byte() as usize] = byte;
            }
        })
    }

    /// Fills the next SRAM buffer with `content` and programs it into `page`, with built-in
    /// erase. The buffers alternate so consecutive page programs use different buffers.
    fn program_page(&mut self, page: u16, content: &[u8; PAGE_SIZE]) -> Result<(), Error> {
        let start = FlashAddress::try_new(page, 0)?;
        let opcode = self.buffer.program_opcode();
        self.buffer = self.buffer.other();

        #[cfg(feature = "defmt")]
        trace!("program_page: {} {}", opcode, page);

        #[cfg(feature = "debug-logs")]
        println!("  device: program_page: {opcode} {page}");

        self.command(|t| {
            t.transfer(opcode as u8)?;
            for byte in start.to_command_bytes() {
                t.transfer(byte)?;
            }
            for &byte in content {
                t.transfer(byte)?;
            }
            Ok(())
        })?;
        self.finish_operation()
    }

    /// Sets every byte of the page containing `addr` to 0xFF.
    pub fn erase_page(&mut self, addr: FlashAddress) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase_page: {}", addr.page());

        #[cfg(feature = "debug-logs")]
        println!("  device: erase_page: {}", addr.page());

        let page = addr.page_start();
        self.command(|t| {
            t.transfer(Opcode::PageErase as u8)?;
            for byte in page.to_command_bytes() {
                t.transfer(byte)?;
            }
            Ok(())
        })?;
        self.finish_operation()
    }

    pub fn erase_pages(&mut self, pages: Range<u16>) -> Result<(), Error> {
        for page in pages {
            self.erase_page(FlashAddress::try_new(page, 0)?)?;
        }
        Ok(())
    }

    pub fn erase_chip(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase_chip");

        self.send_sequence(&CHIP_ERASE)?;
        self.finish_operation()
    }

    pub fn disable_sector_protection(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("disable_sector_protection");

        self.send_sequence(&DISABLE_SECTOR_PROTECT)
    }

    /// One-time programmable: switches the chip to 512 byte pages. Only takes effect after a
    /// power cycle on real hardware.
    pub fn configure_page_size_binary(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("configure_page_size_binary");

        self.send_sequence(&BINARY_PAGE_SIZE)?;
        self.finish_operation()
    }

    fn send_sequence(&mut self, sequence: &[u8; 4]) -> Result<(), Error> {
        self.command(|t| {
            for &byte in sequence {
                t.transfer(byte)?;
            }
            Ok(())
        })
    }
}

impl<T: Transport> ErrorType for DataFlash<T> {
    type Error = Error;
}

/// Linear offsets are `page * PAGE_SIZE + byte`.
impl<T: Transport> ReadNorFlash for DataFlash<T> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.read_bytes(FlashAddress::from_linear(offset)?, bytes)
    }

    fn capacity(&self) -> usize {
        CAPACITY
    }
}

impl<T: Transport> NorFlash for DataFlash<T> {
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = PAGE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from > to || to as usize > CAPACITY {
            return Err(Error::OutOfBounds);
        }
        if !from.is_multiple_of(PAGE_SIZE as u32) || !to.is_multiple_of(PAGE_SIZE as u32) {
            return Err(Error::NotAligned);
        }
        let pages = (from / PAGE_SIZE as u32) as u16..(to / PAGE_SIZE as u32) as u16;
        self.erase_pages(pages)
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.program(offset, bytes)
    }
}
