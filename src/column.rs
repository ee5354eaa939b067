//! Image data. Every slot owns a region of `PAGES_PER_IMAGE` pages holding its columns back to
//! back, so a column is always read and written as one unit.

use crate::address::FlashAddress;
use crate::device::DataFlash;
use crate::error::Error;
use crate::layout::{COLUMN_SIZE, FRAME_SIZE, Layout};
use crate::platform::Transport;
use core::fmt;
#[cfg(feature = "defmt")]
use defmt::trace;

/// One column, already packed for the LED driver chain by the web server.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelColumn(pub [u8; COLUMN_SIZE]);

impl PixelColumn {
    /// Content of a column that was erased and never written.
    pub const ERASED: PixelColumn = PixelColumn([0xFF; COLUMN_SIZE]);

    pub fn as_bytes(&self) -> &[u8; COLUMN_SIZE] {
        &self.0
    }

    /// The column split into the bursts shifted into the driver chain, top to bottom.
    pub fn frames(&self) -> impl Iterator<Item = &[u8]> {
        self.0.chunks_exact(FRAME_SIZE)
    }
}

impl Default for PixelColumn {
    fn default() -> Self {
        Self::ERASED
    }
}

impl From<[u8; COLUMN_SIZE]> for PixelColumn {
    fn from(value: [u8; COLUMN_SIZE]) -> Self {
        Self(value)
    }
}

impl fmt::Debug for PixelColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PixelColumn([{:#04x}, ..; {}])", self.0[0], COLUMN_SIZE)
    }
}

/// Hex dump, 16 bytes per line prefixed with the offset.
impl fmt::Display for PixelColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (line, chunk) in self.0.chunks(16).enumerate() {
            write!(f, "{:04x}:", line * 16)?;
            for byte in chunk {
                write!(f, " {byte:02x}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Maps (slot, column) pairs onto the image regions of a [`Layout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnStore {
    layout: Layout,
}

impl ColumnStore {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Rejects slots >= `MAX_IMAGES` and columns >= `COLUMNS_PER_IMAGE` with `InvalidIndex`.
    pub fn column_address(&self, slot: u8, column: u16) -> Result<FlashAddress, Error> {
        self.layout.column_address(slot, column)
    }

    pub fn read_column_into<T: Transport>(
        &self,
        flash: &mut DataFlash<T>,
        slot: u8,
        column: u16,
        column_buf: &mut PixelColumn,
    ) -> Result<(), Error> {
        let addr = self.column_address(slot, column)?;

        #[cfg(feature = "defmt")]
        trace!("read_column: {}/{} @{}", slot, column, addr);

        flash.read_bytes(addr, &mut column_buf.0)
    }

    pub fn read_column<T: Transport>(
        &self,
        flash: &mut DataFlash<T>,
        slot: u8,
        column: u16,
    ) -> Result<PixelColumn, Error> {
        let mut column_buf = PixelColumn::ERASED;
        self.read_column_into(flash, slot, column, &mut column_buf)?;
        Ok(column_buf)
    }

    /// Programs one column. Columns share their first and last page with the neighbouring
    /// columns, those bytes are preserved.
    pub fn write_column<T: Transport>(
        &self,
        flash: &mut DataFlash<T>,
        slot: u8,
        column: u16,
        data: &PixelColumn,
    ) -> Result<(), Error> {
        let addr = self.column_address(slot, column)?;

        #[cfg(feature = "defmt")]
        trace!("write_column: {}/{} @{}", slot, column, addr);

        flash.program(addr.to_linear(), &data.0)
    }

    /// Erases the complete image region of `slot`, every column then reads as
    /// [`PixelColumn::ERASED`].
    pub fn erase_slot<T: Transport>(&self, flash: &mut DataFlash<T>, slot: u8) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase_slot: {}", slot);

        flash.erase_pages(self.layout.image_pages(slot)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_frames_per_column() {
        let mut raw = [0u8; COLUMN_SIZE];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = (i / FRAME_SIZE) as u8;
        }
        let column = PixelColumn::from(raw);
        let frames: Vec<&[u8]> = column.frames().collect();
        assert_eq!(frames.len(), 4);
        for (n, frame) in frames.iter().enumerate() {
            assert_eq!(frame.len(), FRAME_SIZE);
            assert!(frame.iter().all(|&b| b == n as u8));
        }
    }

    #[test]
    fn hex_dump() {
        let mut raw = [0xFFu8; COLUMN_SIZE];
        raw[..3].copy_from_slice(&[0x00, 0x01, 0xAB]);
        let dump = PixelColumn(raw).to_string();
        let mut lines = dump.lines();
        assert_eq!(
            lines.next(),
            Some("0000: 00 01 ab ff ff ff ff ff ff ff ff ff ff ff ff ff")
        );
        // 1156 = 72 full lines plus 4 bytes
        assert_eq!(dump.lines().count(), 73);
        assert_eq!(dump.lines().last(), Some("0480: ff ff ff ff"));
    }
}
