//! The fixed memory map of the display: metadata pages at the start of the chip followed by
//! fourteen equally sized image regions.

use crate::address::{FlashAddress, PAGE_COUNT, PAGE_SIZE};
use crate::error::Error;
use core::ops::Range;

/// Images that fit into the carousel.
pub const MAX_IMAGES: u8 = 14;
/// Bytes reserved per filename. Names shorter than this are zero padded.
pub const FILENAME_SIZE: usize = 16;
/// Horizontal resolution of an image.
pub const COLUMNS_PER_IMAGE: u16 = 256;
/// Vertical resolution of an image.
pub const PIXELS_PER_COLUMN: usize = 192;
/// One column as it is shifted into the LED driver chain: 192 pixels of 16-bit color for each
/// of the three color channels packed into 48 x 12 bit grayscale words per driver, plus the
/// control bit of every driver frame.
pub const COLUMN_SIZE: usize = 1156;
/// One SPI burst into a chain of three TLC5955 (769 bits, byte aligned). A column is four of them.
pub const FRAME_SIZE: usize = 289;
/// Size of one image region.
pub const IMAGE_SIZE: usize = COLUMN_SIZE * COLUMNS_PER_IMAGE as usize;
/// Pages covered by one image region.
pub const PAGES_PER_IMAGE: u16 = (IMAGE_SIZE / PAGE_SIZE) as u16;

const _: () = assert!(
    COLUMN_SIZE == FRAME_SIZE * 4,
    "A column must be made up of whole driver frames"
);
const _: () = assert!(
    IMAGE_SIZE.is_multiple_of(PAGE_SIZE),
    "Image regions must start on a page boundary"
);

/// Addresses of everything the storage keeps on the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Layout {
    /// `MAX_IMAGES` consecutive `FILENAME_SIZE` byte entries
    pub filename_table: FlashAddress,
    pub global_brightness: FlashAddress,
    pub red_max_current: FlashAddress,
    pub green_max_current: FlashAddress,
    pub blue_max_current: FlashAddress,
    /// little endian u16, bit n set = slot n is part of the carousel
    pub carousel_mask: FlashAddress,
    pub first_image_page: u16,
}

impl Layout {
    /// The map used by the Revolution firmware and its web server.
    pub const REVOLUTION: Layout = Layout {
        filename_table: FlashAddress::new(9, 0),
        global_brightness: FlashAddress::new(10, 0),
        red_max_current: FlashAddress::new(10, 2),
        green_max_current: FlashAddress::new(10, 4),
        blue_max_current: FlashAddress::new(10, 6),
        carousel_mask: FlashAddress::new(10, 8),
        first_image_page: 99,
    };

    /// Checks that no two regions overlap and that everything fits onto the chip.
    pub const fn is_valid(&self) -> bool {
        let table_end = self.filename_table.byte() as usize + MAX_IMAGES as usize * FILENAME_SIZE;
        let images_end =
            self.first_image_page as usize + MAX_IMAGES as usize * PAGES_PER_IMAGE as usize;
        let metadata = [
            self.global_brightness,
            self.red_max_current,
            self.green_max_current,
            self.blue_max_current,
            self.carousel_mask,
        ];

        if table_end > PAGE_SIZE || images_end > PAGE_COUNT {
            return false;
        }
        if self.filename_table.page() >= self.first_image_page {
            return false;
        }

        let mut i = 0;
        while i < metadata.len() {
            let field = metadata[i];
            if field.page() >= self.first_image_page || field.remaining_in_page() < 2 {
                return false;
            }
            if field.page() == self.filename_table.page()
                && (field.byte() as usize) < table_end
                && field.byte() >= self.filename_table.byte()
            {
                return false;
            }
            let mut j = i + 1;
            while j < metadata.len() {
                let other = metadata[j];
                if field.page() == other.page() && field.byte().abs_diff(other.byte()) < 2 {
                    return false;
                }
                j += 1;
            }
            i += 1;
        }
        true
    }

    pub(crate) const fn check_slot(slot: u8) -> Result<(), Error> {
        if slot >= MAX_IMAGES {
            return Err(Error::InvalidIndex);
        }
        Ok(())
    }

    /// Address of the filename entry of `slot`.
    pub fn filename_address(&self, slot: u8) -> Result<FlashAddress, Error> {
        Self::check_slot(slot)?;
        Ok(self
            .filename_table
            .translate(slot as u32 * FILENAME_SIZE as u32))
    }

    /// First page of the image region of `slot`.
    pub fn image_base_page(&self, slot: u8) -> Result<u16, Error> {
        Self::check_slot(slot)?;
        (slot as u16)
            .checked_mul(PAGES_PER_IMAGE)
            .and_then(|offset| self.first_image_page.checked_add(offset))
            .ok_or(Error::OutOfBounds)
    }

    /// All pages of the image region of `slot`.
    pub fn image_pages(&self, slot: u8) -> Result<Range<u16>, Error> {
        let base = self.image_base_page(slot)?;
        let end = base
            .checked_add(PAGES_PER_IMAGE)
            .filter(|&end| end as usize <= PAGE_COUNT)
            .ok_or(Error::OutOfBounds)?;
        Ok(base..end)
    }

    /// Start of `column` of the image in `slot`. Columns are stored back to back, so most of
    /// them start in the middle of a page and continue on the next one.
    pub fn column_address(&self, slot: u8, column: u16) -> Result<FlashAddress, Error> {
        if column >= COLUMNS_PER_IMAGE {
            return Err(Error::InvalidIndex);
        }
        let base = FlashAddress::try_new(self.image_base_page(slot)?, 0)?;
        FlashAddress::from_linear(base.to_linear() + column as u32 * COLUMN_SIZE as u32)
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::REVOLUTION
    }
}

const _: () = assert!(
    Layout::REVOLUTION.is_valid(),
    "Memory map regions must not overlap"
);
const _: () = assert!(PAGES_PER_IMAGE == 578);
