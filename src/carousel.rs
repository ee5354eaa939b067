//! Bookkeeping of the images that take part in the display rotation.
//!
//! The carousel is a bitmask with one bit per slot plus the filename table. The mask is cached
//! in memory and only written back by [`Carousel::save`]; filenames always go straight to flash.

use crate::Filename;
use crate::device::DataFlash;
use crate::error::Error;
use crate::layout::{FILENAME_SIZE, Layout, MAX_IMAGES};
use crate::platform::Transport;
#[cfg(feature = "defmt")]
use defmt::{debug, warn};

/// Bits of the mask that can represent a slot.
pub const VALID_SLOTS: u16 = (1 << MAX_IMAGES) - 1;

/// The mask of an erased chip.
const ERASED_MASK: u16 = u16::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Carousel {
    mask: u16,
    layout: Layout,
}

impl Carousel {
    /// An empty carousel, nothing is read from or written to flash.
    pub fn new(layout: Layout) -> Self {
        Self { mask: 0, layout }
    }

    /// Bits above the last slot are dropped.
    pub fn from_mask(layout: Layout, mask: u16) -> Self {
        Self {
            mask: mask & VALID_SLOTS,
            layout,
        }
    }

    /// Reads the persisted mask. A never written (erased) mask loads as an empty carousel.
    pub fn load<T: Transport>(flash: &mut DataFlash<T>, layout: &Layout) -> Result<Self, Error> {
        let raw = flash.read_u16(layout.carousel_mask)?;
        if raw == ERASED_MASK {
            #[cfg(feature = "defmt")]
            warn!("carousel mask is erased, starting with an empty carousel");

            return Ok(Self::new(*layout));
        }

        #[cfg(feature = "defmt")]
        debug!("carousel loaded: {:#06x}", raw);

        Ok(Self::from_mask(*layout, raw))
    }

    pub fn save<T: Transport>(&self, flash: &mut DataFlash<T>) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        debug!("carousel save: {:#06x}", self.mask);

        flash.rewrite_bytes(self.layout.carousel_mask, &self.mask.to_le_bytes())
    }

    pub fn mask(&self) -> u16 {
        self.mask
    }

    pub fn is_present(&self, slot: u8) -> Result<bool, Error> {
        Layout::check_slot(slot)?;
        Ok(self.mask & (1 << slot) != 0)
    }

    pub fn set_present(&mut self, slot: u8) -> Result<(), Error> {
        Layout::check_slot(slot)?;
        self.mask |= 1 << slot;
        Ok(())
    }

    /// Removes `slot` from the mask and blanks its filename entry on flash.
    pub fn clear_present<T: Transport>(
        &mut self,
        flash: &mut DataFlash<T>,
        slot: u8,
    ) -> Result<(), Error> {
        Layout::check_slot(slot)?;
        self.mask &= !(1 << slot);
        self.set_filename(flash, slot, &Filename::EMPTY)
    }

    /// Empties the mask and blanks the whole filename table.
    pub fn clear_all<T: Transport>(&mut self, flash: &mut DataFlash<T>) -> Result<(), Error> {
        self.mask = 0;
        flash.rewrite_bytes(
            self.layout.filename_table,
            &[0u8; FILENAME_SIZE * MAX_IMAGES as usize],
        )
    }

    pub fn count(&self) -> u8 {
        self.mask.count_ones() as u8
    }

    pub fn is_full(&self) -> bool {
        self.mask == VALID_SLOTS
    }

    /// The lowest slot not in the carousel. When all slots are taken slot 0 is returned: it is
    /// always the one that gets replaced, no matter how recently it was written.
    pub fn next_free_slot(&self) -> u8 {
        if self.is_full() {
            return 0;
        }
        (!self.mask & VALID_SLOTS).trailing_zeros() as u8
    }

    /// Slots in the carousel in display order.
    pub fn slots(&self) -> impl Iterator<Item = u8> + '_ {
        (0..MAX_IMAGES).filter(|&slot| self.mask & (1 << slot) != 0)
    }

    pub fn filename<T: Transport>(
        &self,
        flash: &mut DataFlash<T>,
        slot: u8,
    ) -> Result<Filename, Error> {
        let mut raw = [0u8; FILENAME_SIZE];
        flash.read_bytes(self.layout.filename_address(slot)?, &mut raw)?;
        Ok(Filename::from_raw(raw))
    }

    pub fn set_filename<T: Transport>(
        &self,
        flash: &mut DataFlash<T>,
        slot: u8,
        filename: &Filename,
    ) -> Result<(), Error> {
        flash.rewrite_bytes(self.layout.filename_address(slot)?, filename.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: Layout = Layout::REVOLUTION;

    #[test]
    fn count_follows_mask() {
        let mut carousel = Carousel::new(LAYOUT);
        assert_eq!(carousel.count(), 0);

        for (n, slot) in [3u8, 0, 13, 7].into_iter().enumerate() {
            carousel.set_present(slot).unwrap();
            assert_eq!(carousel.count() as usize, n + 1);
            assert_eq!(carousel.count(), carousel.mask().count_ones() as u8);
        }

        // already present
        carousel.set_present(3).unwrap();
        assert_eq!(carousel.count(), 4);
        assert_eq!(carousel.mask(), 0b0010_0000_1000_1001);
    }

    #[test]
    fn next_free_slot_is_lowest_clear_bit() {
        assert_eq!(Carousel::from_mask(LAYOUT, 0).next_free_slot(), 0);
        assert_eq!(Carousel::from_mask(LAYOUT, 0b1).next_free_slot(), 1);
        assert_eq!(Carousel::from_mask(LAYOUT, 0b1011).next_free_slot(), 2);
        assert_eq!(
            Carousel::from_mask(LAYOUT, VALID_SLOTS & !(1 << 13)).next_free_slot(),
            13
        );
    }

    #[test]
    fn full_carousel_evicts_slot_zero() {
        let mut carousel = Carousel::new(LAYOUT);
        for slot in 0..MAX_IMAGES {
            carousel.set_present(slot).unwrap();
        }
        assert!(carousel.is_full());
        assert_eq!(carousel.count(), MAX_IMAGES);
        assert_eq!(carousel.next_free_slot(), 0);
    }

    #[test]
    fn upper_bits_are_never_set() {
        let carousel = Carousel::from_mask(LAYOUT, 0xFFFF);
        assert_eq!(carousel.mask(), VALID_SLOTS);
        assert_eq!(carousel.mask() & 0xC000, 0);
        assert_eq!(carousel.count(), 14);

        let mut carousel = Carousel::new(LAYOUT);
        assert_eq!(carousel.set_present(14), Err(Error::InvalidIndex));
        assert_eq!(carousel.set_present(15), Err(Error::InvalidIndex));
        assert_eq!(carousel.is_present(200), Err(Error::InvalidIndex));
        assert_eq!(carousel.mask(), 0);
    }

    #[test]
    fn slots_in_display_order() {
        let carousel = Carousel::from_mask(LAYOUT, 0b0100_0000_0010_0101);
        assert_eq!(carousel.slots().collect::<Vec<_>>(), vec![0, 2, 5, 13]);
    }
}
