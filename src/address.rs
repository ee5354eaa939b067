//! Page/byte addressing of the DataFlash in its binary (512 byte) page mode.

use crate::error::Error;
use core::fmt;

/// Size of a main memory page once the chip is switched to binary page size.
pub const PAGE_SIZE: usize = 512;
/// Number of main memory pages of the AT45DQ321.
pub const PAGE_COUNT: usize = 8192;
/// Total capacity in bytes.
pub const CAPACITY: usize = PAGE_SIZE * PAGE_COUNT;

const BYTE_ADDRESS_BITS: u32 = PAGE_SIZE.trailing_zeros();

/// A location in main memory, addressed as the chip sees it: a page and a byte within that page.
///
/// `byte` is always below [`PAGE_SIZE`] and `page` below [`PAGE_COUNT`].
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashAddress {
    page: u16,
    byte: u16,
}

impl FlashAddress {
    /// Creates an address from its page and in-page byte.
    ///
    /// Panics if either is out of range, use it in a const context to move the check to compile
    /// time: `const { FlashAddress::new(10, 8) }`
    pub const fn new(page: u16, byte: u16) -> Self {
        assert!((page as usize) < PAGE_COUNT);
        assert!((byte as usize) < PAGE_SIZE);
        Self { page, byte }
    }

    pub const fn try_new(page: u16, byte: u16) -> Result<Self, Error> {
        if page as usize >= PAGE_COUNT || byte as usize >= PAGE_SIZE {
            return Err(Error::OutOfBounds);
        }
        Ok(Self { page, byte })
    }

    /// Resolves a linear byte offset into page and byte. Unlike [`FlashAddress::translate`] this
    /// carries into the next page.
    pub const fn from_linear(offset: u32) -> Result<Self, Error> {
        if offset as usize >= CAPACITY {
            return Err(Error::OutOfBounds);
        }
        Ok(Self {
            page: (offset >> BYTE_ADDRESS_BITS) as u16,
            byte: (offset & (PAGE_SIZE as u32 - 1)) as u16,
        })
    }

    pub const fn page(&self) -> u16 {
        self.page
    }

    pub const fn byte(&self) -> u16 {
        self.byte
    }

    pub const fn to_linear(&self) -> u32 {
        ((self.page as u32) << BYTE_ADDRESS_BITS) | self.byte as u32
    }

    /// The address reached after `delta` sequential byte transfers of a page read or a buffered
    /// write: the byte counter wraps back to byte 0 of the *same* page, it never carries into
    /// the next one.
    pub const fn translate(&self, delta: u32) -> Self {
        let byte = (self.byte as u32 + delta % PAGE_SIZE as u32) % PAGE_SIZE as u32;
        Self {
            page: self.page,
            byte: byte as u16,
        }
    }

    /// Number of bytes that can be transferred before the in-page counter wraps.
    pub const fn remaining_in_page(&self) -> usize {
        PAGE_SIZE - self.byte as usize
    }

    /// First byte of the same page.
    pub const fn page_start(&self) -> Self {
        Self {
            page: self.page,
            byte: 0,
        }
    }

    /// The three address bytes following an op-code, most significant first. With binary page
    /// size the chip expects `page` in A21..A9 and `byte` in A8..A0.
    pub(crate) const fn to_command_bytes(&self) -> [u8; 3] {
        let [_, a, b, c] = self.to_linear().to_be_bytes();
        [a, b, c]
    }
}

impl fmt::Debug for FlashAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlashAddress({}:{})", self.page, self.byte)
    }
}
