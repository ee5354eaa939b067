use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};
use thiserror::Error;

/// Errors that can occur while talking to the DataFlash or while mapping slots, columns and
/// metadata fields onto it. Marked as non-exhaustive to allow for future additions without
/// breaking the API. A caller usually only needs to handle `InvalidIndex` and the filename
/// errors, the remaining ones indicate a wiring or hardware problem.
#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// A slot index >= `MAX_IMAGES` or a column index >= `COLUMNS_PER_IMAGE`
    #[error("invalid slot or column index")]
    InvalidIndex,

    /// The status register kept reporting busy for more than `Config::poll_limit` reads
    #[error("device busy timeout")]
    DeviceBusyTimeout,

    /// The internal error value of the provided `Transport` is dropped and reported as this
    #[error("device io error")]
    DeviceIo,

    /// The chip flagged the last erase or program operation as failed (EPE bit)
    #[error("erase or program failed")]
    ProgramFailed,

    /// The address or length is not within the chip capacity
    #[error("address out of bounds")]
    OutOfBounds,

    /// Erase ranges have to start and end on a page boundary
    #[error("not aligned to a page")]
    NotAligned,

    /// Filenames are stored in a fixed 16 byte field
    #[error("filename too long")]
    FilenameTooLong,

    /// Filenames are limited to printable ASCII characters
    #[error("filename malformed")]
    FilenameMalformed,

    /// The regions of a `Layout` overlap or do not fit onto the chip, see `Layout::is_valid`
    #[error("invalid memory layout")]
    InvalidLayout,

    /// The manufacturer byte of the device ID is reported
    #[error("unknown device: manufacturer {0:#04x}")]
    UnknownDevice(u8),

    /// Writing a diagnostic dump to the console failed
    #[error("console write failed")]
    Console,

    /// A previous transport failure left the storage in an unknown state. Release the
    /// transport and construct a new `Storage` to recover.
    #[error("storage faulted")]
    Faulted,
}

impl NorFlashError for Error {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Error::OutOfBounds | Error::InvalidIndex => NorFlashErrorKind::OutOfBounds,
            Error::NotAligned => NorFlashErrorKind::NotAligned,
            _ => NorFlashErrorKind::Other,
        }
    }
}
