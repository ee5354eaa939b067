use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

/// Byte level access to the SPI line of the DataFlash. Implementations only move bytes and
/// toggle chip-select, all command framing lives in [`crate::device::DataFlash`].
///
/// See [`SpiTransport`] for an implementation on top of `embedded-hal`.
pub trait Transport {
    type Error;

    /// Drives chip-select active. Starts a new command on the chip.
    fn select(&mut self) -> Result<(), Self::Error>;

    /// Releases chip-select. Erase and program commands start executing on this edge.
    fn deselect(&mut self) -> Result<(), Self::Error>;

    /// Clocks one byte out and returns the byte clocked in at the same time.
    fn transfer(&mut self, byte: u8) -> Result<u8, Self::Error>;
}

impl<T: Transport> Transport for &mut T {
    type Error = T::Error;

    fn select(&mut self) -> Result<(), Self::Error> {
        T::select(self)
    }

    fn deselect(&mut self) -> Result<(), Self::Error> {
        T::deselect(self)
    }

    fn transfer(&mut self, byte: u8) -> Result<u8, Self::Error> {
        T::transfer(self, byte)
    }
}

/// Errors of the two halves of an [`SpiTransport`].
#[derive(Debug)]
pub enum SpiTransportError<S, P> {
    Spi(S),
    ChipSelect(P),
}

/// Combines an exclusively owned SPI bus with a manually driven, active low chip-select pin.
///
/// The bus has to be configured for SPI mode 0 or 3 beforehand.
pub struct SpiTransport<SPI, CS> {
    spi: SPI,
    cs: CS,
}

impl<SPI: SpiBus<u8>, CS: OutputPin> SpiTransport<SPI, CS> {
    pub fn new(spi: SPI, cs: CS) -> Self {
        Self { spi, cs }
    }

    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }
}

impl<SPI: SpiBus<u8>, CS: OutputPin> Transport for SpiTransport<SPI, CS> {
    type Error = SpiTransportError<SPI::Error, CS::Error>;

    fn select(&mut self) -> Result<(), Self::Error> {
        self.cs.set_low().map_err(SpiTransportError::ChipSelect)
    }

    fn deselect(&mut self) -> Result<(), Self::Error> {
        // all clocked bytes have to be on the wire before the chip sees the rising edge
        self.spi.flush().map_err(SpiTransportError::Spi)?;
        self.cs.set_high().map_err(SpiTransportError::ChipSelect)
    }

    fn transfer(&mut self, byte: u8) -> Result<u8, Self::Error> {
        let mut buf = [byte];
        self.spi
            .transfer_in_place(&mut buf)
            .map_err(SpiTransportError::Spi)?;
        Ok(buf[0])
    }
}
