//! Calibration values of the TLC5955 LED drivers.

use crate::address::FlashAddress;
use crate::device::DataFlash;
use crate::error::Error;
use crate::layout::Layout;
use crate::platform::Transport;
#[cfg(feature = "defmt")]
use defmt::debug;
use strum::IntoEnumIterator;

#[derive(strum::EnumIter, strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlField {
    GlobalBrightness,
    RedMaxCurrent,
    GreenMaxCurrent,
    BlueMaxCurrent,
}

impl ControlField {
    pub fn address(self, layout: &Layout) -> FlashAddress {
        match self {
            ControlField::GlobalBrightness => layout.global_brightness,
            ControlField::RedMaxCurrent => layout.red_max_current,
            ControlField::GreenMaxCurrent => layout.green_max_current,
            ControlField::BlueMaxCurrent => layout.blue_max_current,
        }
    }
}

/// Every value from 0 to 255 is a valid driver setting, so nothing is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlRegisters {
    pub global_brightness: u8,
    pub red_max_current: u8,
    pub green_max_current: u8,
    pub blue_max_current: u8,
}

impl Default for ControlRegisters {
    /// Half scale for every field.
    fn default() -> Self {
        Self {
            global_brightness: 127,
            red_max_current: 127,
            green_max_current: 127,
            blue_max_current: 127,
        }
    }
}

impl ControlRegisters {
    pub fn get(&self, field: ControlField) -> u8 {
        match field {
            ControlField::GlobalBrightness => self.global_brightness,
            ControlField::RedMaxCurrent => self.red_max_current,
            ControlField::GreenMaxCurrent => self.green_max_current,
            ControlField::BlueMaxCurrent => self.blue_max_current,
        }
    }

    pub fn set(&mut self, field: ControlField, value: u8) {
        match field {
            ControlField::GlobalBrightness => self.global_brightness = value,
            ControlField::RedMaxCurrent => self.red_max_current = value,
            ControlField::GreenMaxCurrent => self.green_max_current = value,
            ControlField::BlueMaxCurrent => self.blue_max_current = value,
        }
    }

    pub fn load<T: Transport>(flash: &mut DataFlash<T>, layout: &Layout) -> Result<Self, Error> {
        let mut values = Self::default();
        for field in ControlField::iter() {
            values.set(field, flash.read_byte(field.address(layout))?);
        }

        #[cfg(feature = "defmt")]
        debug!("control registers loaded: {}", values);

        Ok(values)
    }

    /// Writes all fields, rewriting each page that holds a field once.
    pub fn save<T: Transport>(&self, flash: &mut DataFlash<T>, layout: &Layout) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        debug!("control registers save: {}", self);

        for (n, field) in ControlField::iter().enumerate() {
            let page = field.address(layout).page();
            if ControlField::iter()
                .take(n)
                .any(|earlier| earlier.address(layout).page() == page)
            {
                continue;
            }

            flash.rewrite_page(page, |buf| {
                for field in ControlField::iter() {
                    let addr = field.address(layout);
                    if addr.page() == page {
                        buf[addr.byte() as usize] = self.get(field);
                    }
                }
            })?;
        }
        Ok(())
    }
}
