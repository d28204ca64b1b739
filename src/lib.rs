//! Power-fail-safe EEPROM emulation on paired NOR flash sectors
//!
//! This is a byte-addressable store built on two NOR flash erase sectors,
//! with strong consistency under arbitrary reset: during writes, during
//! sector erase, and during the compaction that reclaims space. The host
//! supplies the flash primitives through the [`Flash`] trait; with the
//! `embedded-storage` feature, any [`embedded-storage`] NOR flash device
//! can back the store directly.
//!
//! [`embedded-storage`]: https://crates.io/crates/embedded-storage

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod eeprom;
pub mod flash;
pub mod record;
pub mod sector;


pub use crate::eeprom::Eeprom;
#[cfg(feature = "embedded-storage")]
pub use crate::flash::NorFlashStore;
pub use crate::flash::{Error, Flash, Result, SectorSpan};
