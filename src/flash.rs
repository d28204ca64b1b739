//! Flash store abstraction
//!
//! The emulation engine drives its two sectors through the [`Flash`] trait:
//! byte-granular reads, verified programming and whole-sector erase. NOR
//! flash can only move bits from `1` to `0` between erases, so a program
//! leaves each byte equal to the bitwise AND of its previous contents and
//! the data written. Implementations are expected to verify every program
//! and erase and report a mismatch, which the engine treats as a marginal
//! write.

/// Flash operation result
pub type Result<T> = core::result::Result<T, Error>;

/// Flash error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Ord, PartialOrd)]
#[non_exhaustive]
pub enum Error {
    /// Flash programming failed
    ///
    /// The device rejected the program operation outright.
    ProgrammingError,
    /// Flash erasing failed
    EraseError,
    /// Flash data verification failed
    ///
    /// A read-back after program did not match the data written (a marginal
    /// write), or a sector scan after erase found bytes other than `0xFF`.
    VerifyError,
    /// No free record slot left in the sector
    SectorFull,
    /// An uncommitted record from an interrupted range write is present
    ///
    /// The sector must be swapped before new records may be appended.
    TornWrite,
}

/// Location and size of one flash erase sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorSpan {
    /// Offset of the first byte of the sector
    pub base: u32,
    /// Sector size in bytes
    pub size: u32,
}

impl SectorSpan {
    /// Describe a sector starting at `base`, `size` bytes long.
    pub const fn new(base: u32, size: u32) -> Self {
        SectorSpan { base, size }
    }

    /// One byte past the end of the sector.
    pub const fn end(&self) -> u32 {
        self.base + self.size
    }
}

/// Capability object for the NOR flash backing the emulation engine.
///
/// The engine owns its store exclusively; nothing else may program or erase
/// the two sectors behind its back. All operations are blocking and run on
/// the caller's execution context.
pub trait Flash {
    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    ///
    /// Reads within the sector spans always succeed.
    fn read(&self, offset: u32, buf: &mut [u8]);

    /// Program `src` starting at `offset`.
    ///
    /// The result of programming a byte is `old & new`. Returns
    /// [`Error::VerifyError`] when a read-back does not match `src`.
    fn program(&mut self, offset: u32, src: &[u8]) -> Result<()>;

    /// Erase the given sector back to `0xFF`.
    ///
    /// Blocking; takes hundreds of milliseconds on real parts and stalls
    /// reads of the same bus for the duration.
    fn erase_sector(&mut self, span: SectorSpan) -> Result<()>;
}

#[cfg(feature = "embedded-storage")]
mod adapter {
    use core::cell::RefCell;

    use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

    use super::{Error, Flash, Result, SectorSpan};

    /// Adapter exposing any [`embedded_storage`] NOR flash as a [`Flash`]
    /// store.
    ///
    /// The storage traits take `&mut self` even for reads; the engine is
    /// single-threaded, so a `RefCell` borrow bridges the two models.
    pub struct NorFlashStore<F> {
        flash: RefCell<F>,
    }

    impl<F> NorFlashStore<F> {
        /// Wrap a NOR flash device.
        pub fn new(flash: F) -> Self {
            NorFlashStore { flash: RefCell::new(flash) }
        }

        /// Releases the wrapped device
        pub fn free(self) -> F {
            self.flash.into_inner()
        }
    }

    impl<F: ReadNorFlash + NorFlash> Flash for NorFlashStore<F> {
        fn read(&self, offset: u32, buf: &mut [u8]) {
            // A failed device read presents as erased flash.
            for byte in buf.iter_mut() {
                *byte = 0xFF;
            }
            let _ = self.flash.borrow_mut().read(offset, buf);
        }

        fn program(&mut self, offset: u32, src: &[u8]) -> Result<()> {
            let mut flash = self.flash.borrow_mut();
            flash
                .write(offset, src)
                .map_err(|_| Error::ProgrammingError)?;

            // Verify written bytes
            let mut check = [0u8; 16];
            for (index, chunk) in src.chunks(16).enumerate() {
                let back = &mut check[..chunk.len()];
                let at = offset + (index * 16) as u32;
                flash.read(at, back).map_err(|_| Error::VerifyError)?;
                if back != chunk {
                    return Err(Error::VerifyError);
                }
            }
            Ok(())
        }

        fn erase_sector(&mut self, span: SectorSpan) -> Result<()> {
            self.flash
                .borrow_mut()
                .erase(span.base, span.end())
                .map_err(|_| Error::EraseError)
        }
    }
}

#[cfg(feature = "embedded-storage")]
pub use adapter::NorFlashStore;
