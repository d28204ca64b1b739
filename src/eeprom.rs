//! EEPROM emulation engine
//!
//! [`Eeprom`] exposes a small random-access byte store on top of two NOR
//! flash erase sectors. Writes append records to the active sector; when it
//! fills up, or a write is found torn or marginal, the newest value of
//! every byte is copied to the alternate sector and the sectors swap roles.
//! Every step of that protocol is a bit-clearing program, so the live state
//! can be reconstructed from the media after a reset at any point.
//!
//! Multi-byte writes are atomic across resets: changed bytes are first
//! appended as uncommitted records, then committed newest-first by flipping
//! one status byte each. A reset mid-commit leaves the oldest record
//! uncommitted, which hides the whole group until the next sector swap.

use crate::flash::{Error, Flash, Result, SectorSpan};
use crate::record::{Record, RecordStatus, Records, SortedRecords, TrailingInvalid, ValidRecords, RECORD_SIZE};
use crate::sector::{
    program_status, read_status, resolve_active, Resolution, SectorId, SectorStatus, HEADER_SIZE,
};

/// Value a byte reads as before it is ever written.
const ERASED_BYTE: u8 = 0xFF;

/// Byte-addressable EEPROM emulation on a pair of NOR flash sectors.
///
/// The two sectors may have different sizes; capacity is limited by the
/// smaller one so that a full sector always fits its partner during a swap.
/// All authoritative state lives on the media. Callers run [`init`]
/// (idempotent) once after reset, before any other operation.
///
/// [`init`]: Eeprom::init
pub struct Eeprom<F: Flash> {
    pub(crate) flash: F,
    spans: [SectorSpan; 2],
    active: Option<SectorId>,
}

impl<F: Flash> Eeprom<F> {
    /// Create an emulator over `flash`, storing data in the two given
    /// sectors. No flash traffic happens until [`init`](Eeprom::init).
    pub fn new(flash: F, sector1: SectorSpan, sector2: SectorSpan) -> Self {
        Eeprom { flash, spans: [sector1, sector2], active: None }
    }

    /// Releases the flash store
    pub fn free(self) -> F {
        self.flash
    }

    /// Number of distinct logical byte offsets this store can hold.
    pub fn capacity(&self) -> usize {
        let smallest = if self.spans[0].size < self.spans[1].size {
            self.spans[0].size
        } else {
            self.spans[1].size
        };
        ((smallest - HEADER_SIZE) / RECORD_SIZE) as usize
    }

    /// Resolve the active sector from the on-media status words.
    ///
    /// Finishes an interrupted sector swap when one is found, and falls back
    /// to [`clear`](Eeprom::clear) when neither sector is live. Calling this
    /// again on a healthy store performs no writes.
    pub fn init(&mut self) {
        let status1 = read_status(&self.flash, self.spans[0]);
        let status2 = read_status(&self.flash, self.spans[1]);
        match resolve_active(status1, status2) {
            Resolution::Resolved { active } => {
                log::debug!("sector {:?} active", active);
                self.active = Some(active);
            }
            Resolution::Promote { active } => {
                log::debug!("promoting copied sector {:?}", active);
                let span = self.span(active);
                let promoted = program_status(&mut self.flash, span, SectorStatus::Active).is_ok()
                    && read_status(&self.flash, span) == SectorStatus::Active.bits();
                if promoted {
                    self.active = Some(active);
                } else {
                    log::warn!("promotion failed, reinitialising");
                    self.clear();
                }
            }
            Resolution::None => {
                log::debug!("no live sector, reinitialising");
                self.clear();
            }
        }
    }

    /// Drop every stored value.
    ///
    /// Both sectors are erased and the first is marked active.
    pub fn clear(&mut self) {
        let _ = self.flash.erase_sector(self.spans[0]);
        let _ = self.flash.erase_sector(self.spans[1]);
        let _ = program_status(&mut self.flash, self.spans[0], SectorStatus::Active);
        self.active = if read_status(&self.flash, self.spans[0]) == SectorStatus::Active.bits() {
            Some(SectorId::One)
        } else {
            None
        };
    }

    /// Read the byte at `id`.
    ///
    /// Returns `0xFF` when `id` was never written.
    pub fn get_byte(&self, id: u16) -> u8 {
        let mut data = [ERASED_BYTE];
        self.get(id, &mut data);
        data[0]
    }

    /// Read `data.len()` bytes starting at `id`.
    ///
    /// Bytes that were never written read as `0xFF`. Iteration is in append
    /// order, so the newest record for each offset wins.
    pub fn get(&self, id: u16, data: &mut [u8]) {
        for byte in data.iter_mut() {
            *byte = ERASED_BYTE;
        }
        let active = match self.active {
            Some(active) => active,
            None => return,
        };
        let span = self.span(active);
        for (_, record) in ValidRecords::new(&self.flash, span.base, self.capacity()) {
            if record.id >= id {
                let index = (record.id - id) as usize;
                if index < data.len() {
                    data[index] = record.data;
                }
            }
        }
    }

    /// Write the byte at `id`.
    pub fn put_byte(&mut self, id: u16, value: u8) {
        self.put(id, &[value]);
    }

    /// Write `data.len()` bytes starting at `id`.
    ///
    /// The group is atomic across resets: after a reboot either every byte
    /// of the range reads the new value or every byte reads its previous
    /// value. Writes that do not fit below [`capacity`](Eeprom::capacity)
    /// are dropped.
    pub fn put(&mut self, id: u16, data: &[u8]) {
        if id as usize + data.len() >= self.capacity() {
            return;
        }
        let active = match self.active {
            Some(active) => active,
            None => return,
        };
        if let Err(err) = self.write_range(active, id, data) {
            log::warn!("range write failed ({:?}), swapping sectors", err);
            if let Err(err) = self.swap_sectors(active, id, data) {
                log::warn!("sector swap failed ({:?}), write dropped", err);
            }
        }
    }

    /// True when the alternate sector still holds stale state and needs an
    /// erase before it can take a swap.
    ///
    /// The erase is slow; callers may run it during idle time through
    /// [`perform_pending_erase`](Eeprom::perform_pending_erase). Left alone,
    /// it happens lazily on the next swap.
    pub fn has_pending_erase(&self) -> bool {
        match self.active {
            Some(active) => {
                let span = self.span(active.other());
                read_status(&self.flash, span) != SectorStatus::Erased.bits()
            }
            None => false,
        }
    }

    /// Erase the alternate sector if it needs it.
    pub fn perform_pending_erase(&mut self) {
        if self.has_pending_erase() {
            let active = match self.active {
                Some(active) => active,
                None => return,
            };
            log::debug!("erasing retired sector {:?}", active.other());
            let _ = self.flash.erase_sector(self.span(active.other()));
        }
    }

    fn span(&self, id: SectorId) -> SectorSpan {
        self.spans[id.index()]
    }

    /// Two-phase append of a range to the active sector.
    fn write_range(&mut self, active: SectorId, id: u16, data: &[u8]) -> Result<()> {
        let span = self.span(active);
        let slots = self.capacity();

        // A torn range write already sits in the log; only a swap cleans it
        // out, and appending past it would bury it deeper.
        let torn = Records::new(&self.flash, span.base, slots)
            .any(|(_, record)| record.status == RecordStatus::Invalid);
        if torn {
            return Err(Error::TornWrite);
        }

        // Phase A: stage every changed byte as an uncommitted record.
        let mut staged = false;
        for (index, &value) in data.iter().enumerate() {
            let offset = id + index as u16;
            if self.get_byte(offset) == value {
                continue;
            }
            self.append(span, slots, offset, value)?;
            staged = true;
        }
        if !staged {
            return Ok(());
        }

        // Phase B: commit newest first. The oldest record turns VALID last,
        // so a reset mid-commit leaves it INVALID and keeps the whole range
        // hidden.
        let mut cursor = TrailingInvalid::locate(&self.flash, span.base, slots);
        while let Some(offset) = cursor.next(&self.flash) {
            self.flash
                .program(offset + 2, &[RecordStatus::Valid.bits()])?;
        }
        Ok(())
    }

    fn append(&mut self, span: SectorSpan, slots: usize, id: u16, value: u8) -> Result<()> {
        let slot = {
            let mut records = Records::new(&self.flash, span.base, slots);
            while records.next().is_some() {}
            records.free_slot().ok_or(Error::SectorFull)?
        };
        log::trace!("staging id {} = {:#04x} at {:#x}", id, value, slot);
        self.flash
            .program(slot, &Record::to_bytes(id, RecordStatus::Invalid, value))
    }

    /// Move the newest value of every byte to the alternate sector, apply
    /// the pending range on top, and swap roles.
    fn swap_sectors(&mut self, active: SectorId, id: u16, data: &[u8]) -> Result<()> {
        let source = self.span(active);
        let destination = self.span(active.other());
        let slots = self.capacity();

        // The second attempt re-erases first: marginally erased cells scan
        // as 0xFF but may refuse to program.
        let mut attempt = 0;
        loop {
            match self.copy_sector(source, destination, slots, id, data, attempt > 0) {
                Ok(()) => {
                    log::debug!("sector {:?} now active", active.other());
                    self.active = Some(active.other());
                    return Ok(());
                }
                Err(err) if attempt == 0 => {
                    log::warn!("sector copy failed ({:?}), retrying", err);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn copy_sector(
        &mut self,
        source: SectorSpan,
        destination: SectorSpan,
        slots: usize,
        id: u16,
        data: &[u8],
        force_erase: bool,
    ) -> Result<()> {
        if force_erase || !self.is_erased(destination) {
            log::debug!("erasing sector at {:#x}", destination.base);
            self.flash.erase_sector(destination)?;
        }
        program_status(&mut self.flash, destination, SectorStatus::Copy)?;

        // Copy surviving values, lowest id first, skipping the pending range
        // and bytes back at their erased default. Records are appended
        // directly as VALID; the COPY status keeps the whole sector
        // unpublished until promotion.
        let end = id as usize + data.len();
        let mut sweep = SortedRecords::new(source.base, slots);
        let mut slot = destination.base + HEADER_SIZE;
        while let Some(record) = sweep.next(&self.flash) {
            let pending = record.id >= id && (record.id as usize) < end;
            if pending || record.data == ERASED_BYTE {
                continue;
            }
            self.flash.program(
                slot,
                &Record::to_bytes(record.id, RecordStatus::Valid, record.data),
            )?;
            slot += RECORD_SIZE;
        }
        for (index, &value) in data.iter().enumerate() {
            if value == ERASED_BYTE {
                continue;
            }
            self.flash.program(
                slot,
                &Record::to_bytes(id + index as u16, RecordStatus::Valid, value),
            )?;
            slot += RECORD_SIZE;
        }

        program_status(&mut self.flash, destination, SectorStatus::Active)?;
        program_status(&mut self.flash, source, SectorStatus::Inactive)?;
        Ok(())
    }

    /// Scan a sector and confirm every byte reads erased.
    fn is_erased(&self, span: SectorSpan) -> bool {
        let mut buf = [0u8; 32];
        let mut offset = span.base;
        while offset < span.end() {
            let len = buf.len().min((span.end() - offset) as usize);
            let chunk = &mut buf[..len];
            self.flash.read(offset, chunk);
            if chunk.iter().any(|&byte| byte != ERASED_BYTE) {
                return false;
            }
            offset += len as u32;
        }
        true
    }
}
