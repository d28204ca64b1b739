//! Sector lifecycle
//!
//! Each sector carries a 16-bit status word at its base. The bit patterns
//! are chosen so that every lifecycle transition only clears bits, which
//! makes each step a single program with no intervening erase:
//!
//! `ERASED (0xFFFF) → COPY (0x0FFF) → ACTIVE (0x00FF) → INACTIVE (0x000F)`
//!
//! After a reset the live sector is reconstructed from the two status words
//! alone; see [`resolve_active`].

use crate::flash::{Flash, Result, SectorSpan};

/// Byte offset of the first record slot within a sector.
pub(crate) const HEADER_SIZE: u32 = 2;

/// Sector lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorStatus {
    /// Sector is blank
    Erased,
    /// Compaction destination, mid-copy
    Copy,
    /// Sole live sector
    Active,
    /// Old live sector awaiting erase
    Inactive,
}

impl SectorStatus {
    /// On-media bit pattern of this state.
    pub const fn bits(self) -> u16 {
        match self {
            SectorStatus::Erased => 0xFFFF,
            SectorStatus::Copy => 0x0FFF,
            SectorStatus::Active => 0x00FF,
            SectorStatus::Inactive => 0x000F,
        }
    }
}

/// Logical identity of one of the two sectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorId {
    /// First sector
    One,
    /// Second sector
    Two,
}

impl SectorId {
    /// The sector that is not this one.
    pub fn other(self) -> SectorId {
        match self {
            SectorId::One => SectorId::Two,
            SectorId::Two => SectorId::One,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            SectorId::One => 0,
            SectorId::Two => 1,
        }
    }
}

/// Outcome of mapping the two on-media status words to a live sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// `active` is live; the other sector is the alternate.
    Resolved { active: SectorId },
    /// `active` holds a completed copy that was never marked live. The
    /// source is already `INACTIVE`, so programming `ACTIVE` over the `COPY`
    /// marker finishes the interrupted swap.
    Promote { active: SectorId },
    /// No consistent pair; the media must be cleared.
    None,
}

/// Deterministic mapping from the pair of sector status words to the live
/// sector.
///
/// An `ACTIVE` word wins outright; when both read `ACTIVE` (a reset between
/// promoting the copy and demoting the source) the first sector is picked.
/// A `COPY` paired with an `INACTIVE` marks a swap that completed its copy
/// but lost power before promotion.
pub(crate) fn resolve_active(status1: u16, status2: u16) -> Resolution {
    let active = SectorStatus::Active.bits();
    match (status1 == active, status2 == active) {
        (true, _) => Resolution::Resolved { active: SectorId::One },
        (false, true) => Resolution::Resolved { active: SectorId::Two },
        (false, false) => {
            let copy = SectorStatus::Copy.bits();
            let inactive = SectorStatus::Inactive.bits();
            if status1 == copy && status2 == inactive {
                Resolution::Promote { active: SectorId::One }
            } else if status1 == inactive && status2 == copy {
                Resolution::Promote { active: SectorId::Two }
            } else {
                Resolution::None
            }
        }
    }
}

/// Read a sector's status word.
pub(crate) fn read_status<F: Flash>(flash: &F, span: SectorSpan) -> u16 {
    let mut raw = [0u8; 2];
    flash.read(span.base, &mut raw);
    u16::from_le_bytes(raw)
}

/// Program a sector's status word.
pub(crate) fn program_status<F: Flash>(
    flash: &mut F,
    span: SectorSpan,
    status: SectorStatus,
) -> Result<()> {
    flash.program(span.base, &status.bits().to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ERASED: u16 = 0xFFFF;
    const COPY: u16 = 0x0FFF;
    const ACTIVE: u16 = 0x00FF;
    const INACTIVE: u16 = 0x000F;

    #[test]
    fn transitions_only_clear_bits() {
        assert_eq!(ERASED & COPY, COPY);
        assert_eq!(COPY & ACTIVE, ACTIVE);
        assert_eq!(ACTIVE & INACTIVE, INACTIVE);
    }

    #[test]
    fn active_sector_wins() {
        for other in [ERASED, COPY, INACTIVE, 0x1234] {
            assert_eq!(
                resolve_active(ACTIVE, other),
                Resolution::Resolved { active: SectorId::One }
            );
            assert_eq!(
                resolve_active(other, ACTIVE),
                Resolution::Resolved { active: SectorId::Two }
            );
        }
    }

    #[test]
    fn both_active_picks_first_sector() {
        assert_eq!(
            resolve_active(ACTIVE, ACTIVE),
            Resolution::Resolved { active: SectorId::One }
        );
    }

    #[test]
    fn completed_copy_is_promoted() {
        assert_eq!(
            resolve_active(COPY, INACTIVE),
            Resolution::Promote { active: SectorId::One }
        );
        assert_eq!(
            resolve_active(INACTIVE, COPY),
            Resolution::Promote { active: SectorId::Two }
        );
    }

    #[test]
    fn inconsistent_pairs_resolve_to_none() {
        for pair in [
            (ERASED, ERASED),
            (COPY, COPY),
            (INACTIVE, INACTIVE),
            (COPY, ERASED),
            (ERASED, INACTIVE),
            (0xDEAD, 0xBEEF),
        ] {
            assert_eq!(resolve_active(pair.0, pair.1), Resolution::None);
        }
    }
}
