//! Zone state machine (C7).
//!
//! Open/close/finish/reset/sequentialize transitions, implicit-open
//! eviction, the open-zone resource rule, and write-pointer advance. Every
//! transition goes through `change_cond`, which keeps the condition
//! counters, the four lists and the statistics watermarks in step.

use tracing::debug;

use crate::meta::layout::ListId;
use crate::meta::MetaStore;
use crate::scsi::{asc, sense_key};
use crate::zone::{zflags, ZoneCond, ZoneType, NO_WP};

/// Failure of a zone-management operation, mapped to sense at the SCSI
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ZoneOpError {
    #[error("LBA out of range")]
    OutOfRange,
    #[error("invalid field in CDB")]
    InvalidField,
    #[error("zone is inactive")]
    Inactive,
    #[error("zone is offline")]
    Offline,
    #[error("zone is read-only")]
    ReadOnly,
    #[error("insufficient zone resources")]
    InsufficientResources,
}

impl ZoneOpError {
    pub fn sense(self) -> (u8, u16) {
        match self {
            Self::OutOfRange => (sense_key::ILLEGAL_REQUEST, asc::LBA_OUT_OF_RANGE),
            Self::InvalidField => (sense_key::ILLEGAL_REQUEST, asc::INVALID_FIELD_IN_CDB),
            Self::Inactive => (sense_key::ILLEGAL_REQUEST, asc::ZONE_IS_INACTIVE),
            Self::Offline => (sense_key::DATA_PROTECT, asc::ZONE_IS_OFFLINE),
            Self::ReadOnly => (sense_key::DATA_PROTECT, asc::ZONE_IS_READ_ONLY),
            Self::InsufficientResources => {
                (sense_key::DATA_PROTECT, asc::INSUFFICIENT_ZONE_RESOURCES)
            }
        }
    }

    fn for_faulty(cond: ZoneCond) -> Option<Self> {
        match cond {
            ZoneCond::Inactive => Some(Self::Inactive),
            ZoneCond::Offline => Some(Self::Offline),
            ZoneCond::ReadOnly => Some(Self::ReadOnly),
            _ => None,
        }
    }
}

/// Zone-management operation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneMgmtOp {
    Close,
    Finish,
    Open,
    Reset,
    Sequentialize,
}

impl MetaStore {
    /// Move a zone to a new condition, maintaining lists, counters and
    /// watermarks. Write-pointer updates belong to the caller.
    pub fn change_cond(&mut self, zi: u32, new: ZoneCond) {
        let (old, seq_capable) = {
            let z = self.zone(zi);
            (z.condition(), z.zone_type().has_wp())
        };
        if old == new {
            return;
        }
        if Self::list_for_cond(old, seq_capable).is_some() {
            self.unlink_by_condition(zi);
        }
        {
            let hdr = self.header_mut();
            if let Some(slot) = hdr.counts.slot(old) {
                *slot -= 1;
            }
            if let Some(slot) = hdr.counts.slot(new) {
                *slot += 1;
            }
        }
        self.zone_mut(zi).cond = new.wire();
        if let Some(id) = Self::list_for_cond(new, seq_capable) {
            self.list_push_tail(id, zi);
        }
        self.note_watermarks();
    }

    fn note_watermarks(&mut self) {
        let hdr = self.header_mut();
        let c = hdr.counts;
        let s = &mut hdr.stats;
        s.max_open = s.max_open.max(c.nr_open() as u64);
        s.max_imp_open = s.max_imp_open.max(c.imp_open as u64);
        s.max_exp_open = s.max_exp_open.max(c.exp_open as u64);
        s.min_empty = s.min_empty.min(c.empty as u64);
    }

    /// Set or clear the non-sequential attribute, tracking the high-water
    /// mark.
    pub fn set_non_seq(&mut self, zi: u32, non_seq: bool) {
        let had = self.zone(zi).flags & zflags::NON_SEQ != 0;
        if had == non_seq {
            return;
        }
        if non_seq {
            self.zone_mut(zi).flags |= zflags::NON_SEQ;
            let s = &mut self.header_mut().stats;
            s.nr_non_seq += 1;
            s.max_non_seq = s.max_non_seq.max(s.nr_non_seq);
        } else {
            self.zone_mut(zi).flags &= !zflags::NON_SEQ;
            self.header_mut().stats.nr_non_seq -= 1;
        }
    }

    /// Pre-check for adding `n` explicitly open zones.
    pub fn check_exp_open_resources(&mut self, n: u32) -> Result<(), ZoneOpError> {
        let hdr = self.header();
        if hdr.counts.exp_open + n > hdr.max_open {
            self.header_mut().stats.failed_exp_opens += 1;
            return Err(ZoneOpError::InsufficientResources);
        }
        Ok(())
    }

    /// Implicitly open a zone for writing, evicting implicitly open zones
    /// from the head of their list when the open budget is exhausted.
    pub fn implicit_open(&mut self, zi: u32) -> Result<(), ZoneOpError> {
        loop {
            let hdr = self.header();
            if hdr.counts.nr_open() < hdr.max_open {
                break;
            }
            match self.list_head(ListId::ImpOpen) {
                Some(victim) => {
                    debug!(zone = victim, "evicting implicitly open zone");
                    self.do_close(victim);
                }
                None => {
                    self.header_mut().stats.write_rule_fails += 1;
                    return Err(ZoneOpError::InsufficientResources);
                }
            }
        }
        self.change_cond(zi, ZoneCond::ImpOpen);
        Ok(())
    }

    fn do_close(&mut self, zi: u32) {
        let (wp, start) = {
            let z = self.zone(zi);
            (z.wp, z.start)
        };
        if wp == start {
            self.change_cond(zi, ZoneCond::Empty);
        } else {
            self.change_cond(zi, ZoneCond::Closed);
        }
    }

    fn do_finish(&mut self, zi: u32) {
        self.change_cond(zi, ZoneCond::Full);
        let z = self.zone_mut(zi);
        z.wp = match z.zone_type() {
            ZoneType::SeqOrBeforeRequired => NO_WP,
            _ => z.start + z.len,
        };
    }

    fn do_reset(&mut self, zi: u32) {
        self.set_non_seq(zi, false);
        self.change_cond(zi, ZoneCond::Empty);
        let z = self.zone_mut(zi);
        z.wp = z.start;
        z.flags &= !zflags::RESET;
        self.header_mut().stats.zones_emptied += 1;
    }

    /// Set the initial write pointer for a zone that just changed state
    /// through activation, and re-link it when it belongs in the seq-active
    /// list. Shared by the activation engine.
    pub fn init_zone_wp(&mut self, zi: u32) {
        let z = self.zone_mut(zi);
        z.wp = match z.condition() {
            ZoneCond::Empty => z.start,
            ZoneCond::Full => match z.zone_type() {
                ZoneType::SeqOrBeforeRequired => NO_WP,
                t if t.is_seq() => z.start + z.len,
                _ => NO_WP,
            },
            _ => NO_WP,
        };
    }

    /// Apply one zone-management operation to one zone.
    ///
    /// Zones already in a compatible state are left untouched ("no change,
    /// GOOD"); inactive and faulty zones fail.
    pub fn apply_zone_op(&mut self, op: ZoneMgmtOp, zi: u32) -> Result<(), ZoneOpError> {
        let (cond, ztype) = {
            let z = self.zone(zi);
            (z.condition(), z.zone_type())
        };
        if let Some(err) = ZoneOpError::for_faulty(cond) {
            return Err(err);
        }
        match op {
            ZoneMgmtOp::Close => match cond {
                ZoneCond::ImpOpen | ZoneCond::ExpOpen => {
                    self.do_close(zi);
                    Ok(())
                }
                ZoneCond::Empty | ZoneCond::Closed | ZoneCond::Full => Ok(()),
                _ => Err(ZoneOpError::InvalidField),
            },
            ZoneMgmtOp::Finish => match cond {
                ZoneCond::Empty | ZoneCond::ImpOpen | ZoneCond::ExpOpen | ZoneCond::Closed => {
                    self.do_finish(zi);
                    Ok(())
                }
                ZoneCond::Full => Ok(()),
                _ => Err(ZoneOpError::InvalidField),
            },
            ZoneMgmtOp::Open => match cond {
                ZoneCond::Empty | ZoneCond::Closed | ZoneCond::ImpOpen => {
                    self.change_cond(zi, ZoneCond::ExpOpen);
                    Ok(())
                }
                ZoneCond::ExpOpen => Ok(()),
                _ => Err(ZoneOpError::InvalidField),
            },
            ZoneMgmtOp::Reset => match cond {
                ZoneCond::ImpOpen
                | ZoneCond::ExpOpen
                | ZoneCond::Closed
                | ZoneCond::Full => {
                    self.do_reset(zi);
                    Ok(())
                }
                ZoneCond::Empty => Ok(()),
                _ => Err(ZoneOpError::InvalidField),
            },
            ZoneMgmtOp::Sequentialize => {
                if ztype != ZoneType::SeqWritePreferred {
                    return Err(ZoneOpError::InvalidField);
                }
                self.set_non_seq(zi, false);
                Ok(())
            }
        }
    }

    /// Zone-management over an explicit `(lba, count)` range.
    ///
    /// Validation happens up front; the per-zone application is not
    /// transactional — zones processed before a failing zone keep their new
    /// state.
    pub fn zone_op_range(
        &mut self,
        op: ZoneMgmtOp,
        lba: u64,
        count: u32,
    ) -> Result<(), ZoneOpError> {
        let hdr = self.header();
        let shift = hdr.zone_shift;
        let logical = hdr.logical_capacity;
        if lba >= logical {
            return Err(ZoneOpError::OutOfRange);
        }
        let zi0 = (lba >> shift) as u32;
        if self.zone(zi0).start != lba {
            return Err(ZoneOpError::InvalidField);
        }
        let count = count.max(1);
        let zi_last = zi0 + count - 1;
        if zi_last >= self.nr_zones() {
            return Err(ZoneOpError::OutOfRange);
        }

        // the range must stay inside one zone domain
        let domain = self
            .header()
            .domains
            .iter()
            .find(|d| d.contains(lba))
            .copied()
            .ok_or(ZoneOpError::InvalidField)?;
        let last_lba = (zi_last as u64) << shift;
        if !domain.contains(last_lba) {
            return Err(ZoneOpError::InvalidField);
        }

        // no gap or conventional zones anywhere in the range
        for zi in zi0..=zi_last {
            match self.zone(zi).zone_type() {
                ZoneType::Gap | ZoneType::Conventional => return Err(ZoneOpError::InvalidField),
                _ => {}
            }
        }
        if count == 1 {
            if let Some(err) = ZoneOpError::for_faulty(self.zone(zi0).condition()) {
                return Err(err);
            }
        }

        if op == ZoneMgmtOp::Open {
            let mut adds = 0;
            for zi in zi0..=zi_last {
                if matches!(
                    self.zone(zi).condition(),
                    ZoneCond::Empty | ZoneCond::Closed | ZoneCond::ImpOpen
                ) {
                    adds += 1;
                }
            }
            self.check_exp_open_resources(adds)?;
        }

        for zi in zi0..=zi_last {
            self.apply_zone_op(op, zi)?;
        }
        Ok(())
    }

    /// Zone-management with the ALL bit: iterate the affected lists.
    pub fn zone_op_all(&mut self, op: ZoneMgmtOp) -> Result<(), ZoneOpError> {
        match op {
            ZoneMgmtOp::Close => {
                for zi in self.open_zones() {
                    self.do_close(zi);
                }
                Ok(())
            }
            ZoneMgmtOp::Finish => {
                let mut zones = self.open_zones();
                zones.extend(self.list_collect(ListId::Closed));
                for zi in zones {
                    self.do_finish(zi);
                }
                Ok(())
            }
            ZoneMgmtOp::Open => {
                // atomic resource pre-check: every closed or implicitly
                // open zone becomes explicitly open, or none does
                let c = self.header().counts;
                self.check_exp_open_resources(c.closed + c.imp_open)?;
                let mut zones = self.list_collect(ListId::ImpOpen);
                zones.extend(self.list_collect(ListId::Closed));
                for zi in zones {
                    self.change_cond(zi, ZoneCond::ExpOpen);
                }
                Ok(())
            }
            ZoneMgmtOp::Reset => {
                let mut zones = self.open_zones();
                zones.extend(self.list_collect(ListId::Closed));
                zones.extend(
                    self.list_collect(ListId::SeqActive)
                        .into_iter()
                        .filter(|&zi| self.zone(zi).condition() == ZoneCond::Full),
                );
                for zi in zones {
                    self.do_reset(zi);
                }
                Ok(())
            }
            ZoneMgmtOp::Sequentialize => Err(ZoneOpError::InvalidField),
        }
    }

    fn open_zones(&self) -> Vec<u32> {
        let mut v = self.list_collect(ListId::ImpOpen);
        v.extend(self.list_collect(ListId::ExpOpen));
        v
    }

    /// Advance the write pointer after a successful write of `count` LBAs
    /// at `lba`, handling the transition to full.
    pub fn advance_wp(&mut self, zi: u32, lba: u64, count: u64) {
        let (ztype, start, len, wp) = {
            let z = self.zone(zi);
            (z.zone_type(), z.start, z.len, z.wp)
        };
        let new_wp = match ztype {
            ZoneType::SeqWriteRequired => wp + count,
            ZoneType::SeqWritePreferred | ZoneType::SeqOrBeforeRequired => {
                if wp == NO_WP {
                    lba + count
                } else {
                    wp.max(lba + count)
                }
            }
            _ => return,
        };
        self.zone_mut(zi).wp = new_wp;
        if new_wp >= start + len {
            self.do_finish(zi);
        }
    }
}

#[cfg(test)]
mod ops_tests;
