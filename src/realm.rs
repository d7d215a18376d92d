//! Domain and realm store (C4).
//!
//! Lookups from LBAs to domains, realms and backing-file offsets. Realm
//! subranges ("slots") within a domain are uniformly sized, so the
//! slot-of-LBA computation is straight index math; the slot-to-realm
//! mapping honors the bottom/top CMR restriction recorded in the header.

use crate::meta::layout::DomainRec;
use crate::meta::MetaStore;
use crate::zone::{Flavor, ZoneType};

/// Why an LBA failed to resolve to a realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RealmLookupError {
    #[error("LBA is not inside any zone domain")]
    NoDomain,
    #[error("LBA falls before the first realm subrange of its domain")]
    BeforeFirstRealm,
    #[error("LBA falls between realm subranges of its domain")]
    BetweenRealms,
    #[error("LBA is not the start of a realm subrange")]
    NotRealmStart,
}

impl MetaStore {
    /// Domain containing `lba`, with its index.
    pub fn domain_of_lba(&self, lba: u64) -> Option<(u32, DomainRec)> {
        let hdr = self.header();
        hdr.domains[..hdr.nr_domains as usize]
            .iter()
            .enumerate()
            .find(|(_, d)| d.contains(lba))
            .map(|(i, d)| (i as u32, *d))
    }

    /// The (single) domain of a zone type, with its index.
    pub fn domain_of_type(&self, ztype: ZoneType) -> Option<(u32, DomainRec)> {
        let hdr = self.header();
        hdr.domains[..hdr.nr_domains as usize]
            .iter()
            .enumerate()
            .find(|(_, d)| d.zone_type() == Some(ztype))
            .map(|(i, d)| (i as u32, *d))
    }

    pub fn domain_by_id(&self, id: u32) -> Option<DomainRec> {
        let hdr = self.header();
        (id < hdr.nr_domains).then(|| hdr.domains[id as usize])
    }

    /// Per-realm zone count for a flavor.
    pub fn zones_per_realm(&self, flavor: Flavor) -> u32 {
        let hdr = self.header();
        let smr_zpr = (hdr.realm_size >> hdr.zone_shift) as u32;
        match flavor {
            Flavor::Smr => smr_zpr,
            Flavor::Cmr => {
                if hdr.smr_gain > 100 {
                    (((hdr.realm_size * 100) / hdr.smr_gain as u64) >> hdr.zone_shift).max(1)
                        as u32
                } else {
                    smr_zpr
                }
            }
        }
    }

    /// Map a CMR-domain slot index back to its realm number.
    fn cmr_slot_to_realm(&self, slot: u32) -> u32 {
        let hdr = self.header();
        if hdr.nr_bot_cmr + hdr.nr_top_cmr == 0 || slot < hdr.nr_bot_cmr {
            slot
        } else {
            hdr.nr_realms - hdr.nr_top_cmr + (slot - hdr.nr_bot_cmr)
        }
    }

    /// Realm whose subrange in its domain contains `lba`.
    ///
    /// With `require_start`, `lba` must be the first LBA of that subrange.
    pub fn realm_of_lba(&self, lba: u64, require_start: bool) -> Result<u32, RealmLookupError> {
        let hdr = self.header();
        let (_, domain) = self.domain_of_lba(lba).ok_or(RealmLookupError::NoDomain)?;
        let ztype = domain.zone_type().ok_or(RealmLookupError::NoDomain)?;

        if hdr.dev_type != crate::profile::DeviceType::ZoneDomains.wire() {
            // non-ZD realms partition the LBA space linearly
            let r = (lba / hdr.realm_size) as u32;
            if r >= hdr.nr_realms {
                return Err(RealmLookupError::BetweenRealms);
            }
            return Ok(r);
        }

        let flavor = ztype.flavor().ok_or(RealmLookupError::NoDomain)?;
        let zpr = self.zones_per_realm(flavor);
        let slot_lbas = (zpr as u64) << hdr.zone_shift;
        let offset = lba - domain.start_lba;
        let slot = (offset / slot_lbas) as u32;

        let realm_idx = match flavor {
            Flavor::Smr => slot,
            Flavor::Cmr => self.cmr_slot_to_realm(slot),
        };
        if realm_idx >= hdr.nr_realms {
            return Err(RealmLookupError::BetweenRealms);
        }
        let item = *self.realm(realm_idx).item(ztype);
        if item.length == 0 || lba < item.start_lba {
            return Err(RealmLookupError::BeforeFirstRealm);
        }
        let item_end = item.start_lba + ((item.length as u64) << hdr.zone_shift);
        if lba >= item_end {
            return Err(RealmLookupError::BetweenRealms);
        }
        if require_start && lba != item.start_lba {
            return Err(RealmLookupError::NotRealmStart);
        }
        Ok(realm_idx)
    }

    /// Backing-file byte offset of a data LBA.
    ///
    /// Gaps and inter-domain stretches collapse: every domain's LBA range
    /// maps onto the data region relative to the domain start. The realm
    /// images of one realm therefore share backing bytes, which is exactly
    /// the alternate-view semantic activation relies on.
    pub fn data_offset(&self, lba: u64) -> Option<u64> {
        let hdr = self.header();
        let (_, domain) = self.domain_of_lba(lba)?;
        Some(
            self.region().meta_size as u64
                + (lba - domain.start_lba) * hdr.lba_size as u64,
        )
    }
}
