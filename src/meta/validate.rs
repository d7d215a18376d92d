//! Metadata validator (C6).
//!
//! On open, the geometry is re-derived from the configuration and compared
//! field-by-field against the stored header; then every domain, realm, zone
//! and list is checked against the data-model invariants. Any mismatch
//! makes the caller reformat — there is no in-place repair.

use crate::config::DeviceConfig;
use crate::meta::format::Geometry;
use crate::meta::layout::{ListId, MetaHeader, META_MAGIC, NIL};
use crate::meta::MetaStore;
use crate::profile::FeatureProfile;
use crate::zone::{ZoneCond, ZoneType, NO_WP};

#[derive(Debug, thiserror::Error)]
pub enum ValidateError {
    #[error("bad header magic")]
    BadMagic,
    #[error("header field `{field}` does not match the derived geometry")]
    Header { field: &'static str },
    #[error("saved config string does not match the current one")]
    ConfigMismatch,
    #[error("domain {idx}: {reason}")]
    Domain { idx: u32, reason: &'static str },
    #[error("zone {zi}: {reason}")]
    Zone { zi: u32, reason: &'static str },
    #[error("realm {idx}: {reason}")]
    Realm { idx: u32, reason: &'static str },
    #[error("list {id:?}: {reason}")]
    List { id: ListId, reason: &'static str },
}

fn hdr_field(ok: bool, field: &'static str) -> Result<(), ValidateError> {
    if ok {
        Ok(())
    } else {
        Err(ValidateError::Header { field })
    }
}

/// Validate the whole metadata region against the derived geometry.
pub fn validate_device(
    store: &MetaStore,
    geo: &Geometry,
    cfg: &DeviceConfig,
    profile: &FeatureProfile,
) -> Result<(), ValidateError> {
    let hdr = store.header();
    check_header(hdr, geo, cfg, profile)?;
    check_domains(hdr, geo)?;
    check_zones(store, geo)?;
    check_lists(store)?;
    if profile.is_zone_domains() {
        check_realms(store, geo)?;
    }
    Ok(())
}

fn check_header(
    hdr: &MetaHeader,
    geo: &Geometry,
    cfg: &DeviceConfig,
    profile: &FeatureProfile,
) -> Result<(), ValidateError> {
    if hdr.magic != META_MAGIC {
        return Err(ValidateError::BadMagic);
    }
    hdr_field(
        hdr.struct_size == std::mem::size_of::<MetaHeader>() as u32,
        "struct_size",
    )?;
    hdr_field(hdr.backing_size == geo.file_size, "backing_size")?;
    hdr_field(hdr.dev_type == profile.dev_type.wire(), "dev_type")?;
    hdr_field(hdr.dev_model == profile.model.wire(), "dev_model")?;
    hdr_field(hdr.lba_size == geo.lba_size, "lba_size")?;
    if hdr.config_str() != cfg.raw {
        return Err(ValidateError::ConfigMismatch);
    }
    hdr_field(hdr.zone_size == geo.zone_size, "zone_size")?;
    hdr_field(hdr.zone_shift == geo.zone_shift, "zone_shift")?;
    hdr_field(hdr.realm_size == geo.realm_size, "realm_size")?;
    hdr_field(hdr.nr_realms == geo.nr_realms, "nr_realms")?;
    hdr_field(hdr.phys_capacity == geo.phys_capacity, "phys_capacity")?;
    hdr_field(
        hdr.logical_capacity == geo.logical_capacity,
        "logical_capacity",
    )?;
    hdr_field(hdr.cmr_capacity == geo.cmr_capacity, "cmr_capacity")?;
    hdr_field(hdr.smr_gain == geo.smr_gain, "smr_gain")?;
    hdr_field(hdr.nr_zones == geo.nr_zones, "nr_zones")?;
    hdr_field(hdr.nr_conv_zones == geo.nr_conv_zones, "nr_conv_zones")?;
    hdr_field(hdr.nr_seq_zones == geo.nr_seq_zones, "nr_seq_zones")?;
    hdr_field(hdr.nr_gap_zones == geo.nr_gap_zones, "nr_gap_zones")?;
    hdr_field(hdr.nr_domains == geo.domains.len() as u32, "nr_domains")?;
    hdr_field(hdr.nr_bot_cmr == profile.nr_bot_cmr, "nr_bot_cmr")?;
    hdr_field(hdr.nr_top_cmr == profile.nr_top_cmr, "nr_top_cmr")?;
    hdr_field(
        hdr.nr_realms as u64 * hdr.realm_size == hdr.phys_capacity,
        "phys_capacity vs realms",
    )?;
    hdr_field(
        hdr.nr_conv_zones + hdr.nr_seq_zones + hdr.nr_gap_zones == hdr.nr_zones,
        "zone counts",
    )?;
    Ok(())
}

fn check_domains(hdr: &MetaHeader, geo: &Geometry) -> Result<(), ValidateError> {
    let mut prev_end: Option<u64> = None;
    for (i, spec) in geo.domains.iter().enumerate() {
        let d = &hdr.domains[i];
        let err = |reason| ValidateError::Domain {
            idx: i as u32,
            reason,
        };
        if d.zone_type() != Some(spec.ztype) {
            return Err(err("zone type mismatch"));
        }
        if d.start_lba != spec.start_lba(geo.zone_shift)
            || d.end_lba != spec.end_lba(geo.zone_shift) - 1
        {
            return Err(err("LBA range mismatch"));
        }
        if d.start_lba % geo.zone_size != 0 || (d.end_lba + 1) % geo.zone_size != 0 {
            return Err(err("range not zone-aligned"));
        }
        if d.nr_zones as u64 != (d.end_lba + 1 - d.start_lba) >> geo.zone_shift {
            return Err(err("zone count mismatch"));
        }
        if let Some(end) = prev_end {
            if d.start_lba <= end {
                return Err(err("domains overlap or are unordered"));
            }
        }
        prev_end = Some(d.end_lba);
    }
    Ok(())
}

fn check_zones(store: &MetaStore, geo: &Geometry) -> Result<(), ValidateError> {
    for zi in 0..geo.nr_zones {
        let z = store.zone(zi);
        let err = |reason| ValidateError::Zone { zi, reason };
        if z.start != (zi as u64) << geo.zone_shift {
            return Err(err("start is not zone-aligned at its index"));
        }
        if z.len == 0 || z.len > geo.zone_size {
            return Err(err("length out of range"));
        }
        if zi + 1 < geo.nr_zones && z.start + z.len != store.zone(zi + 1).start {
            return Err(err("zones are not contiguous"));
        }
        let ztype = z.zone_type();
        match z.condition() {
            ZoneCond::NotWp => {
                if ztype.has_wp() {
                    return Err(err("write-pointer zone marked NOT_WP"));
                }
                if z.wp != NO_WP {
                    return Err(err("NOT_WP zone carries a write pointer"));
                }
            }
            ZoneCond::Empty => {
                if z.wp != z.start {
                    return Err(err("empty zone write pointer not at start"));
                }
            }
            ZoneCond::ImpOpen | ZoneCond::ExpOpen | ZoneCond::Closed => {
                if ztype == ZoneType::Conventional || ztype == ZoneType::Gap {
                    return Err(err("open/closed condition on a zone without write pointer"));
                }
                if z.wp < z.start || z.wp >= z.start + z.len {
                    return Err(err("write pointer outside the zone"));
                }
            }
            ZoneCond::Full => match ztype {
                ZoneType::SeqWriteRequired | ZoneType::SeqWritePreferred => {
                    if z.wp != z.start + z.len {
                        return Err(err("full sequential zone write pointer not at end"));
                    }
                }
                ZoneType::SeqOrBeforeRequired => {
                    if z.wp != NO_WP {
                        return Err(err("full SOBR zone carries a write pointer"));
                    }
                }
                _ => return Err(err("full condition on a zone without write pointer")),
            },
            ZoneCond::Inactive | ZoneCond::ReadOnly | ZoneCond::Offline => {
                if z.wp != NO_WP {
                    return Err(err("inactive/read-only/offline zone carries a write pointer"));
                }
            }
        }
    }
    Ok(())
}

fn check_lists(store: &MetaStore) -> Result<(), ValidateError> {
    let nr_zones = store.nr_zones();
    let mut tallies = [0u32; 4];
    for zi in 0..nr_zones {
        let z = store.zone(zi);
        if let Some(id) = MetaStore::list_for_cond(z.condition(), z.zone_type().has_wp()) {
            tallies[id as usize] += 1;
        }
    }

    for id in [
        ListId::ImpOpen,
        ListId::ExpOpen,
        ListId::Closed,
        ListId::SeqActive,
    ] {
        let rec = store.list(id);
        let err = |reason| ValidateError::List { id, reason };
        if rec.size == 0 && (rec.head != NIL || rec.tail != NIL) {
            return Err(err("empty list with linked head or tail"));
        }
        let mut walked = 0u32;
        let mut prev = NIL;
        let mut cur = rec.head;
        while cur != NIL {
            walked += 1;
            if walked > nr_zones {
                return Err(err("cycle detected"));
            }
            if cur >= nr_zones {
                return Err(err("link outside the zone array"));
            }
            let z = store.zone(cur);
            if z.prev != prev {
                return Err(err("prev/next links are not reciprocal"));
            }
            if MetaStore::list_for_cond(z.condition(), z.zone_type().has_wp()) != Some(id) {
                return Err(err("member condition does not match the list"));
            }
            prev = cur;
            cur = z.next;
        }
        if walked != rec.size {
            return Err(err("walked length differs from stored size"));
        }
        if rec.size > 0 && rec.tail != prev {
            return Err(err("tail does not match the last walked zone"));
        }
        if tallies[id as usize] != rec.size {
            return Err(err("zones in this condition are missing from the list"));
        }
    }

    // counters mirror the walk
    let counts = store.header().counts;
    if counts.imp_open != store.list(ListId::ImpOpen).size
        || counts.exp_open != store.list(ListId::ExpOpen).size
        || counts.closed != store.list(ListId::Closed).size
    {
        return Err(ValidateError::List {
            id: ListId::ImpOpen,
            reason: "condition counters disagree with list sizes",
        });
    }
    Ok(())
}

fn check_realms(store: &MetaStore, geo: &Geometry) -> Result<(), ValidateError> {
    for r in 0..geo.nr_realms {
        let realm = store.realm(r);
        let err = |reason| ValidateError::Realm { idx: r, reason };
        let mut live_types = 0u32;
        for d in &geo.domains {
            let item = realm.item(d.ztype);
            if item.length == 0 {
                continue;
            }
            let zpr = d
                .ztype
                .flavor()
                .map(|f| geo.zones_per_realm(f))
                .unwrap_or(0);
            if item.length != zpr {
                return Err(err("item length differs from the per-realm zone count"));
            }
            if item.start_zone < d.start_zone
                || item.start_zone + item.length > d.start_zone + d.nr_zones
            {
                return Err(err("item lies outside its domain"));
            }
            if item.start_lba != (item.start_zone as u64) << geo.zone_shift {
                return Err(err("item LBA does not match its start zone"));
            }
            let mut live = 0u32;
            for j in 0..item.length {
                match store.zone(item.start_zone + j).condition() {
                    ZoneCond::Inactive | ZoneCond::ReadOnly | ZoneCond::Offline => {}
                    _ => live += 1,
                }
            }
            if live > 0 {
                if realm.current() != Some(d.ztype) {
                    return Err(err("live zones outside the realm's current type"));
                }
                live_types += 1;
            }
        }
        if live_types > 1 {
            return Err(err("more than one type subrange is active"));
        }
    }
    Ok(())
}
