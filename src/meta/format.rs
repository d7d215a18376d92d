//! Formatter (C5): derive the device geometry from a configuration and
//! feature profile, then lay out domains, realms, zones, lists and
//! faulty-zone injections in the metadata region.

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DeviceConfig;
use crate::meta::layout::{
    CondCounts, DomainRec, ListId, ListRec, MetaHeader, RegionLayout, ZbdStats, CFG_STR_MAX,
    DOMAIN_FLAG_SMR, MAX_DOMAINS, META_MAGIC, SERIAL_LEN,
};
use crate::meta::{MetaError, MetaStore};
use crate::profile::FeatureProfile;
use crate::zone::{Flavor, ZoneCond, ZoneType, NO_WP};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("capacity of {capacity} LBAs is too small for one {realm_size}-LBA realm")]
    CapacityTooSmall { capacity: u64, realm_size: u64 },
    #[error("profile needs {need} realms for its reserved CMR slots, device has {have}")]
    TooFewRealms { need: u32, have: u32 },
    #[error("profile defines {0} domains, the layout supports at most {MAX_DOMAINS}")]
    TooManyDomains(usize),
    #[error("conventional zone count {conv} must leave at least one sequential zone of {total}")]
    TooManyConvZones { conv: u32, total: u32 },
}

/// One laid-out zone domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainSpec {
    pub ztype: ZoneType,
    pub start_zone: u32,
    pub nr_zones: u32,
}

impl DomainSpec {
    pub fn start_lba(&self, shift: u32) -> u64 {
        (self.start_zone as u64) << shift
    }

    pub fn end_lba(&self, shift: u32) -> u64 {
        ((self.start_zone + self.nr_zones) as u64) << shift
    }
}

/// Derived device geometry; deterministic for a given `(config, profile,
/// capacity)` triple, which is what lets the validator re-derive it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    pub lba_size: u32,
    pub zone_size: u64,
    pub zone_shift: u32,
    pub realm_size: u64,
    pub nr_realms: u32,
    /// SMR-flavor capacity in LBAs: `nr_realms * realm_size`.
    pub phys_capacity: u64,
    /// CMR-flavor capacity in LBAs.
    pub cmr_capacity: u64,
    /// End of the last domain, in LBAs.
    pub logical_capacity: u64,
    pub smr_gain: u32,
    pub nr_smr_zpr: u32,
    pub nr_cmr_zpr: u32,
    pub nr_zones: u32,
    pub nr_conv_zones: u32,
    pub nr_seq_zones: u32,
    pub nr_gap_zones: u32,
    pub max_open: u32,
    pub optimal_open: u32,
    pub max_activation: u32,
    pub fsnoz: u32,
    pub urswrz: bool,
    pub realms_feature: bool,
    pub domains: Vec<DomainSpec>,
    pub region: RegionLayout,
    pub file_size: u64,
}

impl Geometry {
    pub fn zones_per_realm(&self, flavor: Flavor) -> u32 {
        match flavor {
            Flavor::Cmr => self.nr_cmr_zpr,
            Flavor::Smr => self.nr_smr_zpr,
        }
    }

    /// CMR slot index of realm `r`, honoring bottom/top restriction.
    pub fn cmr_slot(&self, profile: &FeatureProfile, r: u32) -> Option<u32> {
        if !profile.cmr_restricted() {
            return Some(r);
        }
        if r < profile.nr_bot_cmr {
            Some(r)
        } else if r >= self.nr_realms - profile.nr_top_cmr {
            Some(profile.nr_bot_cmr + (r - (self.nr_realms - profile.nr_top_cmr)))
        } else {
            None
        }
    }

    /// The realm slot a zone type occupies for realm `r`, or `None` when
    /// the realm has no subrange of that type.
    pub fn realm_slot(&self, profile: &FeatureProfile, r: u32, ztype: ZoneType) -> Option<u32> {
        match ztype.flavor()? {
            Flavor::Cmr => self.cmr_slot(profile, r),
            Flavor::Smr => Some(r),
        }
    }
}

/// Derive the geometry for `capacity_bytes` of backing space.
pub fn derive_geometry(
    cfg: &DeviceConfig,
    profile: &FeatureProfile,
    capacity_bytes: u64,
) -> Result<Geometry, GeometryError> {
    let lba_size = cfg.lba_size;
    let zone_size = cfg.zone_size;
    let zone_shift = zone_size.trailing_zeros();
    let realm_size = cfg.realm_size;

    let raw_lbas = capacity_bytes / lba_size as u64;
    if raw_lbas < realm_size {
        return Err(GeometryError::CapacityTooSmall {
            capacity: raw_lbas,
            realm_size,
        });
    }
    // round the physical capacity up to a whole number of realms
    let nr_realms = (raw_lbas.div_ceil(realm_size)) as u32;
    let phys_capacity = nr_realms as u64 * realm_size;

    let zd = profile.is_zone_domains();
    let smr_gain = if zd { cfg.smr_gain } else { 100 };
    let nr_smr_zpr = (realm_size >> zone_shift) as u32;
    let nr_cmr_zpr = if smr_gain > 100 {
        (((realm_size * 100) / smr_gain as u64) >> zone_shift).max(1) as u32
    } else {
        nr_smr_zpr
    };
    let cmr_capacity = (nr_realms as u64 * nr_cmr_zpr as u64) << zone_shift;

    if zd && nr_realms < profile.nr_bot_cmr + profile.nr_top_cmr {
        return Err(GeometryError::TooFewRealms {
            need: profile.nr_bot_cmr + profile.nr_top_cmr,
            have: nr_realms,
        });
    }

    let types = profile.domain_types();
    if types.len() > MAX_DOMAINS {
        return Err(GeometryError::TooManyDomains(types.len()));
    }

    let total_zones = (phys_capacity >> zone_shift) as u32;
    let mut domains = Vec::new();
    let mut cursor = 0u32;
    let mut nr_gap_zones = 0u32;

    if zd {
        for t in &types {
            let flavor = t.flavor().unwrap_or(Flavor::Smr);
            let zpr = match flavor {
                Flavor::Cmr => nr_cmr_zpr,
                Flavor::Smr => nr_smr_zpr,
            };
            let slot_realms = if flavor == Flavor::Cmr && profile.cmr_restricted() {
                profile.nr_bot_cmr + profile.nr_top_cmr
            } else {
                nr_realms
            };
            let nr = slot_realms * zpr;
            if nr == 0 {
                continue;
            }
            if !domains.is_empty() && profile.domain_gap > 0 {
                cursor += profile.domain_gap;
                nr_gap_zones += profile.domain_gap;
            }
            domains.push(DomainSpec {
                ztype: *t,
                start_zone: cursor,
                nr_zones: nr,
            });
            cursor += nr;
        }
    } else {
        // non-ZD: a conventional stretch at LBA 0 followed by the
        // sequential zones, both within the physical capacity
        let conv = match profile.cmr_type {
            Some(_) if profile.smr_type.is_some() => {
                let deflt = total_zones * profile.conv_percent / 100;
                let conv = cfg.conv_zones.unwrap_or(deflt.max(profile.conv_percent.min(1)));
                if conv >= total_zones {
                    return Err(GeometryError::TooManyConvZones {
                        conv,
                        total: total_zones,
                    });
                }
                conv
            }
            Some(_) => total_zones,
            None => 0,
        };
        if conv > 0 {
            domains.push(DomainSpec {
                ztype: ZoneType::Conventional,
                start_zone: 0,
                nr_zones: conv,
            });
            cursor = conv;
        }
        if let Some(smr) = profile.smr_type {
            domains.push(DomainSpec {
                ztype: smr,
                start_zone: cursor,
                nr_zones: total_zones - conv,
            });
            cursor = total_zones;
        }
    }

    let nr_zones = cursor;
    let logical_capacity = (nr_zones as u64) << zone_shift;
    let nr_conv_zones = domains
        .iter()
        .filter(|d| d.ztype.flavor() == Some(Flavor::Cmr))
        .map(|d| d.nr_zones)
        .sum();
    let nr_seq_zones = domains
        .iter()
        .filter(|d| d.ztype.flavor() == Some(Flavor::Smr))
        .map(|d| d.nr_zones)
        .sum();

    let region = RegionLayout::new(nr_realms as usize, nr_zones as usize);
    let file_size = region.meta_size as u64 + phys_capacity * lba_size as u64;

    Ok(Geometry {
        lba_size,
        zone_size,
        zone_shift,
        realm_size,
        nr_realms,
        phys_capacity,
        cmr_capacity,
        logical_capacity,
        smr_gain,
        nr_smr_zpr,
        nr_cmr_zpr,
        nr_zones,
        nr_conv_zones,
        nr_seq_zones,
        nr_gap_zones,
        max_open: cfg.max_open,
        optimal_open: cfg.max_open,
        max_activation: cfg.max_activation.unwrap_or(profile.max_act_default),
        fsnoz: nr_smr_zpr,
        urswrz: !cfg.wp_check.unwrap_or(true),
        realms_feature: profile.report_realms && cfg.realms.unwrap_or(true),
        domains,
        region,
        file_size,
    })
}

/// Linear rescale of a zone count from one flavor's per-realm maximum to
/// the other's, clamped to `[1, new_max]`.
pub fn rescale(val: u32, old_max: u32, new_max: u32) -> u32 {
    if old_max <= 1 {
        return new_max;
    }
    let scaled = (new_max as f64 - 1.0) * (val as f64 - old_max as f64) / (old_max as f64 - 1.0)
        + new_max as f64;
    (scaled.round() as i64).clamp(1, new_max as i64) as u32
}

/// The two flavor-conversion tables, indexed `1..=old_max` (index 0 unused).
pub fn build_rescale_tables(nr_cmr_zpr: u32, nr_smr_zpr: u32) -> (Vec<u32>, Vec<u32>) {
    let cmr_to_smr = (0..=nr_cmr_zpr)
        .map(|i| if i == 0 { 0 } else { rescale(i, nr_cmr_zpr, nr_smr_zpr) })
        .collect();
    let smr_to_cmr = (0..=nr_smr_zpr)
        .map(|i| if i == 0 { 0 } else { rescale(i, nr_smr_zpr, nr_cmr_zpr) })
        .collect();
    (cmr_to_smr, smr_to_cmr)
}

/// Lay out the metadata region for a freshly derived geometry.
pub fn format_device(
    store: &mut MetaStore,
    geo: &Geometry,
    cfg: &DeviceConfig,
    profile: &FeatureProfile,
) -> Result<(), MetaError> {
    info!(
        model = profile.model.name(),
        nr_realms = geo.nr_realms,
        nr_zones = geo.nr_zones,
        zone_size = geo.zone_size,
        "formatting metadata region"
    );
    store.wipe_meta();
    write_header(store, geo, cfg, profile);
    fill_realms(store, geo, profile);
    fill_zones(store, geo, profile);
    inject_faulty_zones(store, geo, profile);
    rebuild_counts_and_lists(store);
    store.flush()
}

fn write_header(store: &mut MetaStore, geo: &Geometry, cfg: &DeviceConfig, profile: &FeatureProfile) {
    let serial = Uuid::new_v4().simple().to_string();
    let hdr = store.header_mut();
    hdr.magic = META_MAGIC;
    hdr.struct_size = std::mem::size_of::<MetaHeader>() as u32;
    hdr.backing_size = geo.file_size;
    hdr.dev_type = profile.dev_type.wire();
    hdr.dev_model = profile.model.wire();
    hdr.lba_size = geo.lba_size;
    hdr.nr_domains = geo.domains.len() as u32;
    hdr.phys_capacity = geo.phys_capacity;
    hdr.logical_capacity = geo.logical_capacity;
    hdr.cmr_capacity = geo.cmr_capacity;
    hdr.realm_size = geo.realm_size;
    hdr.nr_realms = geo.nr_realms;
    hdr.smr_gain = geo.smr_gain;
    hdr.zone_size = geo.zone_size;
    hdr.zone_shift = geo.zone_shift;
    hdr.nr_zones = geo.nr_zones;
    hdr.nr_conv_zones = geo.nr_conv_zones;
    hdr.nr_seq_zones = geo.nr_seq_zones;
    hdr.nr_gap_zones = geo.nr_gap_zones;
    hdr.max_open = geo.max_open;
    hdr.optimal_open = geo.optimal_open;
    hdr.max_activation = geo.max_activation;
    hdr.fsnoz = geo.fsnoz;
    hdr.urswrz = geo.urswrz as u8;
    hdr.realms_feature = geo.realms_feature as u8;
    hdr.nr_bot_cmr = profile.nr_bot_cmr;
    hdr.nr_top_cmr = profile.nr_top_cmr;
    hdr.domains = [DomainRec::unused(); MAX_DOMAINS];
    for (i, d) in geo.domains.iter().enumerate() {
        let flags = match d.ztype.flavor() {
            Some(Flavor::Smr) => DOMAIN_FLAG_SMR,
            _ => 0,
        };
        hdr.domains[i] = DomainRec {
            start_lba: d.start_lba(geo.zone_shift),
            end_lba: d.end_lba(geo.zone_shift) - 1,
            nr_zones: d.nr_zones,
            ztype: d.ztype.wire(),
            flags,
            _pad: 0,
        };
    }
    for l in hdr.lists.iter_mut() {
        *l = ListRec::empty();
    }
    hdr.counts = CondCounts::default();
    hdr.stats = ZbdStats::default();
    let sb = serial.as_bytes();
    hdr.serial[..sb.len().min(SERIAL_LEN)].copy_from_slice(&sb[..sb.len().min(SERIAL_LEN)]);
    let cb = cfg.raw.as_bytes();
    let n = cb.len().min(CFG_STR_MAX - 1);
    hdr.config[..n].copy_from_slice(&cb[..n]);
}

fn fill_realms(store: &mut MetaStore, geo: &Geometry, profile: &FeatureProfile) {
    let shift = geo.zone_shift;
    for r in 0..geo.nr_realms {
        let mut can_activate = 0u8;
        let current: Option<ZoneType>;

        if profile.is_zone_domains() {
            // per-type slot items; the domain array defines which types
            // exist, the restriction which realms get a CMR slot
            for d in &geo.domains {
                let Some(flavor) = d.ztype.flavor() else { continue };
                let Some(slot) = geo.realm_slot(profile, r, d.ztype) else {
                    continue;
                };
                let zpr = geo.zones_per_realm(flavor);
                let start_zone = d.start_zone + slot * zpr;
                {
                    let realm = store.realm_mut(r);
                    let item = realm.item_mut(d.ztype);
                    item.start_zone = start_zone;
                    item.start_lba = (start_zone as u64) << shift;
                    item.length = zpr;
                }
                if profile.can_activate(d.ztype) {
                    can_activate |= d.ztype.activation_bit();
                }
            }
            let bot_cmr = profile.cmr_restricted() && r < profile.nr_bot_cmr;
            current = match (profile.cmr_type, profile.smr_type) {
                (Some(cmr), _) if bot_cmr => Some(cmr),
                (_, Some(smr)) => Some(smr),
                (Some(cmr), None) => Some(cmr),
                (None, None) => None,
            };
        } else {
            // non-ZD realms take the type of their first zone
            let realm_start = r as u64 * geo.realm_size;
            current = geo
                .domains
                .iter()
                .find(|d| {
                    realm_start >= d.start_lba(shift) && realm_start < d.end_lba(shift)
                })
                .map(|d| d.ztype);
            // items cover the realm's intersection with each domain
            for d in &geo.domains {
                let start = d.start_lba(shift).max(realm_start);
                let end = d.end_lba(shift).min(realm_start + geo.realm_size);
                if start >= end {
                    continue;
                }
                let realm = store.realm_mut(r);
                let item = realm.item_mut(d.ztype);
                item.start_lba = start;
                item.start_zone = (start >> shift) as u32;
                item.length = ((end - start) >> shift) as u32;
            }
        }

        let realm = store.realm_mut(r);
        realm.current_type = current.map(ZoneType::wire).unwrap_or(0);
        realm.can_activate = can_activate;
        realm.restrictions = 0;
    }
}

fn fill_zones(store: &mut MetaStore, geo: &Geometry, profile: &FeatureProfile) {
    // start from an all-gap array; typed zones overwrite their slots
    for zi in 0..geo.nr_zones {
        let start = (zi as u64) << geo.zone_shift;
        *store.zone_mut(zi) = crate::meta::layout::ZoneRec::gap(start, geo.zone_size);
    }

    for r in 0..geo.nr_realms {
        let realm = *store.realm(r);
        let current = realm.current();
        for d in &geo.domains {
            let item = *realm.item(d.ztype);
            if item.length == 0 {
                continue;
            }
            let active = current == Some(d.ztype);
            let cond = if !profile.is_zone_domains() || active {
                profile.initial_cond(d.ztype)
            } else {
                ZoneCond::Inactive
            };
            for j in 0..item.length {
                let zi = item.start_zone + j;
                let z = store.zone_mut(zi);
                z.ztype = d.ztype.wire();
                z.cond = cond.wire();
                z.wp = match cond {
                    ZoneCond::Empty => z.start,
                    _ => NO_WP,
                };
            }
        }
    }
}

fn inject_faulty_zones(store: &mut MetaStore, geo: &Geometry, profile: &FeatureProfile) {
    if profile.nr_rdonly_zones == 0 && profile.nr_offline_zones == 0 {
        return;
    }
    for d in &geo.domains {
        for (count, offset, cond) in [
            (
                profile.nr_rdonly_zones,
                profile.rdonly_zone_offset,
                ZoneCond::ReadOnly,
            ),
            (
                profile.nr_offline_zones,
                profile.offline_zone_offset,
                ZoneCond::Offline,
            ),
        ] {
            for i in 0..count {
                let zi = d.start_zone + offset + i;
                if zi >= d.start_zone + d.nr_zones {
                    break;
                }
                let z = store.zone_mut(zi);
                z.cond = cond.wire();
                z.wp = NO_WP;
            }
        }
        debug!(
            domain_start = d.start_zone,
            rdonly = profile.nr_rdonly_zones,
            offline = profile.nr_offline_zones,
            "injected faulty zones"
        );
    }
}

/// Recompute condition counters and rebuild the four lists from the zone
/// array. Used by the formatter and after mutation.
pub fn rebuild_counts_and_lists(store: &mut MetaStore) {
    for id in [
        ListId::ImpOpen,
        ListId::ExpOpen,
        ListId::Closed,
        ListId::SeqActive,
    ] {
        store.set_list(id, ListRec::empty());
    }
    let nr_zones = store.nr_zones();
    let mut counts = CondCounts::default();
    for zi in 0..nr_zones {
        let (cond, seq_capable) = {
            let z = store.zone_mut(zi);
            z.clear_links();
            (z.condition(), z.zone_type().has_wp())
        };
        if let Some(slot) = counts.slot(cond) {
            *slot += 1;
        }
        if let Some(list) = MetaStore::list_for_cond(cond, seq_capable) {
            store.list_push_tail(list, zi);
        }
    }
    let hdr = store.header_mut();
    hdr.counts = counts;
    hdr.stats.min_empty = counts.empty as u64;
}
