//! The emulated device: backing store, profile, geometry and lifecycle.
//!
//! `ZdDevice::open` is the host-runtime entry point: it opens or creates
//! the backing file, validates its metadata against the configuration, and
//! reformats from scratch on any mismatch. Commands then run against the
//! in-memory view (`handlers` module), which is the same memory as the
//! persistent file.

use std::fs::File;
use std::io::Read;

use tracing::{info, warn};

use crate::config::DeviceConfig;
use crate::meta::format::{
    build_rescale_tables, derive_geometry, format_device, Geometry,
};
use crate::meta::layout::{MetaHeader, META_MAGIC};
use crate::meta::validate::validate_device;
use crate::meta::MetaStore;
use crate::profile::{profile_for, DeviceModel, DeviceType, FeatureProfile};
use crate::scsi::SenseQueue;
use crate::zone::Flavor;
use crate::ZdError;

pub struct ZdDevice {
    pub(crate) store: MetaStore,
    pub(crate) cfg: DeviceConfig,
    pub(crate) profile: &'static FeatureProfile,
    pub(crate) geometry: Geometry,
    pub(crate) capacity_bytes: u64,
    /// Flavor-conversion tables computed at format/open time, indexed
    /// `1..=zones_per_realm` of the source flavor.
    pub(crate) cmr_to_smr: Vec<u32>,
    pub(crate) smr_to_cmr: Vec<u32>,
    pub(crate) sense_queue: SenseQueue,
    /// Whether this open had to (re)format the metadata region.
    pub reformatted: bool,
}

impl ZdDevice {
    /// Open the device, formatting the backing file when it is new or its
    /// metadata fails validation.
    pub fn open(cfg: DeviceConfig, capacity_bytes: u64) -> Result<Self, ZdError> {
        Self::open_inner(cfg, capacity_bytes, true)
    }

    /// Open without permission to reformat: any metadata problem is an
    /// error. Used by inspection paths that must not destroy state.
    pub fn open_readonly_strict(cfg: DeviceConfig, capacity_bytes: u64) -> Result<Self, ZdError> {
        Self::open_inner(cfg, capacity_bytes, false)
    }

    /// Open an existing backing file, taking the capacity from its header.
    pub fn open_existing(cfg: DeviceConfig) -> Result<Self, ZdError> {
        let capacity = Self::read_capacity_hint(&cfg)?;
        Self::open_inner(cfg, capacity, false)
    }

    fn open_inner(
        cfg: DeviceConfig,
        capacity_bytes: u64,
        allow_reformat: bool,
    ) -> Result<Self, ZdError> {
        let profile = profile_for(cfg.model);
        let geometry = derive_geometry(&cfg, profile, capacity_bytes)?;
        let (mut store, size_matches) =
            MetaStore::open_or_create(&cfg.path, geometry.region, geometry.file_size)?;

        let mut reformatted = false;
        if size_matches {
            if let Err(err) = validate_device(&store, &geometry, &cfg, profile) {
                if !allow_reformat {
                    return Err(ZdError::Validate(err));
                }
                warn!(%err, "metadata validation failed, reformatting");
                format_device(&mut store, &geometry, &cfg, profile)?;
                reformatted = true;
            }
        } else {
            if !allow_reformat {
                return Err(ZdError::NotFormatted);
            }
            format_device(&mut store, &geometry, &cfg, profile)?;
            reformatted = true;
        }

        let (cmr_to_smr, smr_to_cmr) =
            build_rescale_tables(geometry.nr_cmr_zpr, geometry.nr_smr_zpr);
        info!(
            model = profile.model.name(),
            reformatted,
            capacity_lbas = geometry.phys_capacity,
            "device ready"
        );
        Ok(Self {
            store,
            cfg,
            profile,
            geometry,
            capacity_bytes,
            cmr_to_smr,
            smr_to_cmr,
            sense_queue: SenseQueue::default(),
            reformatted,
        })
    }

    /// Read the physical capacity recorded in an existing header so the
    /// device can be reopened without the host-provided size.
    fn read_capacity_hint(cfg: &DeviceConfig) -> Result<u64, ZdError> {
        let mut file = File::open(&cfg.path)?;
        let mut page = vec![0u8; std::mem::size_of::<MetaHeader>()];
        file.read_exact(&mut page)?;
        // Safety: the buffer is heap-allocated (8-aligned for this size)
        // and exactly one header long; the record is plain data.
        let hdr: MetaHeader = unsafe { std::ptr::read_unaligned(page.as_ptr() as *const MetaHeader) };
        if hdr.magic != META_MAGIC {
            return Err(ZdError::NotFormatted);
        }
        Ok(hdr.phys_capacity * hdr.lba_size as u64)
    }

    pub fn store(&self) -> &MetaStore {
        &self.store
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.cfg
    }

    pub fn profile(&self) -> &'static FeatureProfile {
        self.profile
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn is_zone_domains(&self) -> bool {
        self.profile.is_zone_domains()
    }

    pub fn dev_type(&self) -> DeviceType {
        self.profile.dev_type
    }

    /// Re-initialize the metadata region with the current personality
    /// (FORMAT UNIT, SANITIZE).
    pub fn reformat(&mut self) -> Result<(), ZdError> {
        format_device(&mut self.store, &self.geometry, &self.cfg, self.profile)?;
        self.reformatted = true;
        Ok(())
    }

    /// Mutate to a different personality: re-derive the geometry for the
    /// same backing capacity, re-map, and reformat the metadata region.
    /// The data region keeps whatever bytes it had; only the metadata is
    /// re-initialized.
    pub fn mutate(&mut self, model: DeviceModel) -> Result<(), ZdError> {
        let profile = profile_for(model);
        let cfg = self.cfg.with_model(model);
        let geometry = derive_geometry(&cfg, profile, self.capacity_bytes)?;
        info!(
            from = self.profile.model.name(),
            to = profile.model.name(),
            "mutating device personality"
        );
        // map the new region before dropping the old one; the file is
        // resized as part of the open
        let (mut store, _) =
            MetaStore::open_or_create(&cfg.path, geometry.region, geometry.file_size)?;
        format_device(&mut store, &geometry, &cfg, profile)?;
        self.store = store;
        let (cmr_to_smr, smr_to_cmr) =
            build_rescale_tables(geometry.nr_cmr_zpr, geometry.nr_smr_zpr);
        self.cmr_to_smr = cmr_to_smr;
        self.smr_to_cmr = smr_to_cmr;
        self.cfg = cfg;
        self.profile = profile;
        self.geometry = geometry;
        Ok(())
    }

    /// Convert a zone count between flavors using the rescale tables:
    /// whole realms convert exactly, the remainder interpolates.
    pub fn convert_zone_count(&self, count: u32, from: Flavor, to: Flavor) -> u32 {
        if from == to || count == 0 {
            return count;
        }
        let (from_zpr, to_zpr, table) = match from {
            Flavor::Smr => (self.geometry.nr_smr_zpr, self.geometry.nr_cmr_zpr, &self.smr_to_cmr),
            Flavor::Cmr => (self.geometry.nr_cmr_zpr, self.geometry.nr_smr_zpr, &self.cmr_to_smr),
        };
        let realms = count / from_zpr;
        let rem = count % from_zpr;
        realms * to_zpr + if rem > 0 { table[rem as usize] } else { 0 }
    }

    /// Queue a deferred sense triplet for a later REQUEST SENSE.
    pub fn defer_sense(&mut self, key: u8, asc_ascq: u16) {
        self.sense_queue.push(crate::scsi::SenseData::new(key, asc_ascq));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::ZoneCond;
    use tempfile::TempDir;

    fn cfg(dir: &TempDir, opts: &str) -> DeviceConfig {
        DeviceConfig::parse(&format!(
            "dhsmr/{opts}zsize-64K/rsize-256K/sgain-1.25/open-8@{}",
            dir.path().join("dev.img").display()
        ))
        .unwrap()
    }

    const CAP: u64 = 16 * 256 * 1024;

    #[test]
    fn open_formats_once() {
        let dir = TempDir::new().unwrap();
        let dev = ZdDevice::open(cfg(&dir, "type-ZONE_DOM/"), CAP).unwrap();
        assert!(dev.reformatted);
        drop(dev);

        // second open finds valid metadata and keeps it
        let dev = ZdDevice::open(cfg(&dir, "type-ZONE_DOM/"), CAP).unwrap();
        assert!(!dev.reformatted);
    }

    #[test]
    fn config_change_reformats() {
        let dir = TempDir::new().unwrap();
        drop(ZdDevice::open(cfg(&dir, "type-ZONE_DOM/"), CAP).unwrap());
        let dev = ZdDevice::open(cfg(&dir, "type-ZONE_DOM/wpcheck-n/"), CAP).unwrap();
        assert!(dev.reformatted);
    }

    #[test]
    fn strict_open_refuses_corrupt_metadata() {
        let dir = TempDir::new().unwrap();
        {
            let mut dev = ZdDevice::open(cfg(&dir, "type-ZONE_DOM/"), CAP).unwrap();
            dev.store.header_mut().nr_zones += 1;
            dev.store.flush().unwrap();
        }
        assert!(ZdDevice::open_readonly_strict(cfg(&dir, "type-ZONE_DOM/"), CAP).is_err());
    }

    #[test]
    fn open_existing_reads_capacity_from_header() {
        let dir = TempDir::new().unwrap();
        drop(ZdDevice::open(cfg(&dir, "type-ZONE_DOM/"), CAP).unwrap());
        let dev = ZdDevice::open_existing(cfg(&dir, "type-ZONE_DOM/")).unwrap();
        assert!(!dev.reformatted);
        assert_eq!(dev.geometry().nr_realms, 16);
    }

    #[test]
    fn mutate_roundtrip_restores_layout() {
        let dir = TempDir::new().unwrap();
        let mut dev = ZdDevice::open(cfg(&dir, "type-ZONE_DOM/"), CAP).unwrap();
        let zones_before = dev.geometry().nr_zones;

        dev.mutate(DeviceModel::Generic).unwrap();
        assert_eq!(dev.dev_type(), DeviceType::NonZoned);
        assert_eq!(dev.geometry().domains.len(), 1);
        assert_eq!(
            dev.store().zone(0).condition(),
            ZoneCond::NotWp
        );

        dev.mutate(DeviceModel::ZdNoCmr).unwrap();
        assert_eq!(dev.dev_type(), DeviceType::ZoneDomains);
        assert_eq!(dev.geometry().domains.len(), 1);

        dev.mutate(DeviceModel::ZoneDom).unwrap();
        assert_eq!(dev.geometry().nr_zones, zones_before);
        assert_eq!(dev.config().model, DeviceModel::ZoneDom);
    }

    #[test]
    fn zone_count_conversion_uses_tables() {
        let dir = TempDir::new().unwrap();
        let dev = ZdDevice::open(cfg(&dir, "type-ZONE_DOM/"), CAP).unwrap();
        // 4 SMR zones per realm, 3 CMR zones per realm
        assert_eq!(dev.convert_zone_count(4, Flavor::Smr, Flavor::Cmr), 3);
        assert_eq!(dev.convert_zone_count(8, Flavor::Smr, Flavor::Cmr), 6);
        assert_eq!(dev.convert_zone_count(3, Flavor::Cmr, Flavor::Smr), 4);
        assert_eq!(dev.convert_zone_count(5, Flavor::Smr, Flavor::Cmr), 3 + 1);
        assert_eq!(dev.convert_zone_count(6, Flavor::Cmr, Flavor::Cmr), 6);
    }
}
