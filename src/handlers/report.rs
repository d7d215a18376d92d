//! ZBC IN reporting commands and the ZONE ACTIVATE / ZONE QUERY CDB
//! marshaling.

use std::io::{Read, Write};

use crate::activation::{ActivationArgs, ActivationResult};
use crate::device::ZdDevice;
use crate::profile::PROFILES;
use crate::scsi::bytes::{get_be16, get_be24, get_be32, get_be48, get_be64, put_be16, put_be32, put_be64};
use crate::scsi::{CmdError, CmdOutput, Request, SilentlyTruncate};
use crate::zone::ZoneCond;

use super::{invalid_cdb, sense};

/// REPORT ZONES reporting options.
mod rz_opt {
    pub const ALL: u8 = 0x00;
    pub const EMPTY: u8 = 0x01;
    pub const IMP_OPEN: u8 = 0x02;
    pub const EXP_OPEN: u8 = 0x03;
    pub const CLOSED: u8 = 0x04;
    pub const FULL: u8 = 0x05;
    pub const READ_ONLY: u8 = 0x06;
    pub const OFFLINE: u8 = 0x07;
    pub const INACTIVE: u8 = 0x10;
    pub const NOT_WP: u8 = 0x3F;
}

/// REPORT ZONE DOMAINS reporting options.
mod rzd_opt {
    pub const ALL: u8 = 0x00;
    pub const ACTIVE: u8 = 0x01;
}

const ZONE_DESC_SIZE: usize = 64;
const REALM_DESC_SIZE: usize = 80;
const DOMAIN_DESC_SIZE: usize = 32;
const ACT_HEADER_SIZE: usize = 32;
const ACT_DESC_SIZE: usize = 24;

impl ZdDevice {
    pub(super) fn report_zones<W: Write, R: Read>(
        &mut self,
        req: &mut Request<'_, W, R>,
    ) -> Result<CmdOutput, CmdError> {
        if !self.profile.is_zoned() {
            return Ok(self.not_handled(req.cdb[0]));
        }
        let start_lba = get_be64(req.cdb, 2);
        let alloc = get_be32(req.cdb, 10) as usize;
        let partial = req.cdb[14] & 0x80 != 0;
        let opt = req.cdb[14] & 0x3F;

        let hdr = self.store.header();
        if start_lba >= hdr.logical_capacity {
            return Ok(invalid_cdb());
        }
        let matches = |cond: ZoneCond, non_seq: bool| -> bool {
            match opt {
                rz_opt::ALL => true,
                rz_opt::EMPTY => cond == ZoneCond::Empty,
                rz_opt::IMP_OPEN => cond == ZoneCond::ImpOpen,
                rz_opt::EXP_OPEN => cond == ZoneCond::ExpOpen,
                rz_opt::CLOSED => cond == ZoneCond::Closed,
                rz_opt::FULL => cond == ZoneCond::Full,
                rz_opt::READ_ONLY => cond == ZoneCond::ReadOnly,
                rz_opt::OFFLINE => cond == ZoneCond::Offline,
                rz_opt::INACTIVE => cond == ZoneCond::Inactive,
                rz_opt::NOT_WP => cond == ZoneCond::NotWp || non_seq,
                _ => false,
            }
        };
        if !matches!(
            opt,
            rz_opt::ALL
                | rz_opt::EMPTY
                | rz_opt::IMP_OPEN
                | rz_opt::EXP_OPEN
                | rz_opt::CLOSED
                | rz_opt::FULL
                | rz_opt::READ_ONLY
                | rz_opt::OFFLINE
                | rz_opt::INACTIVE
                | rz_opt::NOT_WP
        ) {
            return Ok(invalid_cdb());
        }

        let first_zone = (start_lba >> hdr.zone_shift) as u32;
        let nr_zones = hdr.nr_zones;
        let max_lba = hdr.logical_capacity - 1;

        let budget = alloc.saturating_sub(64) / ZONE_DESC_SIZE;
        let mut descs: Vec<u8> = Vec::new();
        let mut total_matching = 0usize;
        for zi in first_zone..nr_zones {
            let z = *self.store.zone(zi);
            let non_seq = z.flags & crate::zone::zflags::NON_SEQ != 0;
            if !matches(z.condition(), non_seq) {
                continue;
            }
            total_matching += 1;
            if total_matching <= budget {
                let mut d = [0u8; ZONE_DESC_SIZE];
                d[0] = z.zone_type().wire() & 0x0F;
                d[1] = (z.condition().wire() << 4) | (z.flags & 0x03);
                put_be64(&mut d, 8, z.len);
                put_be64(&mut d, 16, z.start);
                put_be64(&mut d, 24, z.wp);
                descs.extend_from_slice(&d);
            }
        }

        let reported = if partial {
            descs.len()
        } else {
            total_matching * ZONE_DESC_SIZE
        };
        let mut head = [0u8; 64];
        put_be32(&mut head, 0, reported as u32);
        put_be64(&mut head, 8, max_lba);

        let mut out = SilentlyTruncate::new(&mut *req.data_in, alloc);
        out.write_all(&head).map_err(CmdError::DataIn)?;
        out.write_all(&descs).map_err(CmdError::DataIn)?;
        Ok(CmdOutput::ok())
    }

    pub(super) fn report_realms<W: Write, R: Read>(
        &mut self,
        req: &mut Request<'_, W, R>,
    ) -> Result<CmdOutput, CmdError> {
        if !self.is_zone_domains() || self.store.header().realms_feature == 0 {
            return Ok(self.not_handled(req.cdb[0]));
        }
        let first_realm = get_be64(req.cdb, 2);
        let alloc = get_be32(req.cdb, 10) as usize;
        let hdr = self.store.header();
        let nr_realms = hdr.nr_realms;
        let shift = hdr.zone_shift;
        if first_realm >= nr_realms as u64 {
            return Ok(invalid_cdb());
        }

        let mut descs = Vec::new();
        for r in first_realm as u32..nr_realms {
            let realm = *self.store.realm(r);
            let mut d = [0u8; REALM_DESC_SIZE];
            put_be32(&mut d, 0, r);
            d[4] = realm.current_type;
            d[5] = realm.can_activate;
            put_be16(&mut d, 6, realm.restrictions);
            for (t, item) in realm.items.iter().enumerate() {
                let off = 16 + t * 16;
                if item.length > 0 {
                    let end = item.start_lba + ((item.length as u64) << shift) - 1;
                    put_be64(&mut d, off, item.start_lba);
                    put_be64(&mut d, off + 8, end);
                }
            }
            descs.extend_from_slice(&d);
        }

        let mut head = [0u8; 16];
        put_be32(&mut head, 0, descs.len() as u32);
        put_be32(&mut head, 4, nr_realms);
        head[8] = (REALM_DESC_SIZE / 8) as u8;

        let mut out = SilentlyTruncate::new(&mut *req.data_in, alloc);
        out.write_all(&head).map_err(CmdError::DataIn)?;
        out.write_all(&descs).map_err(CmdError::DataIn)?;
        Ok(CmdOutput::ok())
    }

    pub(super) fn report_zone_domains<W: Write, R: Read>(
        &mut self,
        req: &mut Request<'_, W, R>,
    ) -> Result<CmdOutput, CmdError> {
        if !self.is_zone_domains() {
            return Ok(self.not_handled(req.cdb[0]));
        }
        let alloc = get_be32(req.cdb, 10) as usize;
        let opt = req.cdb[14] & 0x3F;
        if opt != rzd_opt::ALL && opt != rzd_opt::ACTIVE {
            return Ok(invalid_cdb());
        }

        let hdr = *self.store.header();
        let mut descs = Vec::new();
        let mut returned = 0u8;
        for id in 0..hdr.nr_domains {
            let dom = hdr.domains[id as usize];
            let start_zone = (dom.start_lba >> hdr.zone_shift) as u32;
            let mut active = 0u32;
            for j in 0..dom.nr_zones {
                if self.store.zone(start_zone + j).condition() != ZoneCond::Inactive {
                    active += 1;
                }
            }
            if opt == rzd_opt::ACTIVE && active == 0 {
                continue;
            }
            returned += 1;
            let mut d = [0u8; DOMAIN_DESC_SIZE];
            d[0] = id as u8;
            d[1] = dom.ztype;
            d[2] = if active == dom.nr_zones {
                0x03 // every zone active
            } else if active > 0 {
                0x01
            } else {
                0x00
            };
            put_be64(&mut d, 8, dom.start_lba);
            put_be64(&mut d, 16, dom.end_lba);
            let count = if opt == rzd_opt::ACTIVE { active } else { dom.nr_zones };
            put_be32(&mut d, 24, count);
            descs.extend_from_slice(&d);
        }

        let mut head = [0u8; 64];
        put_be32(&mut head, 0, descs.len() as u32);
        head[4] = returned;
        head[5] = hdr.nr_domains as u8;
        head[6] = opt;
        put_be64(&mut head, 8, hdr.logical_capacity);

        let mut out = SilentlyTruncate::new(&mut *req.data_in, alloc);
        out.write_all(&head).map_err(CmdError::DataIn)?;
        out.write_all(&descs).map_err(CmdError::DataIn)?;
        Ok(CmdOutput::ok())
    }

    pub(super) fn report_mutations<W: Write, R: Read>(
        &mut self,
        req: &mut Request<'_, W, R>,
    ) -> Result<CmdOutput, CmdError> {
        let alloc = get_be32(req.cdb, 10) as usize;
        let mut descs = Vec::new();
        for p in PROFILES.iter() {
            let mut d = [0u8; 8];
            put_be32(&mut d, 0, p.dev_type.wire());
            put_be32(&mut d, 4, p.model.wire());
            descs.extend_from_slice(&d);
        }
        let mut head = [0u8; 8];
        put_be32(&mut head, 0, descs.len() as u32);
        put_be32(&mut head, 4, PROFILES.len() as u32);

        let mut out = SilentlyTruncate::new(&mut *req.data_in, alloc);
        out.write_all(&head).map_err(CmdError::DataIn)?;
        out.write_all(&descs).map_err(CmdError::DataIn)?;
        Ok(CmdOutput::ok())
    }

    pub(super) fn zone_activate_16<W: Write, R: Read>(
        &mut self,
        req: &mut Request<'_, W, R>,
        query: bool,
    ) -> Result<CmdOutput, CmdError> {
        if !self.is_zone_domains() {
            return Ok(self.not_handled(req.cdb[0]));
        }
        let all = req.cdb[1] & 0x80 != 0;
        let nozsrc = req.cdb[1] & 0x40 != 0;
        let start_lba = get_be48(req.cdb, 2);
        let cdb_count = get_be16(req.cdb, 8) as u32;
        let domain_id = (req.cdb[10] & 0x0F) as u32;
        let alloc = get_be24(req.cdb, 11) as usize;
        self.run_activation(req, start_lba, cdb_count, domain_id, all, nozsrc, query, alloc)
    }

    pub(super) fn zone_activate_32<W: Write, R: Read>(
        &mut self,
        req: &mut Request<'_, W, R>,
        query: bool,
    ) -> Result<CmdOutput, CmdError> {
        if !self.is_zone_domains() {
            return Ok(self.not_handled(req.cdb[0]));
        }
        if req.cdb[7] < 0x18 {
            return Ok(invalid_cdb());
        }
        let flags = req.cdb[25];
        let all = flags & 0x80 != 0;
        let nozsrc = flags & 0x40 != 0;
        let start_lba = get_be64(req.cdb, 12);
        let cdb_count = get_be32(req.cdb, 20);
        let domain_id = (req.cdb[24] & 0x0F) as u32;
        let alloc = get_be32(req.cdb, 28) as usize;
        self.run_activation(req, start_lba, cdb_count, domain_id, all, nozsrc, query, alloc)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_activation<W: Write, R: Read>(
        &mut self,
        req: &mut Request<'_, W, R>,
        start_lba: u64,
        cdb_count: u32,
        domain_id: u32,
        all: bool,
        nozsrc: bool,
        query: bool,
        alloc: usize,
    ) -> Result<CmdOutput, CmdError> {
        if alloc < ACT_HEADER_SIZE {
            return Ok(invalid_cdb());
        }
        let nr_zones = if all {
            0
        } else if nozsrc {
            cdb_count
        } else {
            match self.default_activation_count(start_lba) {
                Some(n) => n,
                None => return Ok(invalid_cdb()),
            }
        };
        let args = ActivationArgs {
            start_lba,
            nr_zones,
            domain_id,
            all,
            query,
        };
        let result = match self.store.zone_activate(args) {
            Ok(res) => res,
            Err(err) => {
                let (key, code) = err.sense();
                return Ok(sense(key, code));
            }
        };
        let payload = encode_activation(&result, alloc);
        let mut out = SilentlyTruncate::new(&mut *req.data_in, alloc);
        out.write_all(&payload).map_err(CmdError::DataIn)?;
        Ok(CmdOutput::ok())
    }

    /// FSNOZ-derived zone count for the domain holding `start_lba`.
    /// FSNOZ is kept in SMR-flavor zones and converted when the source
    /// domain is CMR-flavor.
    fn default_activation_count(&self, start_lba: u64) -> Option<u32> {
        let fsnoz = self.store.header().fsnoz;
        if fsnoz == 0 {
            return None;
        }
        let flavor = self
            .store
            .domain_of_lba(start_lba)
            .and_then(|(_, d)| d.zone_type())
            .and_then(|t| t.flavor());
        Some(match flavor {
            Some(f) => self.convert_zone_count(fsnoz, crate::zone::Flavor::Smr, f),
            None => fsnoz,
        })
    }
}

/// Marshal the activation result header + descriptors.
fn encode_activation(res: &ActivationResult, alloc: usize) -> Vec<u8> {
    let available = res.descriptors.len() * ACT_DESC_SIZE;
    let fit = (alloc.saturating_sub(ACT_HEADER_SIZE) / ACT_DESC_SIZE).min(res.descriptors.len());
    let returned = fit * ACT_DESC_SIZE;

    let mut buf = vec![0u8; ACT_HEADER_SIZE + returned];
    put_be32(&mut buf, 0, available as u32);
    put_be32(&mut buf, 4, returned as u32);
    buf[8] = res.status_bits;
    buf[9] = res.error_bits;
    put_be32(&mut buf, 12, res.nr_realms_activated);
    put_be32(&mut buf, 16, res.nr_zones_activated);
    put_be64(&mut buf, 24, res.ziwup);

    for (i, desc) in res.descriptors.iter().take(fit).enumerate() {
        let off = ACT_HEADER_SIZE + i * ACT_DESC_SIZE;
        buf[off] = desc.ztype.wire();
        buf[off + 1] = desc.cond.wire() << 4;
        buf[off + 2] = desc.domain_id as u8;
        put_be32(&mut buf, off + 4, desc.nr_zones);
        put_be64(&mut buf, off + 8, desc.start_lba);
    }
    buf
}
