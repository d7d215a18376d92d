//! Read/write data path (C10), READ CAPACITY and SYNCHRONIZE CACHE.
//!
//! Reads and writes walk the request zone by zone: every zone's type,
//! condition and write pointer gate the slice that overlaps it, then the
//! bytes move with positioned I/O against the backing file.

use std::io::{Read, Write};

use tracing::warn;

use crate::device::ZdDevice;
use crate::profile::DeviceType;
use crate::scsi::bytes::{get_be16, get_be32, get_be64, put_be32, put_be64};
use crate::scsi::{asc, opcode, sense_key, CmdError, CmdOutput, Request};
use crate::zone::{ZoneCond, ZoneType, NO_WP};

use super::{invalid_cdb, sense};

/// Upper bound for one file-I/O transfer.
const IO_CHUNK: usize = 1 << 20;

fn parse_rw_cdb(cdb: &[u8]) -> (u64, u64) {
    match cdb[0] {
        opcode::READ_10 | opcode::WRITE_10 => (get_be32(cdb, 2) as u64, get_be16(cdb, 7) as u64),
        opcode::READ_12 | opcode::WRITE_12 => (get_be32(cdb, 2) as u64, get_be32(cdb, 6) as u64),
        _ => (get_be64(cdb, 2), get_be32(cdb, 10) as u64),
    }
}

impl ZdDevice {
    pub(super) fn read<W: Write, R: Read>(
        &mut self,
        req: &mut Request<'_, W, R>,
    ) -> Result<CmdOutput, CmdError> {
        if req.cdb[1] & 0xE0 != 0 {
            return Ok(invalid_cdb()); // RDPROTECT is not supported
        }
        let (lba, count) = parse_rw_cdb(req.cdb);
        if count == 0 {
            return Ok(CmdOutput::ok());
        }
        let hdr = self.store.header();
        let shift = hdr.zone_shift;
        let logical = hdr.logical_capacity;
        let lba_size = hdr.lba_size as u64;
        let urswrz = hdr.urswrz != 0;
        match lba.checked_add(count) {
            Some(end) if end <= logical => {}
            _ => return Ok(self.read_fail(sense_key::ILLEGAL_REQUEST, asc::LBA_OUT_OF_RANGE)),
        }

        let first_type = self.store.zone((lba >> shift) as u32).zone_type();
        let mut cursor = lba;
        let end = lba + count;
        let mut buf = vec![0u8; IO_CHUNK];

        while cursor < end {
            let zi = (cursor >> shift) as u32;
            let z = *self.store.zone(zi);
            let zone_end = z.start + z.len;
            let chunk = (end - cursor).min(zone_end - cursor);

            if z.zone_type() != first_type {
                return Ok(self.read_fail(sense_key::ILLEGAL_REQUEST, asc::READ_BOUNDARY_VIOLATION));
            }

            // how much of the slice holds valid data
            let valid = match (z.zone_type(), z.condition()) {
                (ZoneType::Gap, _) => {
                    if !urswrz {
                        return Ok(self
                            .read_fail(sense_key::ILLEGAL_REQUEST, asc::ATTEMPT_TO_ACCESS_GAP_ZONE));
                    }
                    0
                }
                (_, ZoneCond::Offline) => {
                    return Ok(self.read_fail(sense_key::DATA_PROTECT, asc::ZONE_IS_OFFLINE))
                }
                (_, ZoneCond::Inactive) => {
                    if !urswrz {
                        return Ok(self.read_fail(sense_key::ILLEGAL_REQUEST, asc::ZONE_IS_INACTIVE));
                    }
                    0
                }
                (ZoneType::SeqWriteRequired | ZoneType::SeqOrBeforeRequired, _) => {
                    let boundary = z.valid_data_end();
                    if !urswrz && cursor + chunk > boundary {
                        return Ok(self.read_fail(
                            sense_key::ILLEGAL_REQUEST,
                            asc::ATTEMPT_TO_READ_INVALID_DATA,
                        ));
                    }
                    boundary.saturating_sub(cursor).min(chunk)
                }
                _ => chunk,
            };

            // valid bytes come from the file, the rest reads as zeros
            let mut done = 0u64;
            while done < chunk {
                let n = ((chunk - done) * lba_size).min(IO_CHUNK as u64) as usize;
                let n_lbas = n as u64 / lba_size;
                let valid_bytes =
                    (valid.saturating_sub(done).min(n_lbas) * lba_size) as usize;
                if valid_bytes > 0 {
                    let off = self
                        .store
                        .data_offset(cursor + done)
                        .unwrap_or(u64::MAX);
                    if off == u64::MAX
                        || self.store.pread(off, &mut buf[..valid_bytes]).is_err()
                    {
                        return Ok(self
                            .read_fail(sense_key::MEDIUM_ERROR, asc::UNRECOVERED_READ_ERROR));
                    }
                }
                buf[valid_bytes..n].fill(0);
                req.data_in
                    .write_all(&buf[..n])
                    .map_err(CmdError::DataIn)?;
                done += n_lbas;
            }
            cursor += chunk;
        }
        Ok(CmdOutput::ok())
    }

    fn read_fail(&mut self, key: u8, code: u16) -> CmdOutput {
        self.store.header_mut().stats.read_rule_fails += 1;
        sense(key, code)
    }

    fn write_fail(&mut self, key: u8, code: u16) -> CmdOutput {
        self.store.header_mut().stats.write_rule_fails += 1;
        sense(key, code)
    }

    pub(super) fn write<W: Write, R: Read>(
        &mut self,
        req: &mut Request<'_, W, R>,
    ) -> Result<CmdOutput, CmdError> {
        if req.cdb[1] & 0xE0 != 0 {
            return Ok(invalid_cdb()); // WRPROTECT is not supported
        }
        let (lba, count) = parse_rw_cdb(req.cdb);
        if count == 0 {
            return Ok(CmdOutput::ok());
        }
        let hdr = self.store.header();
        let shift = hdr.zone_shift;
        let logical = hdr.logical_capacity;
        let lba_size = hdr.lba_size as u64;
        match lba.checked_add(count) {
            Some(end) if end <= logical => {}
            _ => return Ok(self.write_fail(sense_key::ILLEGAL_REQUEST, asc::LBA_OUT_OF_RANGE)),
        }

        let first_type = self.store.zone((lba >> shift) as u32).zone_type();
        let mut cursor = lba;
        let end = lba + count;
        let mut buf = vec![0u8; IO_CHUNK];

        while cursor < end {
            let zi = (cursor >> shift) as u32;
            let z = *self.store.zone(zi);
            let zone_end = z.start + z.len;
            let chunk = (end - cursor).min(zone_end - cursor);
            let ztype = z.zone_type();
            let cond = z.condition();

            // zone gating
            match (ztype, cond) {
                (ZoneType::Gap, _) => {
                    return Ok(self
                        .write_fail(sense_key::ILLEGAL_REQUEST, asc::ATTEMPT_TO_ACCESS_GAP_ZONE))
                }
                (_, ZoneCond::Offline) => {
                    return Ok(self.write_fail(sense_key::DATA_PROTECT, asc::ZONE_IS_OFFLINE))
                }
                (_, ZoneCond::Inactive) => {
                    return Ok(self.write_fail(sense_key::ILLEGAL_REQUEST, asc::ZONE_IS_INACTIVE))
                }
                (_, ZoneCond::ReadOnly) => {
                    return Ok(self.write_fail(sense_key::DATA_PROTECT, asc::ZONE_IS_READ_ONLY))
                }
                _ => {}
            }
            if ztype != first_type {
                return Ok(
                    self.write_fail(sense_key::ILLEGAL_REQUEST, asc::WRITE_BOUNDARY_VIOLATION)
                );
            }

            // write-pointer rules
            match ztype {
                ZoneType::SeqWriteRequired => {
                    if cond == ZoneCond::Full || z.wp == NO_WP || cursor != z.wp {
                        return Ok(self
                            .write_fail(sense_key::ILLEGAL_REQUEST, asc::UNALIGNED_WRITE_COMMAND));
                    }
                }
                ZoneType::SeqOrBeforeRequired => {
                    if cond == ZoneCond::Full || z.wp == NO_WP || cursor > z.wp {
                        return Ok(self
                            .write_fail(sense_key::ILLEGAL_REQUEST, asc::UNALIGNED_WRITE_COMMAND));
                    }
                }
                ZoneType::SeqWritePreferred => {
                    if z.wp != NO_WP && cursor != z.wp {
                        self.store.set_non_seq(zi, true);
                        if cursor < z.wp {
                            self.store.header_mut().stats.subopt_write_cmds += 1;
                        }
                    }
                }
                _ => {}
            }

            // implicit open
            if ztype.has_wp() && matches!(cond, ZoneCond::Empty | ZoneCond::Closed) {
                if let Err(err) = self.store.implicit_open(zi) {
                    let (key, code) = err.sense();
                    return Ok(sense(key, code));
                }
            }

            // move the bytes
            let mut done = 0u64;
            while done < chunk {
                let n = ((chunk - done) * lba_size).min(IO_CHUNK as u64) as usize;
                req.data_out
                    .read_exact(&mut buf[..n])
                    .map_err(CmdError::DataOut)?;
                let Some(off) = self.store.data_offset(cursor + done) else {
                    return Ok(self.write_fail(sense_key::MEDIUM_ERROR, asc::WRITE_ERROR));
                };
                if let Err(err) = self.store.pwrite(off, &buf[..n]) {
                    warn!(%err, lba = cursor + done, "backing-file write failed");
                    return Ok(self.write_fail(sense_key::MEDIUM_ERROR, asc::WRITE_ERROR));
                }
                done += n as u64 / lba_size;
            }
            if ztype.has_wp() {
                self.store.advance_wp(zi, cursor, chunk);
            }
            cursor += chunk;
        }
        Ok(CmdOutput::ok())
    }

    /// Last LBA the personality advertises: Zone Domains devices report
    /// their CMR-flavor capacity, zoned devices the full logical space.
    fn reported_last_lba(&self) -> u64 {
        let hdr = self.store.header();
        match self.dev_type() {
            DeviceType::ZoneDomains => hdr.cmr_capacity - 1,
            _ => hdr.logical_capacity - 1,
        }
    }

    pub(super) fn read_capacity_10<W: Write, R: Read>(
        &mut self,
        req: &mut Request<'_, W, R>,
    ) -> Result<CmdOutput, CmdError> {
        let mut d = [0u8; 8];
        let last = self.reported_last_lba().min(u32::MAX as u64) as u32;
        put_be32(&mut d, 0, last);
        put_be32(&mut d, 4, self.store.header().lba_size);
        req.data_in.write_all(&d).map_err(CmdError::DataIn)?;
        Ok(CmdOutput::ok())
    }

    pub(super) fn read_capacity_16<W: Write, R: Read>(
        &mut self,
        req: &mut Request<'_, W, R>,
    ) -> Result<CmdOutput, CmdError> {
        let alloc = get_be32(req.cdb, 10) as usize;
        let mut d = [0u8; 32];
        put_be64(&mut d, 0, self.reported_last_lba());
        put_be32(&mut d, 8, self.store.header().lba_size);
        if matches!(
            self.dev_type(),
            DeviceType::HostManaged | DeviceType::HostAware
        ) {
            d[12] = 0x10; // RC BASIS: largest addressable LBA
        }
        let n = d.len().min(alloc);
        req.data_in.write_all(&d[..n]).map_err(CmdError::DataIn)?;
        Ok(CmdOutput::ok())
    }

    pub(super) fn synchronize_cache(&mut self) -> Result<CmdOutput, CmdError> {
        match self.store.flush() {
            Ok(()) => Ok(CmdOutput::ok()),
            Err(err) => {
                warn!(%err, "flush failed");
                Ok(sense(
                    sense_key::HARDWARE_ERROR,
                    asc::INTERNAL_TARGET_FAILURE,
                ))
            }
        }
    }
}
