//! Administrative commands: REQUEST SENSE, FORMAT UNIT, SANITIZE and
//! RECEIVE DIAGNOSTIC RESULTS.

use std::io::{Read, Write};

use tracing::{info, warn};

use crate::device::ZdDevice;
use crate::scsi::bytes::{get_be16, put_be16, put_be64};
use crate::scsi::{asc, sense_key, CmdError, CmdOutput, Request, SilentlyTruncate};

use super::{invalid_cdb, sense};

/// SANITIZE service actions.
mod sanitize_sa {
    pub const OVERWRITE: u8 = 0x01;
    pub const BLOCK_ERASE: u8 = 0x02;
    pub const CRYPTO_ERASE: u8 = 0x03;
    pub const EXIT_FAILURE_MODE: u8 = 0x1F;
}

const DIAG_PAGE_SUPPORTED: u8 = 0x00;
const DIAG_PAGE_ZBD_STATS: u8 = 0x14;
const ZBD_STATS_SUBPAGE: u8 = 0x01;

impl ZdDevice {
    pub(super) fn request_sense<W: Write, R: Read>(
        &mut self,
        req: &mut Request<'_, W, R>,
    ) -> Result<CmdOutput, CmdError> {
        if req.cdb[1] & 0x01 != 0 {
            // descriptor format is not supported
            return Ok(invalid_cdb());
        }
        let alloc = req.cdb[4] as usize;
        let data = self
            .sense_queue
            .pop()
            .unwrap_or_default()
            .to_fixed();
        let mut out = SilentlyTruncate::new(&mut *req.data_in, alloc);
        out.write_all(&data).map_err(CmdError::DataIn)?;
        Ok(CmdOutput::ok())
    }

    pub(super) fn format_unit<W: Write, R: Read>(
        &mut self,
        req: &Request<'_, W, R>,
    ) -> Result<CmdOutput, CmdError> {
        if req.cdb[1] & 0x10 != 0 {
            // FMTDATA parameter lists are not supported
            return Ok(invalid_cdb());
        }
        info!("FORMAT UNIT: re-initializing metadata");
        match self.reformat() {
            Ok(()) => Ok(CmdOutput::ok()),
            Err(err) => {
                warn!(%err, "format failed");
                Ok(sense(
                    sense_key::MEDIUM_ERROR,
                    asc::MEDIUM_FORMAT_CORRUPTED,
                ))
            }
        }
    }

    /// Cryptographic erase only; ZNR must be clear.
    pub(super) fn sanitize<W: Write, R: Read>(
        &mut self,
        req: &Request<'_, W, R>,
    ) -> Result<CmdOutput, CmdError> {
        let sa = req.cdb[1] & 0x1F;
        let znr = req.cdb[1] & 0x40 != 0;
        if znr {
            return Ok(invalid_cdb());
        }
        match sa {
            sanitize_sa::CRYPTO_ERASE => {
                info!("SANITIZE crypto erase: re-initializing metadata");
                match self.reformat() {
                    Ok(()) => Ok(CmdOutput::ok()),
                    Err(err) => {
                        warn!(%err, "sanitize failed");
                        Ok(sense(
                            sense_key::HARDWARE_ERROR,
                            asc::INTERNAL_TARGET_FAILURE,
                        ))
                    }
                }
            }
            sanitize_sa::OVERWRITE
            | sanitize_sa::BLOCK_ERASE
            | sanitize_sa::EXIT_FAILURE_MODE => Ok(invalid_cdb()),
            _ => Ok(invalid_cdb()),
        }
    }

    pub(super) fn receive_diagnostics<W: Write, R: Read>(
        &mut self,
        req: &mut Request<'_, W, R>,
    ) -> Result<CmdOutput, CmdError> {
        let pcv = req.cdb[1] & 0x01 != 0;
        let page = if pcv { req.cdb[2] } else { DIAG_PAGE_SUPPORTED };
        let alloc = get_be16(req.cdb, 3) as usize;

        let data = match page {
            DIAG_PAGE_SUPPORTED => vec![
                DIAG_PAGE_SUPPORTED,
                0x00,
                0x00,
                0x02,
                DIAG_PAGE_SUPPORTED,
                DIAG_PAGE_ZBD_STATS,
            ],
            DIAG_PAGE_ZBD_STATS => self.zbd_stats_page(),
            _ => return Ok(invalid_cdb()),
        };
        let mut out = SilentlyTruncate::new(&mut *req.data_in, alloc);
        out.write_all(&data).map_err(CmdError::DataIn)?;
        Ok(CmdOutput::ok())
    }

    /// Zoned Block Device Statistics: eleven binary 8-byte parameters in
    /// log-parameter format.
    fn zbd_stats_page(&self) -> Vec<u8> {
        let s = self.store.header().stats;
        let params: [(u16, u64); 11] = [
            (0x00, s.max_open),
            (0x01, s.max_exp_open),
            (0x02, s.max_imp_open),
            (0x03, s.min_empty),
            (0x04, s.max_non_seq),
            (0x05, s.zones_emptied),
            (0x06, s.subopt_write_cmds),
            (0x07, s.cmds_above_opt_lim),
            (0x08, s.failed_exp_opens),
            (0x09, s.read_rule_fails),
            (0x0A, s.write_rule_fails),
        ];
        let body_len = params.len() * 12;
        let mut d = vec![0u8; 4 + body_len];
        d[0] = DIAG_PAGE_ZBD_STATS;
        d[1] = ZBD_STATS_SUBPAGE;
        put_be16(&mut d, 2, body_len as u16);
        for (i, (code, value)) in params.iter().enumerate() {
            let off = 4 + i * 12;
            put_be16(&mut d, off, *code);
            d[off + 2] = 0x03; // binary format
            d[off + 3] = 8;
            put_be64(&mut d, off + 4, *value);
        }
        d
    }
}
