//! MODE SENSE / MODE SELECT and the mode pages the target carries,
//! including the vendor Zone Domains control subpage (0x3D/0x08).

use std::io::{Read, Write};

use crate::device::ZdDevice;
use crate::scsi::bytes::{get_be16, get_be32, put_be16, put_be24, put_be32};
use crate::scsi::{asc, sense_key, CmdError, CmdOutput, Request, SilentlyTruncate};

use super::{invalid_cdb, sense};

const PAGE_RW_RECOVERY: u8 = 0x01;
const PAGE_CACHING: u8 = 0x08;
const PAGE_CONTROL: u8 = 0x0A;
const PAGE_ZD_CONTROL: u8 = 0x3D;
const SUBPAGE_ZD_CONTROL: u8 = 0x08;
const PAGE_ALL: u8 = 0x3F;

/// Page-control field of MODE SENSE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageControl {
    Current,
    Changeable,
    Default,
}

impl ZdDevice {
    pub(super) fn mode_sense<W: Write, R: Read>(
        &mut self,
        req: &mut Request<'_, W, R>,
        ten: bool,
    ) -> Result<CmdOutput, CmdError> {
        let dbd = req.cdb[1] & 0x08 != 0;
        let pc = match req.cdb[2] >> 6 {
            0 | 3 => PageControl::Current,
            1 => PageControl::Changeable,
            _ => PageControl::Default,
        };
        let page = req.cdb[2] & 0x3F;
        let subpage = req.cdb[3];
        let alloc = if ten {
            get_be16(req.cdb, 7) as usize
        } else {
            req.cdb[4] as usize
        };

        let mut pages = Vec::new();
        match (page, subpage) {
            (PAGE_RW_RECOVERY, 0x00) => pages.extend(self.page_rw_recovery(pc)),
            (PAGE_CACHING, 0x00) => pages.extend(self.page_caching(pc)),
            (PAGE_CONTROL, 0x00) => pages.extend(self.page_control(pc)),
            (PAGE_ZD_CONTROL, SUBPAGE_ZD_CONTROL) if self.is_zone_domains() => {
                pages.extend(self.page_zd_control(pc))
            }
            (PAGE_ALL, sub) if sub == 0x00 || sub == 0xFF => {
                pages.extend(self.page_rw_recovery(pc));
                pages.extend(self.page_caching(pc));
                pages.extend(self.page_control(pc));
                if sub == 0xFF && self.is_zone_domains() {
                    pages.extend(self.page_zd_control(pc));
                }
            }
            _ => return Ok(invalid_cdb()),
        }

        let block_desc = if dbd { Vec::new() } else { self.block_descriptor() };
        let mut data = if ten {
            let mut h = vec![0u8; 8];
            put_be16(&mut h, 0, (6 + block_desc.len() + pages.len()) as u16);
            h[3] = 0x10; // DPOFUA
            put_be16(&mut h, 6, block_desc.len() as u16);
            h
        } else {
            vec![
                (3 + block_desc.len() + pages.len()) as u8,
                0,
                0x10,
                block_desc.len() as u8,
            ]
        };
        data.extend_from_slice(&block_desc);
        data.extend_from_slice(&pages);

        let mut out = SilentlyTruncate::new(&mut *req.data_in, alloc);
        out.write_all(&data).map_err(CmdError::DataIn)?;
        Ok(CmdOutput::ok())
    }

    fn block_descriptor(&self) -> Vec<u8> {
        let hdr = self.store.header();
        let mut d = vec![0u8; 8];
        let blocks = hdr.logical_capacity.min(0xFF_FFFF) as u32;
        put_be24(&mut d, 1, blocks);
        put_be24(&mut d, 5, hdr.lba_size);
        d
    }

    fn page_rw_recovery(&self, pc: PageControl) -> Vec<u8> {
        let mut p = vec![0u8; 12];
        p[0] = PAGE_RW_RECOVERY;
        p[1] = 0x0A;
        if pc != PageControl::Changeable {
            p[2] = 0x80; // AWRE
        }
        p
    }

    fn page_caching(&self, pc: PageControl) -> Vec<u8> {
        let mut p = vec![0u8; 20];
        p[0] = PAGE_CACHING;
        p[1] = 0x12;
        if pc != PageControl::Changeable {
            p[2] = 0x04; // WCE
        }
        p
    }

    fn page_control(&self, pc: PageControl) -> Vec<u8> {
        let mut p = vec![0u8; 12];
        p[0] = PAGE_CONTROL;
        p[1] = 0x0A;
        if pc != PageControl::Changeable {
            p[2] = 0x02; // GLTSD
            p[5] = 0x40; // TAS
        }
        p
    }

    /// FSNOZ at offset 4, URSWRZ at 10, MAX ACTIVATION at 16.
    fn page_zd_control(&self, pc: PageControl) -> Vec<u8> {
        let hdr = self.store.header();
        let mut p = vec![0u8; 20];
        p[0] = PAGE_ZD_CONTROL | 0x40; // SPF
        p[1] = SUBPAGE_ZD_CONTROL;
        put_be16(&mut p, 2, 16);
        match pc {
            PageControl::Current => {
                put_be32(&mut p, 4, hdr.fsnoz);
                p[10] = hdr.urswrz;
                put_be16(&mut p, 16, hdr.max_activation.min(u16::MAX as u32) as u16);
            }
            PageControl::Default => {
                put_be32(&mut p, 4, self.geometry.fsnoz);
                p[10] = self.geometry.urswrz as u8;
                put_be16(
                    &mut p,
                    16,
                    self.geometry.max_activation.min(u16::MAX as u32) as u16,
                );
            }
            PageControl::Changeable => {
                if self.profile.mutable_fsnoz {
                    put_be32(&mut p, 4, u32::MAX);
                }
                if self.profile.mutable_urswrz {
                    p[10] = 0xFF;
                }
                if self.profile.mutable_max_activation {
                    put_be16(&mut p, 16, u16::MAX);
                }
            }
        }
        p
    }

    pub(super) fn mode_select<W: Write, R: Read>(
        &mut self,
        req: &mut Request<'_, W, R>,
        ten: bool,
    ) -> Result<CmdOutput, CmdError> {
        let param_len = if ten {
            get_be16(req.cdb, 7) as usize
        } else {
            req.cdb[4] as usize
        };
        if param_len == 0 {
            return Ok(CmdOutput::ok());
        }
        let mut buf = vec![0u8; param_len];
        req.data_out
            .read_exact(&mut buf)
            .map_err(CmdError::DataOut)?;

        let header_len = if ten { 8 } else { 4 };
        if buf.len() < header_len {
            return Ok(sense(
                sense_key::ILLEGAL_REQUEST,
                asc::PARAMETER_LIST_LENGTH_ERROR,
            ));
        }
        let bd_len = if ten {
            get_be16(&buf, 6) as usize
        } else {
            buf[3] as usize
        };
        let mut off = header_len + bd_len;
        if off > buf.len() {
            return Ok(sense(
                sense_key::ILLEGAL_REQUEST,
                asc::PARAMETER_LIST_LENGTH_ERROR,
            ));
        }

        while off < buf.len() {
            let page = buf[off] & 0x3F;
            let spf = buf[off] & 0x40 != 0;
            let (data_off, page_len) = if spf {
                if off + 4 > buf.len() {
                    return Ok(sense(
                        sense_key::ILLEGAL_REQUEST,
                        asc::PARAMETER_LIST_LENGTH_ERROR,
                    ));
                }
                (off + 4, get_be16(&buf, off + 2) as usize)
            } else {
                if off + 2 > buf.len() {
                    return Ok(sense(
                        sense_key::ILLEGAL_REQUEST,
                        asc::PARAMETER_LIST_LENGTH_ERROR,
                    ));
                }
                (off + 2, buf[off + 1] as usize)
            };
            if data_off + page_len > buf.len() {
                return Ok(sense(
                    sense_key::ILLEGAL_REQUEST,
                    asc::PARAMETER_LIST_LENGTH_ERROR,
                ));
            }

            match (page, spf) {
                (PAGE_RW_RECOVERY, false) | (PAGE_CACHING, false) | (PAGE_CONTROL, false) => {
                    // nothing changeable on these pages
                }
                (PAGE_ZD_CONTROL, true)
                    if self.is_zone_domains() && buf[off + 1] == SUBPAGE_ZD_CONTROL =>
                {
                    if let Some(out) = self.apply_zd_control(&buf[off..data_off + page_len]) {
                        return Ok(out);
                    }
                }
                _ => {
                    return Ok(sense(
                        sense_key::ILLEGAL_REQUEST,
                        asc::INVALID_FIELD_IN_PARAMETER_LIST,
                    ))
                }
            }
            off = data_off + page_len;
        }
        Ok(CmdOutput::ok())
    }

    /// Apply the ZD control subpage; `Some(output)` short-circuits with an
    /// error, `None` means applied.
    fn apply_zd_control(&mut self, page: &[u8]) -> Option<CmdOutput> {
        if page.len() < 20 {
            return Some(sense(
                sense_key::ILLEGAL_REQUEST,
                asc::PARAMETER_LIST_LENGTH_ERROR,
            ));
        }
        let fsnoz = get_be32(page, 4);
        let urswrz = page[10];
        let maxact = get_be16(page, 16) as u32;
        let reject = sense(
            sense_key::ILLEGAL_REQUEST,
            asc::INVALID_FIELD_IN_PARAMETER_LIST,
        );

        let hdr = self.store.header();
        if fsnoz != hdr.fsnoz && !self.profile.mutable_fsnoz {
            return Some(reject);
        }
        if urswrz != hdr.urswrz && !self.profile.mutable_urswrz {
            return Some(reject);
        }
        if urswrz > 1 {
            return Some(reject);
        }
        if maxact != hdr.max_activation.min(u16::MAX as u32)
            && !self.profile.mutable_max_activation
        {
            return Some(reject);
        }

        let hdr = self.store.header_mut();
        hdr.fsnoz = fsnoz;
        hdr.urswrz = urswrz;
        hdr.max_activation = maxact;
        None
    }
}
