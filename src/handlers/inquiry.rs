//! INQUIRY: standard data and the VPD pages the host runtime probes.

use std::io::{Read, Write};

use crate::device::ZdDevice;
use crate::profile::DeviceType;
use crate::scsi::bytes::{get_be16, put_be16, put_be32, put_be64};
use crate::scsi::{CmdError, CmdOutput, Request, SilentlyTruncate};

use super::invalid_cdb;

const VENDOR_ID: &[u8; 8] = b"ZDTARGET";
const PRODUCT_ID: &[u8; 16] = b"ZONE DOMAINS DEV";
const REVISION: &[u8; 4] = b"0300";

/// Peripheral device type: host-managed devices announce themselves, the
/// rest look like plain direct-access disks.
fn peripheral(dev_type: DeviceType) -> u8 {
    match dev_type {
        DeviceType::HostManaged => 0x14,
        _ => 0x00,
    }
}

impl ZdDevice {
    pub(super) fn inquiry<W: Write, R: Read>(
        &mut self,
        req: &mut Request<'_, W, R>,
    ) -> Result<CmdOutput, CmdError> {
        let evpd = req.cdb[1] & 0x01 != 0;
        let page = req.cdb[2];
        let alloc = get_be16(req.cdb, 3) as usize;
        let mut out = SilentlyTruncate::new(&mut *req.data_in, alloc);

        if !evpd {
            if page != 0 {
                return Ok(invalid_cdb());
            }
            let data = self.standard_inquiry();
            out.write_all(&data).map_err(CmdError::DataIn)?;
            return Ok(CmdOutput::ok());
        }

        let payload = match page {
            0x00 => Some(self.vpd_supported_pages()),
            0x80 => Some(self.vpd_serial()),
            0x83 => Some(self.vpd_device_id()),
            0xB0 => Some(self.vpd_block_limits()),
            0xB1 => Some(self.vpd_characteristics()),
            0xB6 if self.profile.is_zoned() => Some(self.vpd_zoned()),
            _ => None,
        };
        match payload {
            Some(data) => {
                out.write_all(&data).map_err(CmdError::DataIn)?;
                Ok(CmdOutput::ok())
            }
            None => Ok(invalid_cdb()),
        }
    }

    fn standard_inquiry(&self) -> Vec<u8> {
        let mut d = vec![0u8; 36];
        d[0] = peripheral(self.dev_type());
        d[2] = 0x07; // SPC-5
        d[3] = 0x02;
        d[4] = 31;
        d[8..16].copy_from_slice(VENDOR_ID);
        d[16..32].copy_from_slice(PRODUCT_ID);
        d[32..36].copy_from_slice(REVISION);
        d
    }

    fn vpd_header(&self, page: u8, payload_len: usize) -> Vec<u8> {
        let mut d = vec![0u8; 4 + payload_len];
        d[0] = peripheral(self.dev_type());
        d[1] = page;
        put_be16(&mut d, 2, payload_len as u16);
        d
    }

    fn vpd_supported_pages(&self) -> Vec<u8> {
        let mut pages = vec![0x00u8, 0x80, 0x83, 0xB0, 0xB1];
        if self.profile.is_zoned() {
            pages.push(0xB6);
        }
        let mut d = self.vpd_header(0x00, pages.len());
        d[4..].copy_from_slice(&pages);
        d
    }

    fn vpd_serial(&self) -> Vec<u8> {
        let serial = self.store.header().serial_str().as_bytes().to_vec();
        let mut d = self.vpd_header(0x80, serial.len());
        d[4..].copy_from_slice(&serial);
        d
    }

    fn vpd_device_id(&self) -> Vec<u8> {
        let serial = self.store.header().serial_str().to_string();

        // T10 vendor identification designator
        let ident: Vec<u8> = VENDOR_ID
            .iter()
            .copied()
            .chain(serial.bytes())
            .collect();
        let mut t10 = vec![0x02u8, 0x01, 0x00, ident.len() as u8];
        t10.extend_from_slice(&ident);

        // NAA-5 designator derived from the serial
        let mut naa = vec![0x01u8, 0x03, 0x00, 0x08];
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for b in serial.bytes() {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        let mut id = [0u8; 8];
        put_be64(&mut id, 0, hash);
        id[0] = 0x50 | (id[0] & 0x0F);
        naa.extend_from_slice(&id);

        let mut d = self.vpd_header(0x83, t10.len() + naa.len());
        let off = 4;
        d[off..off + t10.len()].copy_from_slice(&t10);
        d[off + t10.len()..].copy_from_slice(&naa);
        d
    }

    fn vpd_block_limits(&self) -> Vec<u8> {
        let mut d = self.vpd_header(0xB0, 0x3C);
        d[4] = 0x01; // WSNZ: write same needs a non-zero length
        d[5] = 0x01; // maximum compare-and-write length
        put_be16(&mut d, 6, 1); // optimal transfer length granularity
        let zone = self.geometry.zone_size.min(u32::MAX as u64) as u32;
        put_be32(&mut d, 8, zone); // maximum transfer length
        put_be32(&mut d, 12, zone.min(1024)); // optimal transfer length
        put_be64(&mut d, 36, 64); // maximum write same length
        d
    }

    fn vpd_characteristics(&self) -> Vec<u8> {
        let mut d = self.vpd_header(0xB1, 0x3C);
        put_be16(&mut d, 4, 7200); // nominal rotation rate
        let zoned = match self.dev_type() {
            DeviceType::HostAware => 0x01,
            DeviceType::ZoneDomains => 0x02,
            _ => 0x00,
        };
        d[8] = (zoned << 4) | 0x02; // ZONED + FUAB
        if crate::profile::PROFILES.len() > 1 {
            d[9] |= 0x01; // mutation supported
        }
        d
    }

    fn vpd_zoned(&self) -> Vec<u8> {
        let hdr = self.store.header();
        let mut d = self.vpd_header(0xB6, 0x3C);
        d[4] = hdr.urswrz & 0x01;
        let mut caps = 0u8;
        if self.is_zone_domains() {
            caps |= 0x01;
            if hdr.realms_feature != 0 {
                caps |= 0x02;
            }
        }
        d[5] = caps;
        put_be16(&mut d, 8, hdr.optimal_open.min(u16::MAX as u32) as u16);
        // supported zone types
        let mut types = 0u8;
        for dom in &self.geometry.domains {
            types |= dom.ztype.activation_bit();
        }
        d[10] = types;
        put_be32(&mut d, 12, 0); // optimal non-sequentially written zones
        put_be32(&mut d, 16, hdr.max_open);
        put_be16(&mut d, 20, hdr.max_activation.min(u16::MAX as u32) as u16);
        d
    }
}
