//! Shared test infrastructure: miniature devices on temp files and CDB
//! builders for the commands the scenarios exercise.
#![allow(dead_code)] // each test binary uses a different helper subset

use std::io::Cursor;

use tempfile::TempDir;

use zdtarget::scsi::bytes::{put_be16, put_be24, put_be32, put_be48, put_be64};
use zdtarget::scsi::{opcode, zbc_in_sa, zbc_out_sa, CmdOutput, Request};
use zdtarget::{DeviceConfig, ZdDevice};

/// 512-byte LBAs, 64 KiB zones (128 LBAs), 256 KiB realms: 4 SMR zones and
/// (at 125% gain) 3 CMR zones per realm.
pub const ZONE_LBAS: u64 = 128;
pub const LBA_SIZE: usize = 512;
pub const CAP_16_REALMS: u64 = 16 * 256 * 1024;

pub struct TestDevice {
    pub dev: ZdDevice,
    pub dir: TempDir,
    pub cfg_str: String,
}

impl TestDevice {
    /// Build a freshly formatted device; `opts` go between the type and
    /// the standard miniature geometry options.
    pub fn new(type_name: &str, opts: &str, capacity: u64) -> Self {
        let dir = TempDir::new().unwrap();
        let cfg_str = format!(
            "dhsmr/type-{type_name}/{opts}zsize-64K/rsize-256K/sgain-1.25@{}",
            dir.path().join("dev.img").display()
        );
        let cfg = DeviceConfig::parse(&cfg_str).unwrap();
        let dev = ZdDevice::open(cfg, capacity).unwrap();
        Self { dev, dir, cfg_str }
    }

    pub fn zone_dom(opts: &str) -> Self {
        Self::new("ZONE_DOM", opts, CAP_16_REALMS)
    }

    /// Reopen the device with the same config string.
    pub fn reopen(&mut self) -> ZdDevice {
        let cfg = DeviceConfig::parse(&self.cfg_str).unwrap();
        ZdDevice::open(cfg, CAP_16_REALMS).unwrap()
    }

    /// Execute a command with a data-out payload, returning the output and
    /// the data-in bytes.
    pub fn exec(&mut self, cdb: &[u8], data_out: &[u8]) -> (CmdOutput, Vec<u8>) {
        let mut data_in = Vec::new();
        let mut reader = Cursor::new(data_out.to_vec());
        let out = self
            .dev
            .execute(Request {
                cdb,
                data_in: &mut data_in,
                data_out: &mut reader,
            })
            .unwrap();
        (out, data_in)
    }

    /// Execute and expect GOOD status.
    pub fn exec_ok(&mut self, cdb: &[u8], data_out: &[u8]) -> Vec<u8> {
        let (out, data_in) = self.exec(cdb, data_out);
        assert_eq!(
            out.status,
            zdtarget::scsi::status::GOOD,
            "unexpected status; sense {:?}",
            out.sense_data()
        );
        data_in
    }

    /// Execute and expect CHECK CONDITION with the given key and ASC/ASCQ.
    pub fn exec_sense(&mut self, cdb: &[u8], data_out: &[u8], key: u8, asc_ascq: u16) {
        let (out, _) = self.exec(cdb, data_out);
        assert_eq!(out.status, zdtarget::scsi::status::CHECK_CONDITION);
        let sense = out.sense_data().expect("sense data present");
        assert_eq!(sense.key, key, "sense key");
        assert_eq!(
            ((sense.asc as u16) << 8) | sense.ascq as u16,
            asc_ascq,
            "asc/ascq"
        );
    }
}

pub fn cdb_read16(lba: u64, count: u32) -> Vec<u8> {
    let mut c = vec![0u8; 16];
    c[0] = opcode::READ_16;
    put_be64(&mut c, 2, lba);
    put_be32(&mut c, 10, count);
    c
}

pub fn cdb_write16(lba: u64, count: u32) -> Vec<u8> {
    let mut c = vec![0u8; 16];
    c[0] = opcode::WRITE_16;
    put_be64(&mut c, 2, lba);
    put_be32(&mut c, 10, count);
    c
}

pub fn cdb_write10(lba: u32, count: u16) -> Vec<u8> {
    let mut c = vec![0u8; 10];
    c[0] = opcode::WRITE_10;
    put_be32(&mut c, 2, lba);
    put_be16(&mut c, 7, count);
    c
}

pub fn cdb_zone_op(sa: u8, lba: u64, count: u16, all: bool) -> Vec<u8> {
    let mut c = vec![0u8; 16];
    c[0] = opcode::ZBC_OUT;
    c[1] = sa;
    put_be64(&mut c, 2, lba);
    put_be16(&mut c, 12, count);
    if all {
        c[14] = 0x01;
    }
    c
}

pub fn cdb_open_zone(lba: u64) -> Vec<u8> {
    cdb_zone_op(zbc_out_sa::OPEN_ZONE, lba, 1, false)
}

pub fn cdb_close_zone(lba: u64) -> Vec<u8> {
    cdb_zone_op(zbc_out_sa::CLOSE_ZONE, lba, 1, false)
}

pub fn cdb_report_zones(lba: u64, alloc: u32, opt: u8) -> Vec<u8> {
    let mut c = vec![0u8; 16];
    c[0] = opcode::ZBC_IN;
    c[1] = zbc_in_sa::REPORT_ZONES;
    put_be64(&mut c, 2, lba);
    put_be32(&mut c, 10, alloc);
    c[14] = opt & 0x3F;
    c
}

pub fn cdb_report_zone_domains(alloc: u32, opt: u8) -> Vec<u8> {
    let mut c = vec![0u8; 16];
    c[0] = opcode::ZBC_IN;
    c[1] = zbc_in_sa::REPORT_ZONE_DOMAINS;
    put_be32(&mut c, 10, alloc);
    c[14] = opt & 0x3F;
    c
}

pub fn cdb_report_realms(alloc: u32) -> Vec<u8> {
    let mut c = vec![0u8; 16];
    c[0] = opcode::ZBC_IN;
    c[1] = zbc_in_sa::REPORT_REALMS;
    put_be32(&mut c, 10, alloc);
    c
}

pub fn cdb_zone_activate16(
    query: bool,
    lba: u64,
    count: u16,
    domain: u8,
    all: bool,
    alloc: u32,
) -> Vec<u8> {
    let mut c = vec![0u8; 16];
    c[0] = opcode::ZBC_IN;
    c[1] = if query {
        zbc_in_sa::ZONE_QUERY_16
    } else {
        zbc_in_sa::ZONE_ACTIVATE_16
    };
    if all {
        c[1] |= 0x80;
    } else {
        c[1] |= 0x40; // NOZSRC: the CDB carries the count
    }
    put_be48(&mut c, 2, lba);
    put_be16(&mut c, 8, count);
    c[10] = domain & 0x0F;
    put_be24(&mut c, 11, alloc);
    c
}

pub fn cdb_read_capacity16() -> Vec<u8> {
    let mut c = vec![0u8; 16];
    c[0] = opcode::SERVICE_ACTION_IN_16;
    c[1] = 0x10;
    put_be32(&mut c, 10, 32);
    c
}

pub fn cdb_mutate(dev_type: u32, model: u32) -> Vec<u8> {
    let mut c = vec![0u8; 16];
    c[0] = opcode::ZBC_OUT;
    c[1] = zbc_out_sa::MUTATE;
    put_be32(&mut c, 2, dev_type);
    put_be32(&mut c, 6, model);
    c
}

/// A repeating data pattern seeded by the LBA.
pub fn pattern(lba: u64, nr_lbas: usize) -> Vec<u8> {
    let mut data = vec![0u8; nr_lbas * LBA_SIZE];
    for (i, b) in data.iter_mut().enumerate() {
        *b = ((lba as usize + i / LBA_SIZE) as u8) ^ (i as u8);
    }
    data
}
