//! Identification, mode-page and diagnostic command coverage.

mod common;

use common::*;
use zdtarget::scsi::bytes::{get_be16, get_be32, get_be64, put_be16, put_be32};
use zdtarget::scsi::{asc, opcode, sense_key};

fn cdb_inquiry(evpd: bool, page: u8, alloc: u16) -> Vec<u8> {
    let mut c = vec![0u8; 6];
    c[0] = opcode::INQUIRY;
    if evpd {
        c[1] = 0x01;
    }
    c[2] = page;
    put_be16(&mut c, 3, alloc);
    c
}

fn cdb_mode_sense10(page: u8, subpage: u8, pc: u8, alloc: u16) -> Vec<u8> {
    let mut c = vec![0u8; 10];
    c[0] = opcode::MODE_SENSE_10;
    c[1] = 0x08; // DBD
    c[2] = (pc << 6) | page;
    c[3] = subpage;
    put_be16(&mut c, 7, alloc);
    c
}

#[test]
fn standard_inquiry_identity() {
    let mut t = TestDevice::zone_dom("open-8/");
    let data = t.exec_ok(&cdb_inquiry(false, 0, 96), &[]);
    assert_eq!(data[0], 0x00, "ZD devices look like direct-access disks");
    assert_eq!(&data[8..16], b"ZDTARGET");
    assert_eq!(&data[16..32], b"ZONE DOMAINS DEV");

    // host-managed personalities announce device type 0x14
    let mut hm = TestDevice::new("HM_ZONED", "open-8/", CAP_16_REALMS);
    let data = hm.exec_ok(&cdb_inquiry(false, 0, 96), &[]);
    assert_eq!(data[0], 0x14);
}

#[test]
fn vpd_serial_matches_header() {
    let mut t = TestDevice::zone_dom("open-8/");
    let serial = t.dev.store().header().serial_str().to_string();
    let data = t.exec_ok(&cdb_inquiry(true, 0x80, 64), &[]);
    assert_eq!(&data[4..4 + serial.len()], serial.as_bytes());
}

#[test]
fn vpd_b6_reports_zone_domain_caps() {
    let mut t = TestDevice::zone_dom("open-8/");
    let hdr = *t.dev.store().header();
    let data = t.exec_ok(&cdb_inquiry(true, 0xB6, 64), &[]);
    assert_eq!(data[4] & 0x01, 0, "URSWRZ off with wp-check on");
    assert_eq!(data[5] & 0x01, 0x01, "zone domains supported");
    assert_eq!(data[5] & 0x02, 0x02, "realms reported");
    // conventional + sequential-write-required
    assert_eq!(data[10], 0x01 | 0x02);
    assert_eq!(get_be32(&data, 16), hdr.max_open);
}

#[test]
fn vpd_pages_list_is_consistent() {
    let mut t = TestDevice::zone_dom("open-8/");
    let data = t.exec_ok(&cdb_inquiry(true, 0x00, 64), &[]);
    let n = get_be16(&data, 2) as usize;
    let pages = &data[4..4 + n];
    for page in pages {
        let d = t.exec_ok(&cdb_inquiry(true, *page, 255), &[]);
        assert_eq!(d[1], *page);
    }
    // unknown page is rejected
    t.exec_sense(
        &cdb_inquiry(true, 0xC7, 64),
        &[],
        sense_key::ILLEGAL_REQUEST,
        asc::INVALID_FIELD_IN_CDB,
    );
}

#[test]
fn mode_sense_zd_control_page() {
    let mut t = TestDevice::zone_dom("open-8/");
    let hdr = *t.dev.store().header();
    let data = t.exec_ok(&cdb_mode_sense10(0x3D, 0x08, 0, 128), &[]);
    // skip the 8-byte mode parameter header (DBD: no block descriptor)
    let page = &data[8..];
    assert_eq!(page[0], 0x3D | 0x40);
    assert_eq!(page[1], 0x08);
    assert_eq!(get_be32(page, 4), hdr.fsnoz);
    assert_eq!(page[10], hdr.urswrz);
    assert_eq!(get_be16(page, 16) as u32, hdr.max_activation);

    // changeable mask shows all three fields writable on ZONE_DOM
    let data = t.exec_ok(&cdb_mode_sense10(0x3D, 0x08, 1, 128), &[]);
    let page = &data[8..];
    assert_eq!(get_be32(page, 4), u32::MAX);
    assert_eq!(page[10], 0xFF);
    assert_eq!(get_be16(page, 16), u16::MAX);
}

#[test]
fn mode_select_updates_zd_control() {
    let mut t = TestDevice::zone_dom("open-8/");

    // parameter list: 8-byte header + ZD control subpage
    let mut param = vec![0u8; 8 + 20];
    param[8] = 0x3D | 0x40;
    param[9] = 0x08;
    put_be16(&mut param, 10, 16);
    put_be32(&mut param, 12, 6); // FSNOZ
    param[18] = 1; // URSWRZ on
    put_be16(&mut param, 24, 32); // MAX ACTIVATION

    let mut cdb = vec![0u8; 10];
    cdb[0] = opcode::MODE_SELECT_10;
    cdb[1] = 0x10; // PF
    put_be16(&mut cdb, 7, param.len() as u16);
    t.exec_ok(&cdb, &param);

    let hdr = t.dev.store().header();
    assert_eq!(hdr.fsnoz, 6);
    assert_eq!(hdr.urswrz, 1);
    assert_eq!(hdr.max_activation, 32);
}

#[test]
fn mode_select_rejects_unchangeable_fields() {
    // HM profiles cannot change URSWRZ
    let mut t = TestDevice::new("HM_ZONED", "open-8/", CAP_16_REALMS);
    let mut param = vec![0u8; 8 + 20];
    param[8] = 0x3D | 0x40;
    param[9] = 0x08;
    put_be16(&mut param, 10, 16);
    param[18] = 1;

    let mut cdb = vec![0u8; 10];
    cdb[0] = opcode::MODE_SELECT_10;
    cdb[1] = 0x10;
    put_be16(&mut cdb, 7, param.len() as u16);
    // the ZD control page itself is ZD-only: rejected as an unknown page
    t.exec_sense(
        &cdb,
        &param,
        sense_key::ILLEGAL_REQUEST,
        asc::INVALID_FIELD_IN_PARAMETER_LIST,
    );
}

#[test]
fn receive_diagnostics_reports_zbd_stats() {
    let mut t = TestDevice::zone_dom("open-8/");
    // generate some statistics: one open zone and one failed read
    let lba = t
        .dev
        .store()
        .realm(1)
        .item(zdtarget::zone::ZoneType::SeqWriteRequired)
        .start_lba;
    t.exec_ok(&cdb_write16(lba, 4), &pattern(lba, 4));
    let (_, _) = t.exec(&cdb_read16(lba, 64), &[]); // read above WP fails

    let mut cdb = vec![0u8; 6];
    cdb[0] = opcode::RECEIVE_DIAGNOSTIC_RESULTS;
    cdb[1] = 0x01; // PCV
    cdb[2] = 0x14;
    put_be16(&mut cdb, 3, 512);
    let data = t.exec_ok(&cdb, &[]);

    assert_eq!(data[0], 0x14);
    assert_eq!(data[1], 0x01);
    let body = get_be16(&data, 2) as usize;
    assert_eq!(body, 11 * 12, "eleven 8-byte binary parameters");

    // parameter 0x02: max implicitly open zones
    let p2 = &data[4 + 2 * 12..];
    assert_eq!(get_be16(p2, 0), 0x02);
    assert_eq!(p2[3], 8);
    assert_eq!(get_be64(p2, 4), 1);
    // parameter 0x09: read rule violations
    let p9 = &data[4 + 9 * 12..];
    assert_eq!(get_be16(p9, 0), 0x09);
    assert_eq!(get_be64(p9, 4), 1);
}

#[test]
fn request_sense_replays_deferred_sense() {
    let mut t = TestDevice::zone_dom("open-8/");
    let logical = t.dev.store().header().logical_capacity;
    let (_, _) = t.exec(&cdb_read16(logical, 1), &[]);

    let mut cdb = vec![0u8; 6];
    cdb[0] = opcode::REQUEST_SENSE;
    cdb[4] = 32;
    let data = t.exec_ok(&cdb, &[]);
    assert_eq!(data[2] & 0x0F, sense_key::ILLEGAL_REQUEST);
    assert_eq!(data[12], 0x21);
    assert_eq!(data[13], 0x00);

    // queue drained: next REQUEST SENSE reports no sense
    let data = t.exec_ok(&cdb, &[]);
    assert_eq!(data[2] & 0x0F, sense_key::NO_SENSE);
}

#[test]
fn unknown_opcode_bumps_not_handled_counter() {
    let mut t = TestDevice::zone_dom("open-8/");
    let before = t.dev.store().header().stats.nr_nh_cmds;
    let mut cdb = vec![0u8; 6];
    cdb[0] = 0x0B; // obsolete SEEK(6)
    t.exec_sense(
        &cdb,
        &[],
        sense_key::ILLEGAL_REQUEST,
        asc::INVALID_COMMAND_OPERATION_CODE,
    );
    assert_eq!(t.dev.store().header().stats.nr_nh_cmds, before + 1);
}

#[test]
fn test_unit_ready_is_good() {
    let mut t = TestDevice::zone_dom("open-8/");
    let cdb = vec![0u8; 6];
    t.exec_ok(&cdb, &[]);
}
