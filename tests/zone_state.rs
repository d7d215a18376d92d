//! Zone state-machine scenarios driven through the SCSI surface.

mod common;

use common::*;
use zdtarget::meta::layout::ListId;
use zdtarget::scsi::{asc, sense_key, zbc_out_sa};
use zdtarget::zone::{ZoneCond, ZoneType};

/// First sequential zone of realm `r`.
fn seq_zone_start(dev: &zdtarget::ZdDevice, r: u32) -> u64 {
    dev.store()
        .realm(r)
        .item(ZoneType::SeqWriteRequired)
        .start_lba
}

#[test]
fn empty_to_full_via_sequential_writes() {
    let mut t = TestDevice::zone_dom("open-8/");
    let start = seq_zone_start(&t.dev, 5);
    let zi = (start / ZONE_LBAS) as u32;

    // fill the zone with 8 writes of 16 LBAs each
    for i in 0..8u64 {
        let lba = start + i * 16;
        let cdb = cdb_write16(lba, 16);
        let data = pattern(lba, 16);
        t.exec_ok(&cdb, &data);
    }

    let z = *t.dev.store().zone(zi);
    assert_eq!(z.condition(), ZoneCond::Full);
    assert_eq!(z.wp, z.start + z.len);
    assert!(t
        .dev
        .store()
        .list_collect(ListId::SeqActive)
        .contains(&zi));
}

#[test]
fn unaligned_write_is_rejected() {
    let mut t = TestDevice::zone_dom("open-8/");
    let start = seq_zone_start(&t.dev, 5);
    let cdb = cdb_write16(start + 16, 8);
    let data = pattern(start + 16, 8);
    t.exec_sense(
        &cdb,
        &data,
        sense_key::ILLEGAL_REQUEST,
        asc::UNALIGNED_WRITE_COMMAND,
    );
    // and the zone stayed empty
    let zi = (start / ZONE_LBAS) as u32;
    assert_eq!(t.dev.store().zone(zi).condition(), ZoneCond::Empty);
}

#[test]
fn open_all_respects_the_resource_cap() {
    let mut t = TestDevice::zone_dom("open-4/");

    // explicitly open three zones
    for r in 0..3 {
        let lba = seq_zone_start(&t.dev, r);
        t.exec_ok(&cdb_open_zone(lba), &[]);
    }
    // move six more zones to closed: write one LBA, then CLOSE
    for n in 0..6 {
        let lba = seq_zone_start(&t.dev, 3) + n as u64 * ZONE_LBAS;
        t.exec_ok(&cdb_write16(lba, 1), &pattern(lba, 1));
        t.exec_ok(&cdb_close_zone(lba), &[]);
    }
    let counts = t.dev.store().header().counts;
    assert_eq!(counts.exp_open, 3);
    assert_eq!(counts.closed, 6);

    let failed_before = t.dev.store().header().stats.failed_exp_opens;
    let cdb = cdb_zone_op(zbc_out_sa::OPEN_ZONE, 0, 0, true);
    t.exec_sense(
        &cdb,
        &[],
        sense_key::DATA_PROTECT,
        asc::INSUFFICIENT_ZONE_RESOURCES,
    );

    let hdr = t.dev.store().header();
    assert_eq!(hdr.stats.failed_exp_opens, failed_before + 1);
    // nothing transitioned
    assert_eq!(hdr.counts.exp_open, 3);
    assert_eq!(hdr.counts.closed, 6);
}

#[test]
fn report_zones_reflects_zone_ops() {
    let mut t = TestDevice::zone_dom("open-8/");
    let lba = seq_zone_start(&t.dev, 2);

    t.exec_ok(&cdb_open_zone(lba), &[]);
    let data = t.exec_ok(&cdb_report_zones(lba, 64 + 64, 0), &[]);
    // one descriptor: our zone, explicitly open
    assert_eq!(data[64] & 0x0F, ZoneType::SeqWriteRequired.wire());
    assert_eq!(data[64 + 1] >> 4, ZoneCond::ExpOpen.wire());

    // FINISH the zone and observe the new condition
    t.exec_ok(&cdb_zone_op(zbc_out_sa::FINISH_ZONE, lba, 1, false), &[]);
    let data = t.exec_ok(&cdb_report_zones(lba, 64 + 64, 0), &[]);
    assert_eq!(data[64 + 1] >> 4, ZoneCond::Full.wire());

    // RESET brings it back to empty
    t.exec_ok(
        &cdb_zone_op(zbc_out_sa::RESET_WRITE_POINTER, lba, 1, false),
        &[],
    );
    let data = t.exec_ok(&cdb_report_zones(lba, 64 + 64, 0), &[]);
    assert_eq!(data[64 + 1] >> 4, ZoneCond::Empty.wire());
}

#[test]
fn report_zones_filters_by_condition() {
    let mut t = TestDevice::zone_dom("open-8/");
    let lba = seq_zone_start(&t.dev, 1);
    t.exec_ok(&cdb_open_zone(lba), &[]);

    // filter: explicitly open zones only
    let data = t.exec_ok(&cdb_report_zones(0, 64 + 10 * 64, 0x03), &[]);
    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    assert_eq!(len, 64, "exactly one matching zone");
    let start = u64::from_be_bytes(data[80..88].try_into().unwrap());
    assert_eq!(start, lba);
}

#[test]
fn write_pointer_checked_across_close_reopen() {
    let mut t = TestDevice::zone_dom("open-8/");
    let lba = seq_zone_start(&t.dev, 4);

    t.exec_ok(&cdb_write16(lba, 32), &pattern(lba, 32));
    t.exec_ok(&cdb_close_zone(lba), &[]);
    let zi = (lba / ZONE_LBAS) as u32;
    assert_eq!(t.dev.store().zone(zi).condition(), ZoneCond::Closed);

    // writing at the WP implicitly reopens the closed zone
    t.exec_ok(&cdb_write16(lba + 32, 8), &pattern(lba + 32, 8));
    assert_eq!(t.dev.store().zone(zi).condition(), ZoneCond::ImpOpen);
    assert_eq!(t.dev.store().zone(zi).wp, lba + 40);

    // writing anywhere else is unaligned
    t.exec_sense(
        &cdb_write16(lba, 8),
        &pattern(lba, 8),
        sense_key::ILLEGAL_REQUEST,
        asc::UNALIGNED_WRITE_COMMAND,
    );
}

#[test]
fn sequentialize_clears_non_seq_on_preferred_zones() {
    let mut t = TestDevice::new("ZD_SOBR_SWP", "open-8/", CAP_16_REALMS);
    // the SWP domain is the second one
    let dom = t.dev.store().header().domains[1];
    let lba = dom.start_lba;
    let zi = (lba / ZONE_LBAS) as u32;

    // out-of-order write sets the non-seq attribute
    t.exec_ok(&cdb_write16(lba, 4), &pattern(lba, 4));
    t.exec_ok(&cdb_write16(lba + 32, 4), &pattern(lba + 32, 4));
    assert_ne!(t.dev.store().zone(zi).flags & 0x01, 0);

    t.exec_ok(
        &cdb_zone_op(zbc_out_sa::SEQUENTIALIZE_ZONE, lba, 1, false),
        &[],
    );
    assert_eq!(t.dev.store().zone(zi).flags & 0x01, 0);
}
