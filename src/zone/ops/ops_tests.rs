use super::*;
use crate::config::DeviceConfig;
use crate::meta::format::{derive_geometry, format_device, Geometry};
use crate::meta::MetaStore;
use crate::profile::profile_for;
use tempfile::TempDir;

// ZONE_DOM with 64 KiB zones: conv domain 0..48, gap 48, seq domain 49..113
fn device(max_open: u32) -> (MetaStore, Geometry, TempDir) {
    let dir = TempDir::new().unwrap();
    let cfg = DeviceConfig::parse(&format!(
        "dhsmr/type-ZONE_DOM/zsize-64K/rsize-256K/sgain-1.25/open-{max_open}@{}",
        dir.path().join("dev.img").display()
    ))
    .unwrap();
    let profile = profile_for(cfg.model);
    let geo = derive_geometry(&cfg, profile, 16 * 256 * 1024).unwrap();
    let (mut store, _) = MetaStore::open_or_create(&cfg.path, geo.region, geo.file_size).unwrap();
    format_device(&mut store, &geo, &cfg, profile).unwrap();
    (store, geo, dir)
}

fn seq_zone(geo: &Geometry, n: u32) -> u32 {
    geo.domains[1].start_zone + n
}

#[test]
fn explicit_open_close_cycle() {
    let (mut s, geo, _d) = device(8);
    let zi = seq_zone(&geo, 0);
    let lba = s.zone(zi).start;

    s.zone_op_range(ZoneMgmtOp::Open, lba, 1).unwrap();
    assert_eq!(s.zone(zi).condition(), ZoneCond::ExpOpen);
    assert_eq!(s.header().counts.exp_open, 1);
    assert_eq!(s.list(ListId::ExpOpen).size, 1);
    // left the seq-active list
    assert_eq!(s.list(ListId::SeqActive).size as u32, geo.nr_seq_zones - 1);

    // close with wp at start goes back to empty
    s.zone_op_range(ZoneMgmtOp::Close, lba, 1).unwrap();
    assert_eq!(s.zone(zi).condition(), ZoneCond::Empty);
    assert_eq!(s.zone(zi).wp, s.zone(zi).start);
    assert_eq!(s.list(ListId::SeqActive).size as u32, geo.nr_seq_zones);
}

#[test]
fn close_after_write_goes_closed() {
    let (mut s, geo, _d) = device(8);
    let zi = seq_zone(&geo, 1);
    let lba = s.zone(zi).start;

    s.implicit_open(zi).unwrap();
    s.advance_wp(zi, lba, 16);
    s.zone_op_range(ZoneMgmtOp::Close, lba, 1).unwrap();
    assert_eq!(s.zone(zi).condition(), ZoneCond::Closed);
    assert_eq!(s.zone(zi).wp, lba + 16);
    assert_eq!(s.list(ListId::Closed).size, 1);
}

#[test]
fn finish_sets_wp_to_end() {
    let (mut s, geo, _d) = device(8);
    let zi = seq_zone(&geo, 2);
    let lba = s.zone(zi).start;
    s.zone_op_range(ZoneMgmtOp::Finish, lba, 1).unwrap();
    let z = s.zone(zi);
    assert_eq!(z.condition(), ZoneCond::Full);
    assert_eq!(z.wp, z.start + z.len);
    // full zones go back into the seq-active list
    assert!(s
        .list_collect(ListId::SeqActive)
        .contains(&zi));
}

#[test]
fn reset_counts_zones_emptied() {
    let (mut s, geo, _d) = device(8);
    let zi = seq_zone(&geo, 3);
    let lba = s.zone(zi).start;
    s.implicit_open(zi).unwrap();
    s.advance_wp(zi, lba, 8);
    s.zone_op_range(ZoneMgmtOp::Reset, lba, 1).unwrap();
    let z = s.zone(zi);
    assert_eq!(z.condition(), ZoneCond::Empty);
    assert_eq!(z.wp, z.start);
    assert_eq!(s.header().stats.zones_emptied, 1);
}

#[test]
fn wp_advance_to_full() {
    let (mut s, geo, _d) = device(8);
    let zi = seq_zone(&geo, 0);
    let start = s.zone(zi).start;
    let len = s.zone(zi).len;

    s.implicit_open(zi).unwrap();
    s.advance_wp(zi, start, len - 8);
    assert_eq!(s.zone(zi).condition(), ZoneCond::ImpOpen);
    s.advance_wp(zi, start + len - 8, 8);
    let z = s.zone(zi);
    assert_eq!(z.condition(), ZoneCond::Full);
    assert_eq!(z.wp, start + len);
    assert_eq!(s.header().counts.imp_open, 0);
    assert_eq!(s.header().counts.full, 1);
}

#[test]
fn implicit_open_evicts_oldest() {
    let (mut s, geo, _d) = device(2);
    let z0 = seq_zone(&geo, 0);
    let z1 = seq_zone(&geo, 1);
    let z2 = seq_zone(&geo, 2);

    for &zi in &[z0, z1] {
        s.implicit_open(zi).unwrap();
        let start = s.zone(zi).start;
        s.advance_wp(zi, start, 4);
    }
    assert_eq!(s.header().counts.imp_open, 2);

    // third implicit open evicts z0, the head of the list
    s.implicit_open(z2).unwrap();
    assert_eq!(s.zone(z0).condition(), ZoneCond::Closed);
    assert_eq!(s.zone(z2).condition(), ZoneCond::ImpOpen);
    assert_eq!(s.header().counts.nr_open(), 2);
}

#[test]
fn implicit_open_fails_when_all_explicit() {
    let (mut s, geo, _d) = device(2);
    for n in 0..2 {
        let lba = s.zone(seq_zone(&geo, n)).start;
        s.zone_op_range(ZoneMgmtOp::Open, lba, 1).unwrap();
    }
    let err = s.implicit_open(seq_zone(&geo, 2)).unwrap_err();
    assert_eq!(err, ZoneOpError::InsufficientResources);
    assert_eq!(s.header().stats.write_rule_fails, 1);
}

#[test]
fn explicit_open_resource_cap() {
    let (mut s, geo, _d) = device(2);
    for n in 0..2 {
        let lba = s.zone(seq_zone(&geo, n)).start;
        s.zone_op_range(ZoneMgmtOp::Open, lba, 1).unwrap();
    }
    let lba = s.zone(seq_zone(&geo, 2)).start;
    let err = s.zone_op_range(ZoneMgmtOp::Open, lba, 1).unwrap_err();
    assert_eq!(err, ZoneOpError::InsufficientResources);
    assert_eq!(s.header().stats.failed_exp_opens, 1);
    assert_eq!(s.zone(seq_zone(&geo, 2)).condition(), ZoneCond::Empty);
}

#[test]
fn open_all_fails_atomically() {
    let (mut s, geo, _d) = device(4);
    // three explicitly open zones
    for n in 0..3 {
        let lba = s.zone(seq_zone(&geo, n)).start;
        s.zone_op_range(ZoneMgmtOp::Open, lba, 1).unwrap();
    }
    // six closed zones
    for n in 3..9 {
        let zi = seq_zone(&geo, n);
        let lba = s.zone(zi).start;
        s.implicit_open(zi).unwrap();
        s.advance_wp(zi, lba, 1);
        s.zone_op_range(ZoneMgmtOp::Close, lba, 1).unwrap();
    }
    assert_eq!(s.header().counts.closed, 6);

    let before = s.header().stats.failed_exp_opens;
    let err = s.zone_op_all(ZoneMgmtOp::Open).unwrap_err();
    assert_eq!(err, ZoneOpError::InsufficientResources);
    assert_eq!(s.header().stats.failed_exp_opens, before + 1);
    // nothing transitioned
    assert_eq!(s.header().counts.closed, 6);
    assert_eq!(s.header().counts.exp_open, 3);
}

#[test]
fn close_all_and_finish_all() {
    let (mut s, geo, _d) = device(8);
    for n in 0..3 {
        let zi = seq_zone(&geo, n);
        let lba = s.zone(zi).start;
        s.implicit_open(zi).unwrap();
        s.advance_wp(zi, lba, 4);
    }
    s.zone_op_all(ZoneMgmtOp::Close).unwrap();
    assert_eq!(s.header().counts.nr_open(), 0);
    assert_eq!(s.header().counts.closed, 3);

    s.zone_op_all(ZoneMgmtOp::Finish).unwrap();
    assert_eq!(s.header().counts.closed, 0);
    assert_eq!(s.header().counts.full, 3);

    s.zone_op_all(ZoneMgmtOp::Reset).unwrap();
    assert_eq!(s.header().counts.full, 0);
    assert_eq!(s.header().counts.empty as u32, geo.nr_seq_zones);
}

#[test]
fn range_rejects_unaligned_and_cross_domain() {
    let (mut s, geo, _d) = device(8);
    let lba = s.zone(seq_zone(&geo, 0)).start;
    assert_eq!(
        s.zone_op_range(ZoneMgmtOp::Open, lba + 1, 1).unwrap_err(),
        ZoneOpError::InvalidField
    );
    // range reaching past the end of the seq domain
    let last = seq_zone(&geo, geo.domains[1].nr_zones - 1);
    let last_lba = s.zone(last).start;
    assert_eq!(
        s.zone_op_range(ZoneMgmtOp::Finish, last_lba, 2).unwrap_err(),
        ZoneOpError::OutOfRange
    );
    // conventional zones are not valid zone-op targets
    assert_eq!(
        s.zone_op_range(ZoneMgmtOp::Open, 0, 1).unwrap_err(),
        ZoneOpError::InvalidField
    );
    assert_eq!(
        s.zone_op_range(ZoneMgmtOp::Open, geo.logical_capacity, 1)
            .unwrap_err(),
        ZoneOpError::OutOfRange
    );
}

#[test]
fn range_is_not_transactional() {
    let (mut s, geo, _d) = device(8);
    // realm 1's zones: make the second zone of the range inactive by hand
    let z0 = seq_zone(&geo, 4);
    let z1 = seq_zone(&geo, 5);
    s.change_cond(z1, ZoneCond::Inactive);
    s.zone_mut(z1).wp = crate::zone::NO_WP;

    let lba = s.zone(z0).start;
    let err = s.zone_op_range(ZoneMgmtOp::Finish, lba, 2).unwrap_err();
    assert_eq!(err, ZoneOpError::Inactive);
    // the first zone of the range kept its new state
    assert_eq!(s.zone(z0).condition(), ZoneCond::Full);
}

#[test]
fn sequentialize_only_on_seq_preferred() {
    let (mut s, geo, _d) = device(8);
    let zi = seq_zone(&geo, 0);
    let lba = s.zone(zi).start;
    assert_eq!(
        s.zone_op_range(ZoneMgmtOp::Sequentialize, lba, 1)
            .unwrap_err(),
        ZoneOpError::InvalidField
    );
}

#[test]
fn non_seq_watermark_tracks_current() {
    let (mut s, geo, _d) = device(8);
    let z0 = seq_zone(&geo, 0);
    let z1 = seq_zone(&geo, 1);
    s.set_non_seq(z0, true);
    s.set_non_seq(z1, true);
    s.set_non_seq(z0, false);
    let stats = s.header().stats;
    assert_eq!(stats.nr_non_seq, 1);
    assert_eq!(stats.max_non_seq, 2);
}
