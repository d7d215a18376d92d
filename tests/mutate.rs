//! Personality mutation scenarios: MUTATE over the SCSI surface, capacity
//! changes, and format idempotence.

mod common;

use common::*;
use zdtarget::scsi::bytes::{get_be32, get_be64};
use zdtarget::scsi::{asc, sense_key, zbc_in_sa};
use zdtarget::zone::ZoneType;
use zdtarget::{DeviceModel, DeviceType};

fn wire(t: DeviceType, m: DeviceModel) -> (u32, u32) {
    (t.wire(), m.wire())
}

#[test]
fn mutate_roundtrip_over_scsi() {
    let mut t = TestDevice::zone_dom("open-8/");
    let phys = t.dev.store().header().phys_capacity;
    let zones_before = t.dev.geometry().nr_zones;

    // leave a trace in the data region
    let lba = t
        .dev
        .store()
        .realm(1)
        .item(ZoneType::SeqWriteRequired)
        .start_lba;
    t.exec_ok(&cdb_write16(lba, 4), &pattern(lba, 4));

    // ZONE_DOM -> NON_ZONED
    let (dt, dm) = wire(DeviceType::NonZoned, DeviceModel::Generic);
    t.exec_ok(&cdb_mutate(dt, dm), &[]);
    assert_eq!(t.dev.dev_type(), DeviceType::NonZoned);
    let cap = t.exec_ok(&cdb_read_capacity16(), &[]);
    assert_eq!(get_be64(&cap, 0), phys - 1);

    // NON_ZONED -> ZD without CMR
    let (dt, dm) = wire(DeviceType::ZoneDomains, DeviceModel::ZdNoCmr);
    t.exec_ok(&cdb_mutate(dt, dm), &[]);
    assert_eq!(t.dev.config().model, DeviceModel::ZdNoCmr);
    assert_eq!(t.dev.geometry().domains.len(), 1);

    // back to ZONE_DOM: the zone table is re-initialized
    let (dt, dm) = wire(DeviceType::ZoneDomains, DeviceModel::ZoneDom);
    t.exec_ok(&cdb_mutate(dt, dm), &[]);
    assert_eq!(t.dev.geometry().nr_zones, zones_before);
    let zi = (lba / ZONE_LBAS) as u32;
    assert_eq!(
        t.dev.store().zone(zi).condition(),
        zdtarget::zone::ZoneCond::Empty,
        "prior write pointer state is gone"
    );
}

#[test]
fn mutate_rejects_unknown_personality() {
    let mut t = TestDevice::zone_dom("open-8/");
    t.exec_sense(
        &cdb_mutate(3, 999),
        &[],
        sense_key::ILLEGAL_REQUEST,
        asc::INVALID_FIELD_IN_CDB,
    );
    // mismatched type/model pair
    t.exec_sense(
        &cdb_mutate(
            DeviceType::NonZoned.wire(),
            DeviceModel::ZoneDom.wire(),
        ),
        &[],
        sense_key::ILLEGAL_REQUEST,
        asc::INVALID_FIELD_IN_CDB,
    );
}

#[test]
fn report_mutations_lists_every_personality() {
    let mut t = TestDevice::zone_dom("open-8/");
    let mut cdb = vec![0u8; 16];
    cdb[0] = zdtarget::scsi::opcode::ZBC_IN;
    cdb[1] = zbc_in_sa::REPORT_MUTATIONS;
    zdtarget::scsi::bytes::put_be32(&mut cdb, 10, 4096);
    let data = t.exec_ok(&cdb, &[]);

    let count = get_be32(&data, 4) as usize;
    assert_eq!(count, zdtarget::profile::PROFILES.len());
    // the current personality is one of the listed pairs
    let mut found = false;
    for i in 0..count {
        let off = 8 + i * 8;
        let dt = get_be32(&data, off);
        let dm = get_be32(&data, off + 4);
        if dt == DeviceType::ZoneDomains.wire() && dm == DeviceModel::ZoneDom.wire() {
            found = true;
        }
    }
    assert!(found);
}

#[test]
fn format_is_idempotent_across_reopen() {
    let mut t = TestDevice::zone_dom("open-8/");
    assert!(t.dev.reformatted, "first open formats");
    let serial = t.dev.store().header().serial_str().to_string();

    let reopened = t.reopen();
    assert!(!reopened.reformatted, "second open validates cleanly");
    assert_eq!(reopened.store().header().serial_str(), serial);
}

#[test]
fn mutation_survives_reopen_with_matching_config() {
    let mut t = TestDevice::zone_dom("open-8/");
    let (dt, dm) = wire(DeviceType::HostManaged, DeviceModel::HmZoned);
    t.exec_ok(&cdb_mutate(dt, dm), &[]);

    // the persisted config string was rewritten for the new personality
    let cfg_str = t.dev.store().header().config_str().to_string();
    assert!(cfg_str.contains("type-HM_ZONED"));
    let cfg = zdtarget::DeviceConfig::parse(&cfg_str).unwrap();
    let dev = zdtarget::ZdDevice::open(cfg, CAP_16_REALMS).unwrap();
    assert!(!dev.reformatted, "mutated metadata validates under its own config");
    assert_eq!(dev.config().model, DeviceModel::HmZoned);
}

#[test]
fn sanitize_crypto_erase_reformats() {
    let mut t = TestDevice::zone_dom("open-8/");
    let lba = t
        .dev
        .store()
        .realm(2)
        .item(ZoneType::SeqWriteRequired)
        .start_lba;
    t.exec_ok(&cdb_write16(lba, 8), &pattern(lba, 8));

    let mut cdb = vec![0u8; 10];
    cdb[0] = zdtarget::scsi::opcode::SANITIZE;
    cdb[1] = 0x03; // cryptographic erase
    t.exec_ok(&cdb, &[]);

    let zi = (lba / ZONE_LBAS) as u32;
    assert_eq!(
        t.dev.store().zone(zi).condition(),
        zdtarget::zone::ZoneCond::Empty
    );

    // ZNR must be zero
    cdb[1] = 0x43;
    t.exec_sense(
        &cdb,
        &[],
        sense_key::ILLEGAL_REQUEST,
        asc::INVALID_FIELD_IN_CDB,
    );
    // overwrite sanitize is not supported
    cdb[1] = 0x01;
    t.exec_sense(
        &cdb,
        &[],
        sense_key::ILLEGAL_REQUEST,
        asc::INVALID_FIELD_IN_CDB,
    );
}

#[test]
fn format_unit_resets_zone_state() {
    let mut t = TestDevice::zone_dom("open-8/");
    let lba = t
        .dev
        .store()
        .realm(3)
        .item(ZoneType::SeqWriteRequired)
        .start_lba;
    t.exec_ok(&cdb_write16(lba, 8), &pattern(lba, 8));
    assert_eq!(t.dev.store().header().counts.imp_open, 1);

    let mut cdb = vec![0u8; 6];
    cdb[0] = zdtarget::scsi::opcode::FORMAT_UNIT;
    t.exec_ok(&cdb, &[]);
    assert_eq!(t.dev.store().header().counts.imp_open, 0);
}
