//! Realm activation engine (C8).
//!
//! ZONE ACTIVATE moves whole realms to the zone type of a target domain:
//! the CDB names the to-be-activated zone range inside that domain, and
//! each overlapped realm inactivates its currently-active subrange as the
//! named one comes alive. ZONE QUERY runs the same validation and
//! reporting without mutating. Precondition failures are not sense errors
//! — they set named bits in the result header, along with the zone ID
//! with unmet prerequisites (ZIWUP).

use tracing::debug;

use crate::meta::MetaStore;
use crate::zone::ops::ZoneOpError;
use crate::zone::{ZoneCond, ZoneType, NO_WP};

/// Error bits in the activation result header.
pub mod act_err {
    pub const NOT_INACTIVE: u8 = 0x01;
    pub const NOT_EMPTY: u8 = 0x02;
    pub const REALM_ALIGN: u8 = 0x04;
    pub const MULTI_TYPES: u8 = 0x08;
    pub const UNSUPP: u8 = 0x10;
    pub const MULTI_DOMAINS: u8 = 0x20;
}

/// Status bits in the activation result header.
pub mod act_status {
    pub const ACTIVATED: u8 = 0x01;
    pub const ZIWUP_VALID: u8 = 0x40;
    pub const NZP_VALID: u8 = 0x80;
}

/// Inputs to one ZONE ACTIVATE / ZONE QUERY invocation, after CDB decode
/// and FSNOZ resolution.
#[derive(Debug, Clone, Copy)]
pub struct ActivationArgs {
    /// First LBA of the to-be-activated range (inside the target domain).
    pub start_lba: u64,
    /// Zone count in the target domain's flavor.
    pub nr_zones: u32,
    /// Domain whose type the realms activate to.
    pub domain_id: u32,
    pub all: bool,
    /// Dry-run: validate and report, never mutate.
    pub query: bool,
}

/// One 24-byte activation-result descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActDescriptor {
    pub ztype: ZoneType,
    pub cond: ZoneCond,
    pub domain_id: u32,
    pub nr_zones: u32,
    pub start_lba: u64,
}

/// Decoded activation outcome; the handler marshals it into the wire
/// header + descriptor list.
#[derive(Debug, Default)]
pub struct ActivationResult {
    pub status_bits: u8,
    pub error_bits: u8,
    pub ziwup: u64,
    pub nr_realms_activated: u32,
    pub nr_zones_activated: u32,
    pub descriptors: Vec<ActDescriptor>,
}

impl ActivationResult {
    fn fail(mut self, bit: u8) -> Self {
        self.error_bits |= bit;
        self
    }

    fn fail_zone(mut self, bit: u8, ziwup: u64) -> Self {
        self.error_bits |= bit;
        self.status_bits |= act_status::ZIWUP_VALID;
        self.ziwup = ziwup;
        self
    }
}

impl MetaStore {
    /// Run one activation (or query). CDB-shape problems surface as
    /// `ZoneOpError` (sense); realm preconditions surface in the result.
    pub fn zone_activate(&mut self, args: ActivationArgs) -> Result<ActivationResult, ZoneOpError> {
        let hdr = self.header();
        let zone_size = hdr.zone_size;
        let shift = hdr.zone_shift;
        let nr_zones_total = hdr.nr_zones;
        let max_activation = hdr.max_activation;
        let nr_realms = hdr.nr_realms;

        let mut res = ActivationResult::default();
        if !args.all {
            res.status_bits |= act_status::NZP_VALID;
        }

        let Some(target) = self.domain_by_id(args.domain_id) else {
            return Ok(res.fail(act_err::UNSUPP));
        };
        let Some(new_type) = target.zone_type() else {
            return Ok(res.fail(act_err::UNSUPP));
        };

        if !args.all {
            if args.nr_zones == 0 || args.nr_zones > nr_zones_total {
                return Err(ZoneOpError::InvalidField);
            }
            if max_activation > 0 && args.nr_zones > max_activation {
                return Err(ZoneOpError::InvalidField);
            }
        }

        // resolve the covered realm range
        let realms: Vec<u32> = if args.all {
            (0..nr_realms).collect()
        } else {
            if args.start_lba % zone_size != 0 {
                return Ok(res.fail(act_err::REALM_ALIGN));
            }
            match self.domain_of_lba(args.start_lba) {
                Some((id, _)) if id == args.domain_id => {}
                Some(_) => return Ok(res.fail(act_err::MULTI_DOMAINS)),
                None => return Ok(res.fail(act_err::REALM_ALIGN)),
            }
            let r0 = match self.realm_of_lba(args.start_lba, true) {
                Ok(r) => r,
                Err(_) => return Ok(res.fail(act_err::REALM_ALIGN)),
            };
            let end_lba = args.start_lba + ((args.nr_zones as u64) << shift) - 1;
            if end_lba > target.end_lba {
                return Ok(res.fail(act_err::MULTI_DOMAINS));
            }
            let last_zone_start = end_lba & !(zone_size - 1);
            let r_last = match self.realm_of_lba(last_zone_start, false) {
                Ok(r) => r,
                Err(_) => return Ok(res.fail(act_err::REALM_ALIGN)),
            };
            // a single range never deactivates a mix of current types
            let mut kinds: Vec<u8> = (r0..=r_last)
                .map(|r| self.realm(r).current_type)
                .collect();
            kinds.dedup();
            if kinds.len() > 1 {
                return Ok(res.fail(act_err::MULTI_TYPES));
            }
            (r0..=r_last).collect()
        };

        // validate every covered realm before mutating anything
        let mut switching: Vec<u32> = Vec::new();
        let mut skipped: Vec<u32> = Vec::new();
        for &r in &realms {
            let realm = *self.realm(r);
            let current = realm.current();
            let target_item = *realm.item(new_type);
            let switch = current != Some(new_type);

            if target_item.length == 0 || (switch && !realm.may_activate(new_type)) {
                if args.all {
                    skipped.push(r);
                    continue;
                }
                return Ok(res.fail(act_err::UNSUPP));
            }
            if switch {
                if let Some(cur) = current {
                    if forbidden_transition(cur, new_type) {
                        return Ok(res.fail(act_err::UNSUPP));
                    }
                    // deactivation side must be quiescent
                    let item = *realm.item(cur);
                    for j in 0..item.length {
                        let z = self.zone(item.start_zone + j);
                        let ok = match z.condition() {
                            ZoneCond::Empty | ZoneCond::Inactive => true,
                            ZoneCond::NotWp => !args.all,
                            _ => false,
                        };
                        if !ok {
                            return Ok(res.fail_zone(act_err::NOT_EMPTY, z.start));
                        }
                    }
                }
            }
            // activation side: inactive (or empty / conventional no-ops)
            for j in 0..target_item.length {
                let z = self.zone(target_item.start_zone + j);
                let ok = matches!(
                    z.condition(),
                    ZoneCond::Inactive | ZoneCond::NotWp | ZoneCond::Empty
                );
                if !ok {
                    return Ok(res.fail_zone(act_err::NOT_INACTIVE, z.start));
                }
            }
            if switch {
                switching.push(r);
            }
        }

        // report + mutate
        for &r in &realms {
            if skipped.contains(&r) {
                continue;
            }
            let realm = *self.realm(r);
            let current = realm.current();
            let target_item = *realm.item(new_type);
            let new_cond = initial_active_cond(new_type);

            if !switching.contains(&r) {
                // no-op realm: both descriptors describe the unchanged item
                let desc = ActDescriptor {
                    ztype: new_type,
                    cond: new_cond,
                    domain_id: args.domain_id,
                    nr_zones: target_item.length,
                    start_lba: target_item.start_lba,
                };
                res.descriptors.push(desc);
                res.descriptors.push(desc);
                continue;
            }

            let cur = current.unwrap_or(new_type);
            let cur_item = *realm.item(cur);
            let src_dom = self
                .domain_of_type(cur)
                .map(|(i, _)| i)
                .unwrap_or(args.domain_id);

            let deact = ActDescriptor {
                ztype: cur,
                cond: ZoneCond::Inactive,
                domain_id: src_dom,
                nr_zones: cur_item.length,
                start_lba: cur_item.start_lba,
            };
            let act = ActDescriptor {
                ztype: new_type,
                cond: new_cond,
                domain_id: args.domain_id,
                nr_zones: target_item.length,
                start_lba: target_item.start_lba,
            };
            // smaller start LBA first
            if deact.start_lba <= act.start_lba {
                res.descriptors.push(deact);
                res.descriptors.push(act);
            } else {
                res.descriptors.push(act);
                res.descriptors.push(deact);
            }
            res.nr_realms_activated += 1;
            res.nr_zones_activated += target_item.length;

            if !args.query {
                self.switch_realm(r, cur, new_type);
            }
        }

        if !args.query && res.nr_realms_activated > 0 {
            res.status_bits |= act_status::ACTIVATED;
            debug!(
                realms = res.nr_realms_activated,
                zones = res.nr_zones_activated,
                new_type = ?new_type,
                "activated realms"
            );
        }
        Ok(res)
    }

    /// Deactivate `old`'s subrange and bring `new`'s alive for realm `r`.
    fn switch_realm(&mut self, r: u32, old: ZoneType, new: ZoneType) {
        let realm = *self.realm(r);
        if old != new {
            let item = *realm.item(old);
            for j in 0..item.length {
                let zi = item.start_zone + j;
                self.change_cond(zi, ZoneCond::Inactive);
                self.zone_mut(zi).wp = NO_WP;
            }
        }
        let item = *realm.item(new);
        let cond = initial_active_cond(new);
        for j in 0..item.length {
            let zi = item.start_zone + j;
            self.change_cond(zi, cond);
            self.init_zone_wp(zi);
        }
        self.realm_mut(r).current_type = new.wire();
    }
}

/// Cross-family swaps the command set forbids outright.
fn forbidden_transition(from: ZoneType, to: ZoneType) -> bool {
    use ZoneType::*;
    matches!(
        (from, to),
        (Conventional, SeqOrBeforeRequired)
            | (SeqOrBeforeRequired, Conventional)
            | (SeqWriteRequired, SeqWritePreferred)
            | (SeqWritePreferred, SeqWriteRequired)
    )
}

fn initial_active_cond(ztype: ZoneType) -> ZoneCond {
    match ztype {
        ZoneType::Conventional => ZoneCond::NotWp,
        _ => ZoneCond::Empty,
    }
}
