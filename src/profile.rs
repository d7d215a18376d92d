//! Device personalities and their feature profiles.
//!
//! A personality is a `(DeviceType, DeviceModel)` pair with a static feature
//! profile describing the zone layout and command-set capabilities the
//! formatter and handlers honor. The closed set of personalities doubles as
//! the mutation-target table reported by REPORT MUTATIONS.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::zone::{ZoneCond, ZoneType};

/// Zoned-model family of a personality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum DeviceType {
    NonZoned = 0,
    HostManaged = 1,
    HostAware = 2,
    ZoneDomains = 3,
}

impl DeviceType {
    pub fn wire(self) -> u32 {
        self as u32
    }

    pub fn from_wire(val: u32) -> Option<Self> {
        match val {
            0 => Some(Self::NonZoned),
            1 => Some(Self::HostManaged),
            2 => Some(Self::HostAware),
            3 => Some(Self::ZoneDomains),
            _ => None,
        }
    }
}

/// Personality discriminant within a device type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum DeviceModel {
    /// Plain non-zoned disk
    Generic = 1,
    /// Host-managed SMR, sequential-write-required zones only
    HmZoned = 10,
    /// Host-managed SMR with 1% conventional zones at the bottom
    HmZoned1PcntB = 11,
    /// Host-managed SMR with injected read-only and offline zones
    HmZonedFaulty = 12,
    /// Host-aware SMR
    HaZoned = 20,
    /// Host-aware SMR with 1% conventional zones at the bottom
    HaZoned1PcntB = 21,
    /// Zone Domains: conventional + sequential-write-required domains
    ZoneDom = 30,
    /// Zone Domains with one CMR-active realm at the bottom and a reserved
    /// CMR slot at the top
    Zd1CmrBot = 31,
    /// Zone Domains with injected read-only and offline zones
    ZdFaulty = 32,
    /// Zone Domains: SOBR + sequential-write-preferred domains
    ZdSobrSwp = 33,
    /// Zone Domains without any CMR domain
    ZdNoCmr = 34,
}

impl DeviceModel {
    pub fn wire(self) -> u32 {
        self as u32
    }

    pub fn from_wire(val: u32) -> Option<Self> {
        use DeviceModel::*;
        match val {
            1 => Some(Generic),
            10 => Some(HmZoned),
            11 => Some(HmZoned1PcntB),
            12 => Some(HmZonedFaulty),
            20 => Some(HaZoned),
            21 => Some(HaZoned1PcntB),
            30 => Some(ZoneDom),
            31 => Some(Zd1CmrBot),
            32 => Some(ZdFaulty),
            33 => Some(ZdSobrSwp),
            34 => Some(ZdNoCmr),
            _ => None,
        }
    }

    /// Name as recognized by the `type-<name>` config option.
    pub fn name(self) -> &'static str {
        use DeviceModel::*;
        match self {
            Generic => "GENERIC",
            HmZoned => "HM_ZONED",
            HmZoned1PcntB => "HM_ZONED_1PCNT_B",
            HmZonedFaulty => "HM_ZONED_FAULTY",
            HaZoned => "HA_ZONED",
            HaZoned1PcntB => "HA_ZONED_1PCNT_B",
            ZoneDom => "ZONE_DOM",
            Zd1CmrBot => "ZD_1CMR_BOT",
            ZdFaulty => "ZD_FAULTY",
            ZdSobrSwp => "ZD_SOBR_SWP",
            ZdNoCmr => "ZD_NO_CMR",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        PROFILES
            .iter()
            .find(|p| p.model.name() == name)
            .map(|p| p.model)
    }
}

/// Static description of one device personality.
#[derive(Debug, Clone)]
pub struct FeatureProfile {
    pub dev_type: DeviceType,
    pub model: DeviceModel,

    /// Zone type and initial condition of the CMR-flavor side, when present.
    pub cmr_type: Option<ZoneType>,
    pub initial_cmr_cond: ZoneCond,
    /// Zone type and initial condition of the SMR-flavor side, when present.
    pub smr_type: Option<ZoneType>,
    pub initial_smr_cond: ZoneCond,

    /// Realm activation targets this personality supports.
    pub can_act_conv: bool,
    pub can_act_sobr: bool,
    pub can_act_seq_req: bool,
    pub can_act_seq_pref: bool,

    /// Whether MODE SELECT may change the corresponding ZD control fields.
    pub mutable_urswrz: bool,
    pub mutable_fsnoz: bool,
    pub mutable_max_activation: bool,

    /// Whether REPORT REALMS is advertised and the realm table exposed.
    pub report_realms: bool,

    /// Conventional zone share for the non-ZD models, in percent of the
    /// total zone count (0 = only what `conv-<N>` asks for).
    pub conv_percent: u32,

    /// Bottom realms that start CMR-active; top realms that carry a
    /// reserved CMR slot. Non-zero counts restrict the CMR domain to
    /// exactly these realms.
    pub nr_bot_cmr: u32,
    pub nr_top_cmr: u32,

    /// Faulty-zone injection, applied per domain subrange.
    pub nr_rdonly_zones: u32,
    pub rdonly_zone_offset: u32,
    pub nr_offline_zones: u32,
    pub offline_zone_offset: u32,

    /// Gap zones between consecutive domains.
    pub domain_gap: u32,

    /// Default max-activation in zones (0 = unlimited).
    pub max_act_default: u32,
}

impl FeatureProfile {
    pub fn is_zoned(&self) -> bool {
        self.dev_type != DeviceType::NonZoned
    }

    pub fn is_zone_domains(&self) -> bool {
        self.dev_type == DeviceType::ZoneDomains
    }

    /// True when the CMR domain exists only for the bottom/top reserved
    /// realms.
    pub fn cmr_restricted(&self) -> bool {
        self.nr_bot_cmr + self.nr_top_cmr > 0
    }

    /// Whether activation to `ztype` is supported at all.
    pub fn can_activate(&self, ztype: ZoneType) -> bool {
        match ztype {
            ZoneType::Conventional => self.can_act_conv,
            ZoneType::SeqOrBeforeRequired => self.can_act_sobr,
            ZoneType::SeqWriteRequired => self.can_act_seq_req,
            ZoneType::SeqWritePreferred => self.can_act_seq_pref,
            ZoneType::Gap => false,
        }
    }

    /// Domain zone types in layout order (SOBR, Conv, SeqReq, SeqPref).
    pub fn domain_types(&self) -> Vec<ZoneType> {
        let mut out = Vec::new();
        for t in [
            ZoneType::SeqOrBeforeRequired,
            ZoneType::Conventional,
            ZoneType::SeqWriteRequired,
            ZoneType::SeqWritePreferred,
        ] {
            if self.cmr_type == Some(t) || self.smr_type == Some(t) {
                out.push(t);
            }
        }
        out
    }

    pub fn initial_cond(&self, ztype: ZoneType) -> ZoneCond {
        if Some(ztype) == self.cmr_type {
            self.initial_cmr_cond
        } else {
            self.initial_smr_cond
        }
    }
}

fn base_profile(dev_type: DeviceType, model: DeviceModel) -> FeatureProfile {
    FeatureProfile {
        dev_type,
        model,
        cmr_type: Some(ZoneType::Conventional),
        initial_cmr_cond: ZoneCond::NotWp,
        smr_type: Some(ZoneType::SeqWriteRequired),
        initial_smr_cond: ZoneCond::Empty,
        can_act_conv: false,
        can_act_sobr: false,
        can_act_seq_req: false,
        can_act_seq_pref: false,
        mutable_urswrz: false,
        mutable_fsnoz: false,
        mutable_max_activation: false,
        report_realms: false,
        conv_percent: 0,
        nr_bot_cmr: 0,
        nr_top_cmr: 0,
        nr_rdonly_zones: 0,
        rdonly_zone_offset: 0,
        nr_offline_zones: 0,
        offline_zone_offset: 0,
        domain_gap: 0,
        max_act_default: 0,
    }
}

lazy_static! {
    /// All supported personalities, in REPORT MUTATIONS order.
    pub static ref PROFILES: Vec<FeatureProfile> = build_profiles();
}

fn build_profiles() -> Vec<FeatureProfile> {
    let mut v = Vec::new();

    v.push(FeatureProfile {
        smr_type: None,
        ..base_profile(DeviceType::NonZoned, DeviceModel::Generic)
    });

    v.push(FeatureProfile {
        ..base_profile(DeviceType::HostManaged, DeviceModel::HmZoned)
    });
    v.push(FeatureProfile {
        conv_percent: 1,
        ..base_profile(DeviceType::HostManaged, DeviceModel::HmZoned1PcntB)
    });
    v.push(FeatureProfile {
        conv_percent: 1,
        nr_rdonly_zones: 1,
        rdonly_zone_offset: 1,
        nr_offline_zones: 1,
        offline_zone_offset: 2,
        ..base_profile(DeviceType::HostManaged, DeviceModel::HmZonedFaulty)
    });

    v.push(FeatureProfile {
        smr_type: Some(ZoneType::SeqWritePreferred),
        ..base_profile(DeviceType::HostAware, DeviceModel::HaZoned)
    });
    v.push(FeatureProfile {
        smr_type: Some(ZoneType::SeqWritePreferred),
        conv_percent: 1,
        ..base_profile(DeviceType::HostAware, DeviceModel::HaZoned1PcntB)
    });

    let zd = |model| FeatureProfile {
        can_act_conv: true,
        can_act_seq_req: true,
        mutable_urswrz: true,
        mutable_fsnoz: true,
        mutable_max_activation: true,
        report_realms: true,
        ..base_profile(DeviceType::ZoneDomains, model)
    };

    v.push(FeatureProfile {
        domain_gap: 1,
        ..zd(DeviceModel::ZoneDom)
    });
    v.push(FeatureProfile {
        nr_bot_cmr: 1,
        nr_top_cmr: 1,
        ..zd(DeviceModel::Zd1CmrBot)
    });
    v.push(FeatureProfile {
        domain_gap: 1,
        nr_rdonly_zones: 1,
        rdonly_zone_offset: 1,
        nr_offline_zones: 1,
        offline_zone_offset: 2,
        ..zd(DeviceModel::ZdFaulty)
    });
    v.push(FeatureProfile {
        cmr_type: Some(ZoneType::SeqOrBeforeRequired),
        initial_cmr_cond: ZoneCond::Empty,
        smr_type: Some(ZoneType::SeqWritePreferred),
        can_act_conv: false,
        can_act_seq_req: false,
        can_act_sobr: true,
        can_act_seq_pref: true,
        ..zd(DeviceModel::ZdSobrSwp)
    });
    v.push(FeatureProfile {
        cmr_type: None,
        can_act_conv: false,
        ..zd(DeviceModel::ZdNoCmr)
    });

    v
}

/// Look up the feature profile for a model.
pub fn profile_for(model: DeviceModel) -> &'static FeatureProfile {
    PROFILES
        .iter()
        .find(|p| p.model == model)
        .unwrap_or_else(|| unreachable!("every model has a registered profile"))
}
