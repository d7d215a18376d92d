//! Persisted metadata layout.
//!
//! The metadata region is `[header (4 KiB-aligned up)][realm array][zone
//! array]`, memory-mapped read-write for the lifetime of the device. All
//! records are plain `#[repr(C)]` data; multi-byte fields are host-endian
//! inside the map (the file is private to one host) while every wire
//! payload goes through the big-endian helpers instead.

use crate::zone::{ZoneCond, ZoneType, NO_WP};

/// Header magic: the file starts with the bytes `H Z B C`.
pub const META_MAGIC: [u8; 4] = *b"HZBC";

/// List-link sentinel: not pointing at any zone.
pub const NIL: u32 = u32::MAX;

/// Maximum number of zone domains.
pub const MAX_DOMAINS: usize = 4;

/// Number of embedded zone lists.
pub const NR_LISTS: usize = 4;

/// Bytes reserved for the format-time config string.
pub const CFG_STR_MAX: usize = 256;

/// Bytes reserved for the serial number.
pub const SERIAL_LEN: usize = 32;

pub const ZONE_REC_SIZE: usize = 64;
pub const REALM_REC_SIZE: usize = 72;

/// Identifier of one embedded zone list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ListId {
    ImpOpen = 0,
    ExpOpen = 1,
    Closed = 2,
    /// Empty and full zones of the sequentially-writeable types.
    SeqActive = 3,
}

/// Embedded list head: empty ⇔ `head == tail == NIL && size == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ListRec {
    pub head: u32,
    pub tail: u32,
    pub size: u32,
    pub _pad: u32,
}

impl ListRec {
    pub fn empty() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            size: 0,
            _pad: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Domain flag: the domain holds SMR-flavor zones.
pub const DOMAIN_FLAG_SMR: u8 = 0x01;

/// One zone domain: a maximal contiguous LBA range of a single zone type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct DomainRec {
    pub start_lba: u64,
    pub end_lba: u64,
    pub nr_zones: u32,
    /// Zone type wire value; 0 marks an unused domain slot.
    pub ztype: u8,
    pub flags: u8,
    pub _pad: u16,
}

impl DomainRec {
    pub fn unused() -> Self {
        Self {
            start_lba: 0,
            end_lba: 0,
            nr_zones: 0,
            ztype: 0,
            flags: 0,
            _pad: 0,
        }
    }

    pub fn zone_type(&self) -> Option<ZoneType> {
        ZoneType::from_wire(self.ztype)
    }

    pub fn contains(&self, lba: u64) -> bool {
        self.ztype != 0 && lba >= self.start_lba && lba <= self.end_lba
    }
}

/// Per-condition zone counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct CondCounts {
    pub empty: u32,
    pub imp_open: u32,
    pub exp_open: u32,
    pub closed: u32,
    pub full: u32,
    pub inactive: u32,
    pub read_only: u32,
    pub offline: u32,
}

impl CondCounts {
    pub fn slot(&mut self, cond: ZoneCond) -> Option<&mut u32> {
        match cond {
            ZoneCond::Empty => Some(&mut self.empty),
            ZoneCond::ImpOpen => Some(&mut self.imp_open),
            ZoneCond::ExpOpen => Some(&mut self.exp_open),
            ZoneCond::Closed => Some(&mut self.closed),
            ZoneCond::Full => Some(&mut self.full),
            ZoneCond::Inactive => Some(&mut self.inactive),
            ZoneCond::ReadOnly => Some(&mut self.read_only),
            ZoneCond::Offline => Some(&mut self.offline),
            ZoneCond::NotWp => None,
        }
    }

    pub fn nr_open(&self) -> u32 {
        self.imp_open + self.exp_open
    }
}

/// Zoned block device statistics, persisted so the diagnostic log page
/// survives reopen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ZbdStats {
    /// High-water mark of open zones.
    pub max_open: u64,
    /// High-water mark of explicitly open zones.
    pub max_exp_open: u64,
    /// High-water mark of implicitly open zones.
    pub max_imp_open: u64,
    /// Low-water mark of empty zones.
    pub min_empty: u64,
    /// High-water mark of non-sequentially-written zones.
    pub max_non_seq: u64,
    /// Zones transitioned to empty by RESET WRITE POINTER.
    pub zones_emptied: u64,
    /// Writes below the write pointer on seq-preferred zones.
    pub subopt_write_cmds: u64,
    /// Commands arriving while more than the optimal zone count was open.
    pub cmds_above_opt_lim: u64,
    /// Explicit opens refused for lack of zone resources.
    pub failed_exp_opens: u64,
    /// Reads refused by zone rules.
    pub read_rule_fails: u64,
    /// Writes refused by zone rules.
    pub write_rule_fails: u64,
    /// Commands with no registered handler.
    pub nr_nh_cmds: u64,
    /// Current count of non-sequentially-written zones (feeds the
    /// `max_non_seq` high-water mark).
    pub nr_non_seq: u64,
}

/// One zone record, array-indexed, 64 bytes on disk.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ZoneRec {
    pub start: u64,
    pub len: u64,
    pub wp: u64,
    pub ztype: u8,
    pub cond: u8,
    pub flags: u8,
    pub _pad: u8,
    /// List links. `NIL` terminates a list; `(prev, next) == (0, 0)` means
    /// "not in any list" — distinct from being linked next to zone 0, which
    /// always leaves at least one of the fields non-zero.
    pub prev: u32,
    pub next: u32,
    pub _rsvd: [u8; 28],
}

impl ZoneRec {
    pub fn gap(start: u64, len: u64) -> Self {
        Self {
            start,
            len,
            wp: NO_WP,
            ztype: ZoneType::Gap.wire(),
            cond: ZoneCond::NotWp.wire(),
            flags: 0,
            _pad: 0,
            prev: 0,
            next: 0,
            _rsvd: [0; 28],
        }
    }

    /// Condition as a typed value. Corrupt records read as offline; the
    /// open-time validator rejects them before any command runs.
    pub fn condition(&self) -> ZoneCond {
        ZoneCond::from_wire(self.cond).unwrap_or(ZoneCond::Offline)
    }

    /// Type as a typed value. Corrupt records read as gap.
    pub fn zone_type(&self) -> ZoneType {
        ZoneType::from_wire(self.ztype).unwrap_or(ZoneType::Gap)
    }

    pub fn is_linked(&self) -> bool {
        !(self.prev == 0 && self.next == 0)
    }

    pub fn clear_links(&mut self) {
        self.prev = 0;
        self.next = 0;
    }

    /// End boundary of valid data for the read path.
    pub fn valid_data_end(&self) -> u64 {
        match self.condition() {
            ZoneCond::Full => self.start + self.len,
            _ => {
                if self.wp == NO_WP {
                    self.start
                } else {
                    self.wp
                }
            }
        }
    }
}

/// One per-type subrange of a realm. Zero length marks an unsupported type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct RealmItem {
    pub start_lba: u64,
    /// Length in zones.
    pub length: u32,
    /// Index of the first zone of the subrange.
    pub start_zone: u32,
}

/// One zone realm, 72 bytes on disk (68 payload + 4 reserved so the array
/// stays 8-aligned).
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct RealmRec {
    /// Wire value of the currently active zone type.
    pub current_type: u8,
    /// Bit `T-1` set ⇔ the realm may be activated to type `T`.
    pub can_activate: u8,
    pub restrictions: u16,
    pub _pad: u32,
    /// Indexed by `ZoneType::wire() - 1` (conv, seq-req, seq-pref, SOBR).
    pub items: [RealmItem; 4],
}

impl RealmRec {
    pub fn empty() -> Self {
        Self {
            current_type: 0,
            can_activate: 0,
            restrictions: 0,
            _pad: 0,
            items: [RealmItem::default(); 4],
        }
    }

    pub fn item(&self, ztype: ZoneType) -> &RealmItem {
        &self.items[(ztype.wire() - 1) as usize]
    }

    pub fn item_mut(&mut self, ztype: ZoneType) -> &mut RealmItem {
        &mut self.items[(ztype.wire() - 1) as usize]
    }

    pub fn current(&self) -> Option<ZoneType> {
        ZoneType::from_wire(self.current_type)
    }

    pub fn may_activate(&self, ztype: ZoneType) -> bool {
        self.can_activate & ztype.activation_bit() != 0
    }
}

/// The persisted metadata header.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct MetaHeader {
    pub magic: [u8; 4],
    /// `size_of::<MetaHeader>()` at format time; a layout change makes old
    /// files fail validation instead of being misread.
    pub struct_size: u32,
    /// Total backing-file size in bytes.
    pub backing_size: u64,
    pub dev_type: u32,
    pub dev_model: u32,
    pub lba_size: u32,
    pub nr_domains: u32,
    /// Physical (SMR-flavor) capacity in LBAs; `nr_realms * realm_size`.
    pub phys_capacity: u64,
    /// Highest mapped LBA + 1 (end of the last domain).
    pub logical_capacity: u64,
    /// CMR-flavor capacity in LBAs.
    pub cmr_capacity: u64,
    /// Realm size in LBAs (SMR flavor).
    pub realm_size: u64,
    pub nr_realms: u32,
    /// SMR/CMR capacity gain in percent, >= 101.
    pub smr_gain: u32,
    /// Zone size in LBAs; power of two.
    pub zone_size: u64,
    pub zone_shift: u32,
    pub nr_zones: u32,
    pub nr_conv_zones: u32,
    pub nr_seq_zones: u32,
    pub nr_gap_zones: u32,
    pub max_open: u32,
    pub optimal_open: u32,
    /// Max zones per activation; 0 = unlimited.
    pub max_activation: u32,
    /// Default activation size when NOZSRC is clear, in SMR-flavor zones.
    pub fsnoz: u32,
    /// Unrestricted reads in sequential-write-required zones.
    pub urswrz: u8,
    /// Whether the Realms feature set is advertised.
    pub realms_feature: u8,
    pub _pad0: [u8; 2],
    /// Bottom realms that started CMR-active; top realms with reserved CMR
    /// slots. Non-zero counts mean the CMR domain is restricted to them.
    pub nr_bot_cmr: u32,
    pub nr_top_cmr: u32,
    pub domains: [DomainRec; MAX_DOMAINS],
    pub lists: [ListRec; NR_LISTS],
    pub counts: CondCounts,
    pub stats: ZbdStats,
    pub serial: [u8; SERIAL_LEN],
    /// Config string used at format time, NUL-padded.
    pub config: [u8; CFG_STR_MAX],
}

impl MetaHeader {
    pub fn serial_str(&self) -> &str {
        let end = self
            .serial
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(SERIAL_LEN);
        std::str::from_utf8(&self.serial[..end]).unwrap_or("")
    }

    pub fn config_str(&self) -> &str {
        let end = self
            .config
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(CFG_STR_MAX);
        std::str::from_utf8(&self.config[..end]).unwrap_or("")
    }

    pub fn list(&self, id: ListId) -> &ListRec {
        &self.lists[id as usize]
    }
}

/// Byte offsets of the mapped region, derived deterministically from the
/// realm and zone counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLayout {
    pub realm_off: usize,
    pub zone_off: usize,
    pub meta_size: usize,
    pub nr_realms: usize,
    pub nr_zones: usize,
}

pub const fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

impl RegionLayout {
    pub fn new(nr_realms: usize, nr_zones: usize) -> Self {
        let realm_off = align_up(std::mem::size_of::<MetaHeader>(), 4096);
        let zone_off = align_up(realm_off + nr_realms * REALM_REC_SIZE, 64);
        let meta_size = align_up(zone_off + nr_zones * ZONE_REC_SIZE, 4096);
        Self {
            realm_off,
            zone_off,
            meta_size,
            nr_realms,
            nr_zones,
        }
    }
}
