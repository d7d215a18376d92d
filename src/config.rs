//! Device configuration string.
//!
//! Format: `dhsmr/[opt1[/opt2]...][@]<path>`. Options are `name-value`
//! tokens; the first token that is not a recognized option starts the
//! backing-file path (paths containing `/` need the explicit `@`
//! separator).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::profile::DeviceModel;

/// Prefix every config string must carry.
pub const CONFIG_PREFIX: &str = "dhsmr/";

/// Default LBA size in bytes.
pub const DEFAULT_LBA_SIZE: u32 = 512;
/// Default zone size in bytes (256 MiB).
pub const DEFAULT_ZONE_BYTES: u64 = 256 << 20;
/// Default realm size in zones.
pub const DEFAULT_REALM_ZONES: u64 = 4;
/// Default SMR/CMR gain in percent.
pub const DEFAULT_SMR_GAIN: u32 = 125;
/// Default maximum number of open zones.
pub const DEFAULT_MAX_OPEN: u32 = 128;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config string must start with `{CONFIG_PREFIX}`")]
    BadPrefix,
    #[error("no backing-file path in config string")]
    MissingPath,
    #[error("unknown device type `{0}`")]
    UnknownType(String),
    #[error("invalid value for option `{opt}`: {reason}")]
    InvalidValue { opt: String, reason: String },
}

fn invalid(opt: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        opt: opt.to_string(),
        reason: reason.into(),
    }
}

/// Parsed device configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub model: DeviceModel,
    /// LBA size in bytes (512 or 4096).
    pub lba_size: u32,
    /// Zone size in LBAs; power of two.
    pub zone_size: u64,
    /// Conventional zone count override for the non-ZD personalities.
    pub conv_zones: Option<u32>,
    /// Maximum number of open zones.
    pub max_open: u32,
    /// Realm size in LBAs.
    pub realm_size: u64,
    /// SMR/CMR gain in percent (>= 101).
    pub smr_gain: u32,
    /// Max-activation override in zones (0 = unlimited).
    pub max_activation: Option<u32>,
    /// Initial write-pointer-check setting (URSWRZ is its inverse).
    pub wp_check: Option<bool>,
    /// Whether the Realms feature set is advertised.
    pub realms: Option<bool>,
    /// Backing-file path.
    pub path: PathBuf,
    /// The exact string this config was parsed from.
    pub raw: String,
}

impl DeviceConfig {
    /// Parse a `dhsmr/...` config string.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let rest = raw
            .strip_prefix(CONFIG_PREFIX)
            .ok_or(ConfigError::BadPrefix)?;

        let mut cfg = Self {
            model: DeviceModel::HmZoned,
            lba_size: DEFAULT_LBA_SIZE,
            zone_size: 0,
            conv_zones: None,
            max_open: DEFAULT_MAX_OPEN,
            realm_size: 0,
            smr_gain: DEFAULT_SMR_GAIN,
            max_activation: None,
            wp_check: None,
            realms: None,
            path: PathBuf::new(),
            raw: raw.to_string(),
        };

        let opts_part;
        let path_part;
        if let Some(at) = rest.find('@') {
            opts_part = &rest[..at];
            path_part = Some(&rest[at + 1..]);
        } else {
            opts_part = rest;
            path_part = None;
        }

        let mut explicit_path = path_part.map(str::to_string);
        for (i, tok) in opts_part.split('/').enumerate() {
            if tok.is_empty() {
                continue;
            }
            if !cfg.apply_option(tok)? {
                if explicit_path.is_none() {
                    // first unrecognized token: the rest is the path
                    let consumed: usize =
                        opts_part.split('/').take(i).map(|t| t.len() + 1).sum();
                    explicit_path = Some(opts_part[consumed..].to_string());
                }
                break;
            }
        }

        let path = explicit_path.ok_or(ConfigError::MissingPath)?;
        if path.is_empty() {
            return Err(ConfigError::MissingPath);
        }
        cfg.path = PathBuf::from(path);

        // defaults that depend on other options
        if cfg.zone_size == 0 {
            cfg.zone_size = DEFAULT_ZONE_BYTES / cfg.lba_size as u64;
        }
        if cfg.realm_size == 0 {
            cfg.realm_size = cfg.zone_size * DEFAULT_REALM_ZONES;
        }
        if !cfg.zone_size.is_power_of_two() {
            return Err(invalid("zsize", "zone size must be a power of two"));
        }
        // realms are whole multiples of the zone size
        cfg.realm_size = cfg.realm_size.div_ceil(cfg.zone_size) * cfg.zone_size;
        Ok(cfg)
    }

    /// Apply one option token; `Ok(false)` means "not an option" (the path
    /// starts here).
    fn apply_option(&mut self, tok: &str) -> Result<bool, ConfigError> {
        if let Some(name) = tok.strip_prefix("type-") {
            self.model = DeviceModel::from_name(name)
                .ok_or_else(|| ConfigError::UnknownType(name.to_string()))?;
        } else if tok == "model-HM" {
            self.model = DeviceModel::HmZoned;
        } else if tok == "model-HA" {
            self.model = DeviceModel::HaZoned;
        } else if let Some(v) = tok.strip_prefix("lba-") {
            match v {
                "512" => self.lba_size = 512,
                "4096" => self.lba_size = 4096,
                _ => return Err(invalid("lba", "must be 512 or 4096")),
            }
        } else if let Some(v) = tok.strip_prefix("zsize-") {
            let bytes = parse_mib_or_kib("zsize", v)?;
            if bytes == 0 || bytes % self.lba_size as u64 != 0 {
                return Err(invalid("zsize", "not a multiple of the LBA size"));
            }
            self.zone_size = bytes / self.lba_size as u64;
        } else if let Some(v) = tok.strip_prefix("rsize-") {
            let bytes = parse_mib_or_kib("rsize", v)?;
            if bytes == 0 || bytes % self.lba_size as u64 != 0 {
                return Err(invalid("rsize", "not a multiple of the LBA size"));
            }
            self.realm_size = bytes / self.lba_size as u64;
        } else if let Some(v) = tok.strip_prefix("conv-") {
            self.conv_zones = Some(parse_num("conv", v)? as u32);
        } else if let Some(v) = tok.strip_prefix("open-") {
            let n = parse_num("open", v)?;
            if n == 0 {
                return Err(invalid("open", "must be greater than zero"));
            }
            self.max_open = n as u32;
        } else if let Some(v) = tok.strip_prefix("sgain-") {
            let f: f64 = v
                .parse()
                .map_err(|_| invalid("sgain", "not a number"))?;
            if f < 1.01 {
                return Err(invalid("sgain", "must be at least 1.01"));
            }
            self.smr_gain = (f * 100.0).round() as u32;
        } else if let Some(v) = tok.strip_prefix("maxact-") {
            self.max_activation = Some(parse_num("maxact", v)? as u32);
        } else if let Some(v) = tok.strip_prefix("wpcheck-") {
            self.wp_check = Some(parse_yn("wpcheck", v)?);
        } else if let Some(v) = tok.strip_prefix("realms-") {
            self.realms = Some(parse_yn("realms", v)?);
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    /// Zone size in bytes.
    pub fn zone_bytes(&self) -> u64 {
        self.zone_size * self.lba_size as u64
    }

    /// The same configuration with a different personality, keeping the
    /// raw string reparseable (used by MUTATE).
    pub fn with_model(&self, model: DeviceModel) -> Self {
        let mut cfg = self.clone();
        cfg.model = model;
        let type_tok = format!("type-{}", model.name());
        let rest = &self.raw[CONFIG_PREFIX.len()..];
        let (opts, path_tail) = match rest.find('@') {
            Some(at) => (&rest[..at], &rest[at..]),
            None => (rest, ""),
        };
        let mut replaced = false;
        let rewritten: Vec<String> = opts
            .split('/')
            .map(|tok| {
                if tok.starts_with("type-") || tok == "model-HM" || tok == "model-HA" {
                    replaced = true;
                    type_tok.clone()
                } else {
                    tok.to_string()
                }
            })
            .collect();
        let mut opts_out = rewritten.join("/");
        if !replaced {
            opts_out = format!("{type_tok}/{opts_out}");
        }
        cfg.raw = format!("{CONFIG_PREFIX}{opts_out}{path_tail}");
        cfg
    }
}

fn parse_num(opt: &str, v: &str) -> Result<u64, ConfigError> {
    v.parse::<u64>().map_err(|_| invalid(opt, "not a number"))
}

/// `<N>` means N MiB; `<N>K` means N KiB.
fn parse_mib_or_kib(opt: &str, v: &str) -> Result<u64, ConfigError> {
    if let Some(kib) = v.strip_suffix(['K', 'k']) {
        Ok(parse_num(opt, kib)? << 10)
    } else {
        Ok(parse_num(opt, v)? << 20)
    }
}

fn parse_yn(opt: &str, v: &str) -> Result<bool, ConfigError> {
    match v {
        "y" | "Y" => Ok(true),
        "n" | "N" => Ok(false),
        _ => Err(invalid(opt, "must be y or n")),
    }
}
