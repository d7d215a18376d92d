use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use zdtarget::meta::layout::ListId;
use zdtarget::scsi::{status, Request};
use zdtarget::zone::NO_WP;
use zdtarget::{DeviceConfig, DeviceModel, ZdDevice};

#[derive(Parser)]
#[command(name = "zdtarget")]
#[command(about = "SCSI Zone Domains block device target emulator")]
#[command(version = "0.3.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or re-create a backing file for a config string
    Format {
        /// Config string, e.g. dhsmr/type-ZONE_DOM/zsize-64K@/tmp/zd.img
        cfg: String,

        /// Device capacity (bytes; K/M/G suffixes accepted)
        #[arg(short, long)]
        size: String,
    },

    /// Show device geometry and state
    Info {
        cfg: String,

        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate the metadata region without touching it
    Check { cfg: String },

    /// List zones
    Zones {
        cfg: String,

        /// First zone index
        #[arg(long, default_value_t = 0)]
        start: u32,

        /// Number of zones to list (0 = all)
        #[arg(long, default_value_t = 0)]
        count: u32,
    },

    /// List zone domains
    Domains { cfg: String },

    /// List zone realms
    Realms { cfg: String },

    /// Mutate the device to a different personality
    Mutate {
        cfg: String,

        /// Target model name, e.g. ZONE_DOM, HM_ZONED, GENERIC
        #[arg(long = "type")]
        model: String,
    },

    /// Execute a raw SCSI CDB against the device
    Exec {
        cfg: String,

        /// CDB as hex bytes, e.g. "9500000000000000000000001000 0000"
        cdb: String,

        /// Data-out payload as hex bytes
        #[arg(long)]
        data_out: Option<String>,

        /// Cap on printed data-in bytes
        #[arg(long, default_value_t = 512)]
        dump_limit: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Format { cfg, size } => {
            let cfg = DeviceConfig::parse(&cfg)?;
            let size = parse_size(&size)?;
            let mut dev = ZdDevice::open(cfg, size).context("format failed")?;
            if !dev.reformatted {
                // existing valid metadata: force a fresh layout anyway
                dev.reformat()?;
            }
            println!(
                "formatted {} ({} realms, {} zones, serial {})",
                dev.config().path.display(),
                dev.geometry().nr_realms,
                dev.geometry().nr_zones,
                dev.store().header().serial_str()
            );
            Ok(())
        }
        Commands::Info { cfg, json } => {
            let dev = open_existing(&cfg)?;
            print_info(&dev, json);
            Ok(())
        }
        Commands::Check { cfg } => {
            let dev = open_existing(&cfg)?;
            println!(
                "metadata OK: {} zones, {} realms, model {}",
                dev.geometry().nr_zones,
                dev.geometry().nr_realms,
                dev.profile().model.name()
            );
            Ok(())
        }
        Commands::Zones { cfg, start, count } => {
            let dev = open_existing(&cfg)?;
            print_zones(&dev, start, count);
            Ok(())
        }
        Commands::Domains { cfg } => {
            let dev = open_existing(&cfg)?;
            print_domains(&dev);
            Ok(())
        }
        Commands::Realms { cfg } => {
            let dev = open_existing(&cfg)?;
            print_realms(&dev);
            Ok(())
        }
        Commands::Mutate { cfg, model } => {
            let mut dev = open_existing(&cfg)?;
            let model = DeviceModel::from_name(&model)
                .ok_or_else(|| anyhow!("unknown model `{model}`"))?;
            dev.mutate(model)?;
            println!(
                "mutated to {} ({} zones)",
                dev.profile().model.name(),
                dev.geometry().nr_zones
            );
            Ok(())
        }
        Commands::Exec {
            cfg,
            cdb,
            data_out,
            dump_limit,
        } => {
            let mut dev = open_existing(&cfg)?;
            let cdb = parse_hex(&cdb)?;
            let payload = data_out.map(|h| parse_hex(&h)).transpose()?.unwrap_or_default();

            let mut data_in: Vec<u8> = Vec::new();
            let mut data_out_reader = std::io::Cursor::new(payload);
            let out = dev
                .execute(Request {
                    cdb: &cdb,
                    data_in: &mut data_in,
                    data_out: &mut data_out_reader,
                })
                .map_err(|e| anyhow!("transport error: {e}"))?;

            match out.status {
                status::GOOD => println!("status: GOOD"),
                status::CHECK_CONDITION => {
                    let s = out.sense_data().unwrap_or_default();
                    println!(
                        "status: CHECK CONDITION (key {:#x}, asc {:#04x}/{:#04x})",
                        s.key, s.asc, s.ascq
                    );
                }
                other => println!("status: {other:#x}"),
            }
            if !data_in.is_empty() {
                println!("data-in ({} bytes):", data_in.len());
                hexdump(&data_in[..data_in.len().min(dump_limit)]);
            }
            Ok(())
        }
    }
}

fn open_existing(cfg: &str) -> Result<ZdDevice> {
    let cfg = DeviceConfig::parse(cfg)?;
    ZdDevice::open_existing(cfg).context("open failed (is the file formatted?)")
}

fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    let (num, mult) = match s.chars().last() {
        Some('K') | Some('k') => (&s[..s.len() - 1], 1u64 << 10),
        Some('M') | Some('m') => (&s[..s.len() - 1], 1u64 << 20),
        Some('G') | Some('g') => (&s[..s.len() - 1], 1u64 << 30),
        Some('T') | Some('t') => (&s[..s.len() - 1], 1u64 << 40),
        _ => (s, 1),
    };
    let n: u64 = num.parse().context("bad size")?;
    Ok(n * mult)
}

fn parse_hex(s: &str) -> Result<Vec<u8>> {
    let clean: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if clean.len() % 2 != 0 {
        bail!("hex string has an odd number of digits");
    }
    (0..clean.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&clean[i..i + 2], 16).context("bad hex digit"))
        .collect()
}

fn hexdump(data: &[u8]) {
    for (i, chunk) in data.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        println!("  {:08x}  {}", i * 16, hex.join(" "));
    }
}

fn print_info(dev: &ZdDevice, as_json: bool) {
    let hdr = dev.store().header();
    let geo = dev.geometry();
    if as_json {
        let domains: Vec<_> = geo
            .domains
            .iter()
            .enumerate()
            .map(|(i, d)| {
                json!({
                    "id": i,
                    "type": format!("{:?}", d.ztype),
                    "start_zone": d.start_zone,
                    "nr_zones": d.nr_zones,
                })
            })
            .collect();
        let info = json!({
            "model": dev.profile().model.name(),
            "serial": hdr.serial_str(),
            "lba_size": hdr.lba_size,
            "zone_size_lbas": hdr.zone_size,
            "nr_zones": hdr.nr_zones,
            "nr_realms": hdr.nr_realms,
            "realm_size_lbas": hdr.realm_size,
            "phys_capacity": hdr.phys_capacity,
            "logical_capacity": hdr.logical_capacity,
            "cmr_capacity": hdr.cmr_capacity,
            "smr_gain_pct": hdr.smr_gain,
            "max_open": hdr.max_open,
            "max_activation": hdr.max_activation,
            "fsnoz": hdr.fsnoz,
            "urswrz": hdr.urswrz != 0,
            "realms_feature": hdr.realms_feature != 0,
            "counts": {
                "empty": hdr.counts.empty,
                "imp_open": hdr.counts.imp_open,
                "exp_open": hdr.counts.exp_open,
                "closed": hdr.counts.closed,
                "full": hdr.counts.full,
                "inactive": hdr.counts.inactive,
                "read_only": hdr.counts.read_only,
                "offline": hdr.counts.offline,
            },
            "domains": domains,
        });
        println!("{}", serde_json::to_string_pretty(&info).unwrap_or_default());
        return;
    }

    println!("model:            {}", dev.profile().model.name());
    println!("serial:           {}", hdr.serial_str());
    println!("config:           {}", hdr.config_str());
    println!("lba size:         {} B", hdr.lba_size);
    println!("zone size:        {} LBAs", hdr.zone_size);
    println!("zones:            {} ({} conv / {} seq / {} gap)",
        hdr.nr_zones, hdr.nr_conv_zones, hdr.nr_seq_zones, hdr.nr_gap_zones);
    println!("realms:           {} x {} LBAs", hdr.nr_realms, hdr.realm_size);
    println!("physical cap:     {} LBAs", hdr.phys_capacity);
    println!("logical cap:      {} LBAs", hdr.logical_capacity);
    println!("cmr cap:          {} LBAs (gain {}%)", hdr.cmr_capacity, hdr.smr_gain);
    println!("max open:         {}", hdr.max_open);
    println!("open now:         {} imp / {} exp", hdr.counts.imp_open, hdr.counts.exp_open);
    println!(
        "lists:            imp {} exp {} closed {} seq-active {}",
        dev.store().list(ListId::ImpOpen).size,
        dev.store().list(ListId::ExpOpen).size,
        dev.store().list(ListId::Closed).size,
        dev.store().list(ListId::SeqActive).size,
    );
}

fn print_zones(dev: &ZdDevice, start: u32, count: u32) {
    let nr = dev.geometry().nr_zones;
    let end = if count == 0 {
        nr
    } else {
        (start + count).min(nr)
    };
    println!("{:>6} {:>12} {:>8} {:<10} {:<9} {:>12}  flags", "zone", "start", "len", "type", "cond", "wp");
    for zi in start..end {
        let z = dev.store().zone(zi);
        let wp = if z.wp == NO_WP {
            "-".to_string()
        } else {
            z.wp.to_string()
        };
        println!(
            "{:>6} {:>12} {:>8} {:<10} {:<9} {:>12}  {:#04x}",
            zi,
            z.start,
            z.len,
            format!("{:?}", z.zone_type()),
            format!("{:?}", z.condition()),
            wp,
            z.flags
        );
    }
}

fn print_domains(dev: &ZdDevice) {
    let hdr = dev.store().header();
    println!("{:>3} {:<22} {:>12} {:>12} {:>8}", "id", "type", "start", "end", "zones");
    for i in 0..hdr.nr_domains as usize {
        let d = hdr.domains[i];
        println!(
            "{:>3} {:<22} {:>12} {:>12} {:>8}",
            i,
            format!("{:?}", d.zone_type()),
            d.start_lba,
            d.end_lba,
            d.nr_zones
        );
    }
}

fn print_realms(dev: &ZdDevice) {
    let nr = dev.geometry().nr_realms;
    println!("{:>5} {:<22} {:>10}  items (start+zones by type)", "realm", "active type", "can-act");
    for r in 0..nr {
        let realm = dev.store().realm(r);
        let items: Vec<String> = realm
            .items
            .iter()
            .enumerate()
            .filter(|(_, it)| it.length > 0)
            .map(|(t, it)| format!("t{}:{}+{}", t + 1, it.start_lba, it.length))
            .collect();
        println!(
            "{:>5} {:<22} {:>#10x}  {}",
            r,
            format!("{:?}", realm.current()),
            realm.can_activate,
            items.join(" ")
        );
    }
}
