use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use heci_core::protocol::constants::*;
use heci_core::{
    HeciConfig, HeciCsr, HeciDeviceId, HeciMessageHeader, HeciTransport, Message, MkhiClient,
    MkhiHeader, MockHeci, MockPciConfig, read_firmware_status, resolve_base_address,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Intel HECI mailbox tool (Pure Rust)", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run MKHI queries against the simulated controller
    Simulate {
        /// Ring depth in dwords (power of two)
        #[arg(long, default_value_t = 32)]
        depth: u8,

        /// Transport configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Decode a raw register or header dword
    Decode {
        #[arg(value_enum)]
        kind: DecodeKind,

        /// Value in hex (with or without 0x)
        #[arg(value_parser = parse_hex)]
        value: u32,
    },
    /// Write a default configuration file
    InitConfig {
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DecodeKind {
    /// HECI framing header
    Header,
    /// MKHI message header
    Mkhi,
    /// H_CSR or ME_CSR_HA
    Csr,
}

fn parse_hex(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid hex value '{}': {}", s, e))
}

/// GEN_GET_FW_VERSION reply the simulated ME answers with.
fn simulated_version_reply() -> Message {
    let header = MkhiHeader::response(MKHI_GEN_GROUP_ID, GEN_GET_FW_VERSION_CMD, 0);
    let mut bytes = header.raw().to_le_bytes().to_vec();
    for v in [0u16, 3, 1392, 40, 0, 3, 1392, 40] {
        bytes.extend(v.to_le_bytes());
    }
    Message::from_bytes(&bytes)
}

fn simulated_rule_reply(rule_id: u32, data: u32) -> Message {
    let header = MkhiHeader::response(MKHI_FWCAPS_GROUP_ID, FWCAPS_GET_RULE_CMD, 0);
    let mut bytes = header.raw().to_le_bytes().to_vec();
    bytes.extend(rule_id.to_le_bytes());
    bytes.push(4);
    bytes.extend(data.to_le_bytes());
    Message::from_bytes(&bytes)
}

fn simulate(depth: u8, config: Option<PathBuf>) -> Result<()> {
    if !depth.is_power_of_two() || depth < 2 {
        bail!("ring depth must be a power of two of at least 2, got {}", depth);
    }
    let config = match config {
        Some(path) => HeciConfig::load_from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => HeciConfig::default(),
    };

    let pci = MockPciConfig::new();
    let id = config.device;
    let Some(pci_address) = id.pci_address() else {
        bail!("{} has no PCI function to simulate", id);
    };
    let device_id = match id {
        HeciDeviceId::Heci2 => BXT_HECI2_DEVICE_ID,
        HeciDeviceId::Heci3 => BXT_HECI3_DEVICE_ID,
        _ => BXT_HECI1_DEVICE_ID,
    };
    pci.add_heci_function(pci_address, device_id, config.base_address.unwrap_or(0xFED1_A000));
    pci.set_fw_status(pci_address, 0x0000_0245);

    let base = resolve_base_address(&pci, id)?;
    let status = read_firmware_status(&pci, id)?;
    info!(status = ?status, "Firmware status");

    let mock = MockHeci::new(depth);
    mock.queue_response(simulated_version_reply());
    mock.queue_response(simulated_rule_reply(FW_CAPS_RULE_ID, 0x0000_0801));
    mock.queue_response(simulated_rule_reply(PLATFORM_TYPE_RULE_ID, 0x0000_1102));

    let transport = HeciTransport::new(config);
    let mut device = transport.open_device(mock, base);
    transport.initialize(&mut device)?;

    let mut client = MkhiClient::new(&transport, &mut device);
    let versions = client.get_fw_version()?;
    let sku = client.get_fw_caps_sku()?;
    let platform = client.get_platform_type()?;

    println!("Device:        {} at {:#X}", device.id(), device.base_address());
    println!("Code version:  {}", versions.code);
    println!("Recovery:      {}", versions.recovery);
    if let Some(fitc) = versions.fitc {
        println!("FITC:          {}", fitc);
    }
    println!("FW caps SKU:   {:#010X}", sku.0);
    println!(
        "Platform:      usage {} image {} brand {}",
        platform.target_usage_type(),
        platform.image_type(),
        platform.brand()
    );
    println!("Doorbells:     {}", device.registers().doorbell_count());
    Ok(())
}

fn decode(kind: DecodeKind, value: u32) {
    match kind {
        DecodeKind::Header => {
            let header = HeciMessageHeader::from_raw(value);
            println!("{:?}", header);
            println!("  payload dwords: {}", header.length_in_dwords());
        }
        DecodeKind::Mkhi => println!("{:?}", MkhiHeader::from_raw(value)),
        DecodeKind::Csr => println!("{}", HeciCsr::from_raw(value)),
    }
}

fn init_config(path: PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    HeciConfig::default()
        .save_to_file(&path)
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "Wrote default configuration");
    Ok(())
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Simulate { depth, config } => simulate(depth, config),
        Command::Decode { kind, value } => {
            decode(kind, value);
            Ok(())
        }
        Command::InitConfig { path, force } => init_config(path, force),
    }
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
