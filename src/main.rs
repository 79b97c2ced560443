//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Project: trustedge — Privacy and trust at the edge.
//

#![forbid(unsafe_code)]

use std::fs::File;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use einktool::{bundle, catalog, config::Config, header::CertificateSlot, signer, BundleKind};

#[derive(Parser, Debug)]
#[command(author, version, about = "e-ink reader firmware bundle tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Create(CreateCmd),
    Convert(ConvertCmd),
    Extract(ExtractCmd),
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Ota,
    Ota2,
    Recovery,
    Recovery2,
    Signature,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SlotArg {
    Developer,
    Prod1k,
    Prod2k,
}

impl From<SlotArg> for CertificateSlot {
    fn from(v: SlotArg) -> Self {
        match v {
            SlotArg::Developer => CertificateSlot::Developer,
            SlotArg::Prod1k => CertificateSlot::Prod1K,
            SlotArg::Prod2k => CertificateSlot::Prod2K,
        }
    }
}

#[derive(Args, Debug)]
struct CreateCmd {
    #[arg(long = "kind", value_enum)]
    kind: KindArg,
    #[arg(long = "in", value_name = "DIR", help = "Payload directory (files + install script)")]
    input_dir: PathBuf,
    #[arg(long = "out", value_name = "PATH", help = "Output bundle file")]
    output: PathBuf,
    #[arg(long = "key", value_name = "PATH", help = "PEM-encoded RSA private signing key")]
    key: PathBuf,
    #[arg(long, default_value_t = 0)]
    source_rev: u64,
    #[arg(long, default_value_t = 0)]
    target_rev: u64,
    #[arg(
        long = "device",
        value_name = "CODE",
        help = "Device code (hex, repeatable)",
        value_parser = parse_hex_u16
    )]
    devices: Vec<u16>,
    #[arg(long, default_value_t = 0, value_parser = parse_hex_u32)]
    platform: u32,
    #[arg(long, default_value_t = 0, value_parser = parse_hex_u32)]
    board: u32,
    #[arg(long, default_value_t = 0)]
    minor: u32,
    #[arg(long = "cert-slot", value_enum, default_value = "developer")]
    cert_slot: SlotArg,
}

#[derive(Args, Debug)]
struct ConvertCmd {
    #[arg(long = "in", value_name = "PATH")]
    input: PathBuf,
    #[arg(long = "out", value_name = "PATH", help = "Where to write the inner tar.gz")]
    output: PathBuf,
    #[arg(
        long = "pubkey",
        value_name = "PATH",
        help = "Verify the signature envelope against this PEM public key"
    )]
    pubkey: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ExtractCmd {
    #[arg(long = "in", value_name = "PATH")]
    input: PathBuf,
    #[arg(long = "out", value_name = "DIR", help = "Destination directory")]
    output_dir: PathBuf,
    #[arg(long = "pubkey", value_name = "PATH")]
    pubkey: Option<PathBuf>,
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(s, 16).map_err(|e| e.to_string())
}

fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(s, 16).map_err(|e| e.to_string())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();
    match cli.command {
        Commands::Create(args) => handle_create(args, &config),
        Commands::Convert(args) => handle_convert(args, &config),
        Commands::Extract(args) => handle_extract(args, &config),
    }
}

fn handle_create(args: CreateCmd, config: &Config) -> Result<()> {
    let kind = match args.kind {
        KindArg::Ota => BundleKind::OTAUpdate,
        KindArg::Ota2 => BundleKind::OTAUpdateV2,
        KindArg::Recovery => BundleKind::RecoveryUpdate,
        KindArg::Recovery2 => BundleKind::RecoveryUpdateV2,
        KindArg::Signature => BundleKind::UpdateSignature,
    };

    let key_pem = std::fs::read_to_string(&args.key)
        .with_context(|| format!("failed to read signing key '{}'", args.key.display()))?;
    let signing_key = signer::load_private_key_pem(&key_pem)?;

    let opts = bundle::CreateOptions {
        kind,
        source_rev: args.source_rev,
        target_rev: args.target_rev,
        devices: args.devices,
        platform: args.platform,
        board: args.board,
        minor: args.minor,
        certificate_slot: args.cert_slot.into(),
    };

    bundle::create_to_file(&args.input_dir, &signing_key, &opts, config, &args.output)?;
    println!("Wrote bundle: {}", args.output.display());
    Ok(())
}

fn handle_convert(args: ConvertCmd, config: &Config) -> Result<()> {
    let mut input = File::open(&args.input)
        .with_context(|| format!("failed to open '{}'", args.input.display()))?;
    let pubkey = load_pubkey(args.pubkey.as_deref())?;

    let converted = bundle::convert(&mut input, pubkey.as_ref(), config)?;
    std::fs::write(&args.output, &converted.inner_archive)?;

    println!("Kind: {:?}", converted.kind);
    for device in &converted.devices {
        match catalog::decode_device(*device as u32, config.allow_unknown_device_codes) {
            Ok(name) => println!("Device: 0x{device:04X} ({name})"),
            Err(e) => println!("Device: 0x{device:04X} ({e})"),
        }
    }
    if let Some(platform) = converted.platform {
        println!("Platform: 0x{platform:02X}");
    }
    if let Some(board) = converted.board {
        println!("Board: 0x{board:02X}");
    }
    println!("Wrote inner archive: {}", args.output.display());
    Ok(())
}

fn handle_extract(args: ExtractCmd, config: &Config) -> Result<()> {
    let mut input = File::open(&args.input)
        .with_context(|| format!("failed to open '{}'", args.input.display()))?;
    let pubkey = load_pubkey(args.pubkey.as_deref())?;

    bundle::extract(&mut input, pubkey.as_ref(), config, &args.output_dir)?;
    println!("Extracted to: {}", args.output_dir.display());
    Ok(())
}

fn load_pubkey(path: Option<&std::path::Path>) -> Result<Option<rsa::RsaPublicKey>> {
    match path {
        None => Ok(None),
        Some(path) => {
            let pem = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read public key '{}'", path.display()))?;
            Ok(Some(signer::load_public_key_pem(&pem)?))
        }
    }
}
