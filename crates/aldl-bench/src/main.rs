//! ALDL bench command line.
//!
//! ```text
//! aldl-bench respond   --port /dev/ttyUSB0           # act as the controller
//! aldl-bench unlock    --port /dev/ttyUSB0           # seed/key exchange
//! aldl-bench actuate   --port /dev/ttyUSB0 0x11      # Mode 4 outputs
//! aldl-bench prepare   --port /dev/ttyUSB0           # chatter off, unlock, Mode 5
//! aldl-bench kernel    --port /dev/ttyUSB0 [k.bin]   # prepare + Mode 6 upload
//! aldl-bench cal-write --port /dev/ttyUSB0 new.bin   # calibration sector via kernel
//! aldl-bench translate 2 0x8000                      # bank address -> file offset
//! aldl-bench locate    0x10000                       # file offset -> bank address
//! aldl-bench patch     in.bin 0x5D00 860139 -o out.bin
//! aldl-bench checksum  in.bin --fix
//! aldl-bench profile                                 # print the active profile
//! ```
//!
//! `--profile` takes a built-in name (`vy-v6`, `holden-f4`) or a TOML path.
//! Logging goes to stderr and follows `RUST_LOG` (default `info`).

use std::{
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
    time::Duration,
};

use aldl_bench::{
    BenchEcu, BenchError, Listener, ScanTool, Unlock,
    image::{checksum_report, patch_image, read_image, write_image},
    programming::{self, WATCHDOG_KERNEL},
};
use aldl_core::{
    BankId, SystemEnv, TargetProfile,
    flash::{ROM_CHECKSUM_OFFSET, fix_rom_checksum},
};
use aldl_proto::DiscreteOutputs;
use clap::{Args, Parser, Subcommand};
use serialport::SerialPort;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "aldl-bench", version, about = "ALDL bench responder and scan tool")]
struct Cli {
    /// Built-in profile name or path to a TOML profile
    #[arg(long, global = true, default_value = "vy-v6")]
    profile: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct PortArgs {
    /// Serial device
    #[arg(long)]
    port: String,

    /// Baud rate (defaults to the profile's)
    #[arg(long)]
    baud: Option<u32>,

    /// Per-read timeout in milliseconds
    #[arg(long, default_value_t = 500)]
    timeout_ms: u64,

    /// The cable doesn't echo our own transmissions
    #[arg(long)]
    no_echo: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer requests as the profile's controller
    Respond {
        #[command(flatten)]
        port: PortArgs,
    },
    /// Run the seed/key exchange
    Unlock {
        #[command(flatten)]
        port: PortArgs,
    },
    /// Send a Mode 4 discrete output control byte
    Actuate {
        #[command(flatten)]
        port: PortArgs,
        /// Control byte
        #[arg(value_parser = parse_u8)]
        control: u8,
    },
    /// Silence the bus, unlock and enter flash programming mode
    Prepare {
        #[command(flatten)]
        port: PortArgs,
    },
    /// Prepare, then upload a kernel into controller RAM
    Kernel {
        #[command(flatten)]
        port: PortArgs,
        /// Kernel binary (defaults to the built-in watchdog kernel)
        file: Option<PathBuf>,
    },
    /// Check an image's calibration sector and load the kernel that writes it
    CalWrite {
        #[command(flatten)]
        port: PortArgs,
        /// Image carrying the new calibration
        image: PathBuf,
        /// Programming kernel (defaults to the built-in watchdog kernel)
        #[arg(long)]
        kernel: Option<PathBuf>,
    },
    /// Map a bank and CPU address to a file offset
    Translate {
        /// Bank number (1-3)
        bank: u8,
        /// CPU address
        #[arg(value_parser = parse_u16)]
        addr: u16,
    },
    /// Map a file offset back to CPU addresses
    Locate {
        /// File offset
        #[arg(value_parser = parse_usize)]
        offset: usize,
    },
    /// Write bytes into the patch window of an image
    Patch {
        /// Input image
        image: PathBuf,
        /// CPU address inside the patch window
        #[arg(value_parser = parse_u16)]
        addr: u16,
        /// Bytes to write, as hex
        data: String,
        /// Bank the address belongs to
        #[arg(long, default_value_t = 1)]
        bank: u8,
        /// Output image (defaults to rewriting the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Leave the ROM checksum word alone
        #[arg(long)]
        no_checksum: bool,
    },
    /// Report ROM and sector checksums
    Checksum {
        /// Image to check
        image: PathBuf,
        /// Rewrite the ROM checksum word so the image sums to zero
        #[arg(long)]
        fix: bool,
    },
    /// Print the active profile as TOML
    Profile,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "command failed");
            ExitCode::FAILURE
        },
    }
}

fn run(cli: Cli) -> Result<(), BenchError> {
    let profile = TargetProfile::resolve(&cli.profile)?;
    let mut out = io::stdout().lock();

    match cli.command {
        Command::Respond { port } => {
            let transport = open_port(&port, &profile)?;
            let ecu = BenchEcu::from_profile(&profile);
            let stats = Listener::new(transport, profile, ecu, SystemEnv).with_echo(!port.no_echo).run()?;
            writeln!(
                out,
                "frames {} replies {} framing errors {} abandoned {} echoed {}",
                stats.frames, stats.replies, stats.framing_errors, stats.abandoned, stats.echoed
            )?;
        },
        Command::Unlock { port } => {
            let mut tool = scan_tool(&port, &profile)?;
            match tool.unlock()? {
                Unlock::Unlocked { seed, key } => writeln!(out, "unlocked: seed {seed:#06X} key {key:#06X}")?,
                Unlock::AlreadyUnlocked => writeln!(out, "already unlocked")?,
            }
        },
        Command::Actuate { port, control } => {
            let mut tool = scan_tool(&port, &profile)?;
            let outputs = DiscreteOutputs::from_control(control);
            let status = tool.actuate(outputs)?;
            writeln!(out, "{outputs:?}: status {status:#04X}")?;
        },
        Command::Prepare { port } => {
            let mut tool = scan_tool(&port, &profile)?;
            programming::prepare(&mut tool)?;
            writeln!(out, "controller in programming mode")?;
        },
        Command::Kernel { port, file } => {
            let kernel = read_kernel(file.as_ref())?;
            let mut tool = scan_tool(&port, &profile)?;
            let report = programming::load_kernel(&mut tool, &profile, &kernel)?;
            writeln!(out, "uploaded {} bytes in {} chunks", report.len, report.chunks)?;
        },
        Command::CalWrite { port, image, kernel } => {
            let bytes = read_image(&image)?;
            let kernel = read_kernel(kernel.as_ref())?;
            let mut tool = scan_tool(&port, &profile)?;
            let stage = programming::stage_calibration(&mut tool, &profile, &bytes, &kernel)?;
            writeln!(
                out,
                "calibration {:#07X}..{:#07X} sum {:#04X}, kernel {} bytes loaded",
                stage.range.start, stage.range.end, stage.checksum, stage.kernel.len
            )?;
        },
        Command::Translate { bank, addr } => {
            let bank = BankId::from_number(bank)?;
            let offset = profile.flash.translate(bank, addr)?;
            writeln!(out, "{bank}:${addr:04X} -> {offset:#07X}")?;
        },
        Command::Locate { offset } => {
            let found = profile.flash.locate(offset);
            if found.is_empty() {
                writeln!(out, "{offset:#07X} is outside every mapped region")?;
            }
            for location in found {
                writeln!(out, "{offset:#07X} -> {location}")?;
            }
        },
        Command::Patch { image, addr, data, bank, output, no_checksum } => {
            let data = hex::decode(data.replace(' ', ""))
                .map_err(|err| BenchError::InvalidArgument(format!("patch data: {err}")))?;
            let bank = BankId::from_number(bank)?;

            let mut bytes = read_image(&image)?;
            let report = patch_image(&profile.flash, &mut bytes, bank, addr, &data, !no_checksum)?;
            write_image(output.as_ref().unwrap_or(&image), &bytes)?;

            writeln!(out, "wrote {} bytes at {:#07X}", report.range.len(), report.range.start)?;
            if let Some(word) = report.checksum {
                writeln!(out, "checksum word {word:#06X}")?;
            }
        },
        Command::Checksum { image, fix } => {
            let mut bytes = read_image(&image)?;
            if fix {
                let word = fix_rom_checksum(&mut bytes, ROM_CHECKSUM_OFFSET)?;
                write_image(&image, &bytes)?;
                writeln!(out, "checksum word {word:#06X} written")?;
            }

            let report = checksum_report(&profile.flash, &bytes)?;
            writeln!(
                out,
                "rom sum {:#06X} ({})",
                report.rom_checksum,
                if report.rom_checksum == 0 { "ok" } else { "BAD" }
            )?;
            if !report.size_matches {
                writeln!(out, "size {} differs from expected {}", bytes.len(), profile.flash.image_size)?;
            }
            for sector in report.sectors {
                writeln!(
                    out,
                    "{:<16} {:#07X}..{:#07X} sum {:#04X}{}",
                    sector.name,
                    sector.range.start,
                    sector.range.end,
                    sector.checksum,
                    if sector.erasable { "" } else { " (protected)" }
                )?;
            }
        },
        Command::Profile => {
            write!(out, "{}", profile.to_toml_string()?)?;
        },
    }

    Ok(())
}

fn open_port(args: &PortArgs, profile: &TargetProfile) -> Result<Box<dyn SerialPort>, BenchError> {
    let baud = args.baud.unwrap_or(profile.baud);
    let port = serialport::new(&args.port, baud)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(Duration::from_millis(args.timeout_ms))
        .open()?;
    Ok(port)
}

fn scan_tool(args: &PortArgs, profile: &TargetProfile) -> Result<ScanTool<Box<dyn SerialPort>>, BenchError> {
    let transport = open_port(args, profile)?;
    Ok(ScanTool::for_profile(transport, profile).with_echo(!args.no_echo))
}

fn read_kernel(path: Option<&PathBuf>) -> Result<Vec<u8>, BenchError> {
    match path {
        Some(path) => read_image(path),
        None => Ok(WATCHDOG_KERNEL.to_vec()),
    }
}

fn parse_u8(text: &str) -> Result<u8, String> {
    parse_number(text).and_then(|n| u8::try_from(n).map_err(|err| err.to_string()))
}

fn parse_u16(text: &str) -> Result<u16, String> {
    parse_number(text).and_then(|n| u16::try_from(n).map_err(|err| err.to_string()))
}

fn parse_usize(text: &str) -> Result<usize, String> {
    parse_number(text).and_then(|n| usize::try_from(n).map_err(|err| err.to_string()))
}

/// Decimal, `0x`-prefixed or `$`-prefixed hex.
fn parse_number(text: &str) -> Result<u64, String> {
    let hex = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")).or_else(|| text.strip_prefix('$'));
    let parsed = match hex {
        Some(digits) => u64::from_str_radix(digits, 16),
        None => text.parse(),
    };
    parsed.map_err(|err| format!("{text:?}: {err}"))
}
