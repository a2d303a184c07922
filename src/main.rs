use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use signal_hook::consts::signal;

use coldfire_bdm::{
    Bdm, Bridge, RegisterKind, RegisterMap, RegisterName, Transport, Width,
    constants::{control_registers, flash, sim},
    dump::{DumpFormat, write_dump},
    flashing::LoadOptions,
    format::read_firmware_from_file,
    registers::parse_number,
    trace::{TRACE_HEADER, TraceOptions},
    transport::{Baudrate, MockTransport, SerialTransport},
};

#[derive(Parser)]
#[command(
    name = "coldfire-bdm",
    version,
    about = "Debug, flash and test a Motorola ColdFire through an Arduino BDM bridge"
)]
struct Cli {
    /// Serial port of the bridge, picked automatically if only one exists
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Bridge line rate, e.g. 115200 or 1m
    #[arg(short, long, default_value_t = Baudrate::default(), global = true)]
    baudrate: Baudrate,

    /// Talk to a built-in emulated target instead of hardware
    #[arg(long, global = true)]
    dry_run: bool,

    /// Print every frame sent to the bridge (with --dry-run)
    #[arg(long, global = true, requires = "dry_run")]
    show_commands: bool,

    /// Halt the target without resetting it first
    #[arg(long, global = true)]
    no_reset: bool,

    /// Don't run the register consistency check after connecting
    #[arg(long, global = true)]
    skip_check: bool,

    /// More output, repeat for frame-level tracing
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports
    Ports,
    /// Check the bridge is alive
    Ping,
    /// Read and write all general registers to test the connection
    Check,
    /// Show general, status and control registers
    Regs,
    /// Read a register, or write it if VALUE is given
    Reg {
        /// A0-A7, D0-D7, SP, CSR, a control register name or an Rc number
        name: String,
        #[arg(value_parser = parse_u32)]
        value: Option<u32>,
    },
    /// Resume execution, optionally from ADDRESS
    Go {
        #[arg(value_parser = parse_u32)]
        address: Option<u32>,
    },
    /// Execute COUNT instructions and halt
    Step {
        #[arg(default_value_t = 1)]
        count: u64,
    },
    /// Dump memory
    Dump {
        #[arg(value_parser = parse_u32)]
        address: u32,
        /// Number of 16-bit words
        #[arg(value_parser = parse_u32)]
        count: u32,
        #[arg(short, long, value_enum, default_value_t = DumpFormat::default())]
        format: DumpFormat,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Single-step from an address, printing registers before every instruction
    Trace {
        #[arg(long, value_parser = parse_u32, default_value = "0x400")]
        starting_address: u32,
        #[arg(long, default_value_t = 0x1000_0000)]
        num_instructions: u64,
        /// Stop when the program counter reaches 0 (likely a crash or reset)
        #[arg(long)]
        stop_on_zero: bool,
    },
    /// Erase the boot flash and program a firmware image
    Load {
        /// Binary, Intel HEX or ELF file
        path: PathBuf,
        /// Load address for raw binaries
        #[arg(long, value_parser = parse_u32, default_value = "0")]
        base_address: u32,
        #[arg(long, value_parser = parse_u32)]
        max_bytes: Option<u32>,
        /// Program without erasing first
        #[arg(long)]
        skip_erase: bool,
    },
    /// Erase the whole boot flash
    Erase,
    /// Program a single word of erased boot flash
    ProgramWord {
        #[arg(value_parser = parse_u32)]
        address: u32,
        #[arg(value_parser = parse_u32)]
        value: u32,
    },
    /// Test SRAM attached to chip-select 1
    SramTest {
        #[arg(long, value_parser = parse_u32, default_value = "0x00200000")]
        base_address: u32,
        #[arg(long, value_parser = parse_u32, default_value = "0x100000")]
        max_bytes: u32,
    },
}

fn parse_u32(s: &str) -> std::result::Result<u32, String> {
    parse_number(s).ok_or_else(|| format!("{:?} is not a number", s))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let _ = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    if let Command::Ports = cli.command {
        let ports = SerialTransport::scan_ports()?;
        if ports.is_empty() {
            log::warn!("No serial ports found");
        }
        for port in ports {
            println!("{}", port);
        }
        return Ok(());
    }

    if cli.dry_run {
        log::info!("Dry run, talking to an emulated target");
        let mut bdm = open(MockTransport::new(), &cli)?;
        let result = run(&mut bdm, &cli.command);
        if cli.show_commands {
            for frame in bdm.bridge().transport().frames() {
                println!("{:?}", frame);
            }
        }
        return result;
    }

    let port = match &cli.port {
        Some(port) => port.clone(),
        None => {
            let ports = SerialTransport::scan_ports()?;
            match &ports[..] {
                [port] => port.clone(),
                [] => bail!("No serial port found, is the bridge plugged in?"),
                _ => bail!("Several serial ports found, pick one with --port: {:?}", ports),
            }
        }
    };
    let mut bdm = open(SerialTransport::open(&port, cli.baudrate)?, &cli)?;
    run(&mut bdm, &cli.command)
}

fn open<T: Transport>(transport: T, cli: &Cli) -> Result<Bdm<T>> {
    let mut bridge = Bridge::connect(transport)?;
    if let Command::Ping = cli.command {
        return Ok(Bdm::new(bridge));
    }
    bridge.enter_debug_mode(!cli.no_reset)?;
    let mut bdm = Bdm::new(bridge);
    if cli.dry_run || cli.skip_check || matches!(cli.command, Command::Check) {
        log::debug!("Skipping consistency check");
    } else {
        bdm.consistency_check()?;
        log::info!("Target halted and responding");
    }
    Ok(bdm)
}

/// Run `f` with a flag that Ctrl-C raises. Outside of it Ctrl-C terminates.
fn cancellable<R>(f: impl FnOnce(&AtomicBool) -> Result<R>) -> Result<R> {
    let cancel = Arc::new(AtomicBool::new(false));
    let id = signal_hook::flag::register(signal::SIGINT, cancel.clone())?;
    let result = f(&cancel);
    signal_hook::low_level::unregister(id);
    let terminate = Arc::new(AtomicBool::new(true));
    signal_hook::flag::register_conditional_default(signal::SIGINT, terminate)?;
    result
}

fn run<T: Transport>(bdm: &mut Bdm<T>, command: &Command) -> Result<()> {
    match command {
        Command::Ports => bail!("listing ports needs no target"),
        Command::Ping => {
            bdm.bridge_mut().ping()?;
            log::info!("PONG");
        }
        Command::Check => {
            bdm.consistency_check()?;
            log::info!("Consistency check passed");
        }
        Command::Regs => print_registers(bdm, &mut io::stdout().lock())?,
        Command::Reg { name, value } => {
            let map = RegisterMap::load()?;
            let reg = RegisterName::parse(&map, name)?;
            match (reg, value) {
                (RegisterName::General(kind, n), None) => {
                    println!("{} = 0x{:08x}", reg, bdm.read_register(kind, n)?)
                }
                (RegisterName::General(kind, n), Some(v)) => bdm.write_register(kind, n, *v)?,
                (RegisterName::Csr, None) => println!("CSR = {}", bdm.read_csr()?),
                (RegisterName::Csr, Some(v)) => bdm.write_csr((*v).into())?,
                (RegisterName::Control(enc), None) => {
                    println!("{} = 0x{:08x}", reg, bdm.read_control_register(enc)?)
                }
                (RegisterName::Control(enc), Some(v)) => bdm.write_control_register(enc, *v)?,
            }
        }
        Command::Go { address } => {
            if let Some(address) = address {
                bdm.write_control_register(control_registers::PC, *address)?;
            }
            bdm.resume()?;
            log::info!("Target running");
        }
        Command::Step { count } => {
            cancellable(|cancel| {
                for _ in 0..*count {
                    if cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    bdm.step()?;
                }
                Ok(())
            })?;
            let pc = bdm.read_control_register(control_registers::PC)?;
            println!("PC = 0x{:08x}", pc);
        }
        Command::Dump {
            address,
            count,
            format,
            output,
        } => {
            let written = cancellable(|cancel| {
                let words = bdm
                    .dump_words(*address, *count)
                    .take_while(|_| !cancel.load(Ordering::Relaxed));
                match output {
                    Some(path) => {
                        let mut out = BufWriter::new(File::create(path)?);
                        write_dump(&mut out, *address, words, *format)
                    }
                    None => write_dump(&mut io::stdout().lock(), *address, words, *format),
                }
            })?;
            log::debug!("Dumped {} words", written);
        }
        Command::Trace {
            starting_address,
            num_instructions,
            stop_on_zero,
        } => {
            let options = TraceOptions {
                start: *starting_address,
                max_steps: *num_instructions,
                stop_on_zero: *stop_on_zero,
            };
            println!("{}", TRACE_HEADER);
            let mut stdout = io::stdout().lock();
            let steps = cancellable(|cancel| {
                Ok(bdm.trace_execution(&options, cancel, |row| {
                    writeln!(stdout, "{}", row)?;
                    Ok(())
                })?)
            })?;
            log::info!("Traced {} instructions", steps);
        }
        Command::Load {
            path,
            base_address,
            max_bytes,
            skip_erase,
        } => {
            let mut image = read_firmware_from_file(path, *base_address)?;
            if let Some(max_bytes) = max_bytes {
                image.truncate(*max_bytes as usize)?;
            }
            log::info!(
                "Firmware size: {} bytes at 0x{:08x}",
                image.data.len(),
                image.base
            );
            let options = LoadOptions {
                skip_erase: *skip_erase,
            };
            let progress = progress_bar("Programming")?;
            cancellable(|cancel| Ok(bdm.load_flash(&image, &options, &progress, cancel)?))?;
        }
        Command::Erase => {
            bdm.chip_erase()?;
            bdm.verify_erased()?;
            log::info!("Flash erased");
        }
        Command::ProgramWord { address, value } => {
            let Ok(word) = u16::try_from(*value) else {
                bail!("0x{:x} doesn't fit in a word", value);
            };
            if *address >= flash::SIZE || address % 2 == 1 {
                bail!("0x{:08x} is not a word address in flash", address);
            }
            bdm.flash_write_enable()?;
            bdm.write_word(*address, word)?;
            let read = bdm.read_word(*address)?;
            if read != word {
                bail!(
                    "0x{:08x} reads 0x{:04x} after programming 0x{:04x}, erase first",
                    address,
                    read,
                    word
                );
            }
        }
        Command::SramTest {
            base_address,
            max_bytes,
        } => {
            let progress = progress_bar("Testing")?;
            cancellable(|cancel| {
                Ok(bdm.sram_test(*base_address, *max_bytes, &progress, cancel)?)
            })?;
        }
    }
    Ok(())
}

fn progress_bar(message: &'static str) -> Result<ProgressBar> {
    let bar = ProgressBar::new(0).with_message(message);
    bar.set_style(ProgressStyle::with_template(
        "{msg} {wide_bar} {pos}/{len} ({eta})",
    )?);
    Ok(bar)
}

fn print_registers<T: Transport, W: Write>(bdm: &mut Bdm<T>, out: &mut W) -> Result<()> {
    for kind in [RegisterKind::Data, RegisterKind::Address] {
        for n in 0..8 {
            let value = bdm.read_register(kind, n)?;
            write!(out, "{} = 0x{:08x}  ", RegisterName::General(kind, n), value)?;
        }
        writeln!(out)?;
    }
    writeln!(out, "CSR = {}", bdm.read_csr()?)?;

    let map = RegisterMap::load()?;
    for reg in &map.registers {
        let value = bdm.read_control_register(reg.encoding)?;
        writeln!(out, "{:<8} = 0x{:08x}", reg.name, value)?;
    }

    let mbar = bdm.read_control_register(control_registers::MBAR)? & sim::MBAR_ADDRESS_MASK;
    for (name, offset) in [("PADDR", sim::PADDR), ("PADAT", sim::PADAT)] {
        let value = bdm.read_memory(mbar.wrapping_add(offset), Width::Word)?;
        writeln!(out, "{:<8} = 0x{:04x}", name, value)?;
    }
    Ok(())
}
