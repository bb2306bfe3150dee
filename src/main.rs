use std::error::Error;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use ppasm::asm::encoding::{disassemble, BootImage, ImageFormat, Listing, RawImage};
use ppasm::asm::{assemble, AsmFlags};
use ppasm::err::report;
use ppasm::link::{transfer, Command, LinkFlags, RecvMode};
use ppasm::parse::Syntax;
use tracing::Level;

/// Propeller P8X32A assembler and bootloader client
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Assembly source file (or binary image with -d)
    source: PathBuf,

    /// Output file
    #[arg(short, long, default_value = "out.binary")]
    output: PathBuf,

    /// Raw output, without the bootloader preamble
    #[arg(short, long)]
    raw: bool,

    /// Also write a listing to `<output>.lst`
    #[arg(short, long)]
    listing: bool,

    /// Disassemble the source image to stdout
    #[arg(short, long)]
    disassemble: bool,

    /// Upload to the propeller instead of writing the output file:
    /// 0 = get version and shutdown, 1 = load to RAM and run,
    /// 2 = program EEPROM and shutdown, 3 = program EEPROM and run
    #[arg(short, long, value_name = "COMMAND", value_parser = clap::value_parser!(u8).range(0..=3))]
    upload: Option<u8>,

    /// Serial port the propeller is connected to
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    serial: String,

    /// Wait for the propeller's reply without polling it
    #[arg(long)]
    passive: bool,

    /// Comment, immediate and local label conventions of the source
    #[arg(long, value_enum, default_value_t = SyntaxArg::Parallax)]
    syntax: SyntaxArg,

    /// One of `TRACE`, `DEBUG`, `INFO`, `WARN`, or `ERROR`
    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,

    /// Log more (repeatable, overrides --log-level)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
enum SyntaxArg {
    /// `'` and `{ }` comments, `#` immediates, `:` local labels
    Parallax,
    /// `//` and `/* */` comments, `$` immediates, `.` local labels
    C,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let level = match args.verbose {
        0 => args.log_level,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    match main_real(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        },
    }
}

fn main_real(args: Args) -> Result<(), Box<dyn Error>> {
    if args.disassemble {
        let image = fs::read(&args.source)
            .map_err(|e| format!("cannot read {}: {e}", args.source.display()))?;
        let listing = disassemble(&image, args.raw)
            .ok_or_else(|| format!("{} is not a valid image", args.source.display()))?;

        io::stdout().write_all(listing.as_bytes())
            .map_err(|e| format!("cannot write listing: {e}"))?;
        return Ok(());
    }

    let src = fs::read_to_string(&args.source)
        .map_err(|e| format!("cannot read {}: {e}", args.source.display()))?;
    let syntax = match args.syntax {
        SyntaxArg::Parallax => Syntax::PARALLAX,
        SyntaxArg::C => Syntax::C,
    };
    let program = assemble(&src, &AsmFlags { syntax })
        .map_err(|e| format!("{}: {}", args.source.display(), report(&e)))?;
    tracing::debug!(longs = program.len(), symbols = program.symbols().len(), "assembled");

    if args.listing {
        let mut path = args.output.clone().into_os_string();
        path.push(".lst");
        write_file(Path::new(&path), Listing::serialize(&program).as_bytes())?;
    }

    match args.upload {
        Some(code) => {
            let command = Command::try_from(code)
                .map_err(|n| format!("unknown upload command {n}"))?;
            let flags = LinkFlags {
                recv_mode: if args.passive { RecvMode::Passive } else { RecvMode::PingPong },
                ..LinkFlags::default()
            };

            // stop the transfer (and restore the port) on ctrl-c
            let interrupt = Arc::new(AtomicBool::new(false));
            let handler_flag = Arc::clone(&interrupt);
            ctrlc::set_handler(move || handler_flag.store(true, Ordering::Relaxed))?;

            let image = BootImage::serialize(&program);
            let version = transfer(&image, &args.serial, command, &flags, interrupt)
                .map_err(|e| format!("{}: {}", args.serial, report(&e)))?;
            println!("found propeller ver {version}");
        },
        None => {
            let image = match args.raw {
                true  => RawImage::serialize(&program),
                false => BootImage::serialize(&program),
            };
            write_file(&args.output, &image)?;
        },
    }
    Ok(())
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), Box<dyn Error>> {
    fs::write(path, contents)
        .map_err(|e| format!("cannot write {}: {e}", path.display()))?;
    tracing::info!("wrote {}", path.display());
    Ok(())
}
