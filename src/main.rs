use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info, warn};

use v4l2_probe::delay::{Delay, Jitter, NoDelay};
use v4l2_probe::{Config, Device, Error, Format, FourCC, Session};

/// Exercise a v4l2 capture device through its full streaming lifecycle
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Capture device node
    #[arg(short, long, default_value = "/dev/video0")]
    device: PathBuf,

    /// Inject random pauses before each driver control operation
    #[arg(short = 's', long)]
    enable_sleep: bool,

    /// Number of frames to capture
    #[arg(short = 'n', long, default_value_t = 1,
          value_parser = clap::value_parser!(u32).range(1..))]
    frames: u32,

    /// File receiving the raw concatenated frame payloads
    #[arg(short, long, default_value = "frame.raw")]
    output: PathBuf,

    /// Requested frame width in pixels
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Requested frame height in pixels
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Requested pixel encoding as a four character code
    #[arg(long, default_value = "RGB3", value_parser = parse_fourcc)]
    fourcc: FourCC,

    /// Number of driver buffer slots to request
    #[arg(long, default_value_t = 4,
          value_parser = clap::value_parser!(u32).range(1..))]
    buffers: u32,
}

fn parse_fourcc(s: &str) -> Result<FourCC, String> {
    match <[u8; 4]>::try_from(s.as_bytes()) {
        Ok(repr) => Ok(FourCC::new(&repr)),
        Err(_) => Err(format!("'{}' is not a four character code", s)),
    }
}

fn run(args: &Args) -> Result<(), Error> {
    let dev = Device::with_path(&args.device).map_err(Error::DeviceUnavailable)?;
    match dev.query_caps() {
        Ok(caps) => info!(
            "{}: {} ({}) on {}",
            args.device.display(),
            caps.card,
            caps.driver,
            caps.bus
        ),
        Err(e) => warn!("capability query failed: {}", e),
    }
    info!(
        "requesting {}x{} {} with {} buffer slots, {} frame(s)",
        args.width, args.height, args.fourcc, args.buffers, args.frames
    );

    let file = File::create(&args.output).map_err(Error::Sink)?;
    let mut sink = BufWriter::new(file);

    let config = Config {
        format: Format::new(args.width, args.height, args.fourcc),
        buffers: args.buffers,
        frames: args.frames,
    };
    let delay: Box<dyn Delay> = if args.enable_sleep {
        Box::new(Jitter::new())
    } else {
        Box::new(NoDelay)
    };

    let summary = Session::with_delay(dev, config, delay).capture(&mut sink)?;
    sink.flush().map_err(Error::Sink)?;

    info!(
        "captured {} frame(s), {} bytes of {}x{} {} payload, into {}",
        summary.frames,
        summary.bytes,
        summary.format.width,
        summary.format.height,
        summary.format.fourcc,
        args.output.display()
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
