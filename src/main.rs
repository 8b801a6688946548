use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use rp_loopback::{
    driver::Driver,
    setup::{configure_instrument, plan_memory},
    sim::{FillTiming, SimInput, SimSignal, TriggerTiming},
    Channel, ChannelConfig, Conf, SimDriver, Supervisor, SupervisorReport,
};
use simplelog::{
    ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};
use std::{
    fs::File,
    path::PathBuf,
    process::ExitCode,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Set by the SIGINT/SIGTERM handler, never cleared.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

#[derive(Parser, Debug)]
#[command(version, about = "Record each triggered input window and replay it as an output burst")]
struct Args {
    /// Channel configuration file
    #[arg(short, long, default_value = "loopback.toml")]
    config: PathBuf,

    /// Run against the in-process simulated instrument
    #[arg(long)]
    simulate: bool,

    /// Also write a debug-level log to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Debug output on the terminal
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_logging(&args) {
        eprintln!("loopback: {e:#}");
        return ExitCode::FAILURE;
    }

    let started = Instant::now();
    let now = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown time".to_string());
    info!("loopback {} starting at {now}", env!("CARGO_PKG_VERSION"));

    let code = match run(&args) {
        Ok(report) => {
            info!("Stopped ({})", report.reason);
            let failed: Vec<_> = report.failed().map(|ch| ch.to_string()).collect();
            if !failed.is_empty() {
                error!("Failed channels: {}", failed.join(", "));
            }
            if report.is_graceful() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    };

    info!("Uptime {:.1} s", started.elapsed().as_secs_f64());
    code
}

fn init_logging(args: &Args) -> Result<()> {
    let term_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        term_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Some(path) = &args.log_file {
        let file = File::create(path)
            .with_context(|| format!("creating log file {}", path.display()))?;
        loggers.push(WriteLogger::new(LevelFilter::Debug, Config::default(), file));
    }
    CombinedLogger::init(loggers).context("initialising logger")?;
    Ok(())
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, on_signal as *const () as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_signal as *const () as libc::sighandler_t);
    }
}

fn run(args: &Args) -> Result<SupervisorReport> {
    let conf = Conf::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    install_signal_handlers();

    if args.simulate {
        info!("Using the simulated instrument");
        return start(Arc::new(simulated_instrument()), &conf);
    }
    open_hardware(&conf)
}

#[cfg(feature = "redpitaya")]
fn open_hardware(conf: &Conf) -> Result<SupervisorReport> {
    let driver = rp_loopback::rp::RpDriver::open().context("opening librp")?;
    start(Arc::new(driver), conf)
}

#[cfg(not(feature = "redpitaya"))]
fn open_hardware(_conf: &Conf) -> Result<SupervisorReport> {
    anyhow::bail!("built without the `redpitaya` feature, run with --simulate")
}

/// Configure the instrument and supervise both channels until stopped. The
/// driver is released exactly once on every path out of here.
fn start<D: Driver + 'static>(driver: Arc<D>, conf: &Conf) -> Result<SupervisorReport> {
    let configs = match prepare(driver.as_ref(), conf) {
        Ok(configs) => configs,
        Err(e) => {
            if let Err(release) = driver.release() {
                warn!("Releasing the instrument: {release}");
            }
            return Err(e);
        }
    };

    let supervisor = Supervisor::new(driver, configs, conf.runtime.supervisor_settings());
    info!("Running, press Ctrl-C to stop");
    Ok(supervisor.run(&INTERRUPTED)?)
}

fn prepare<D: Driver + ?Sized>(driver: &D, conf: &Conf) -> Result<Vec<ChannelConfig>> {
    let base_rate = driver.base_sample_rate_hz();
    info!("Base sample rate {base_rate} Hz");
    let configs = conf
        .channel_configs(base_rate)
        .context("validating configuration")?;
    let plan = plan_memory(driver, &configs).context("planning DMA memory")?;
    configure_instrument(driver, &plan, &configs).context("configuring the instrument")?;
    Ok(configs)
}

fn simulated_instrument() -> SimDriver {
    let sim = SimDriver::default();
    for (ch, frequency_hz) in [(Channel::Ch1, 1.0e6), (Channel::Ch2, 250.0e3)] {
        sim.set_input(
            ch,
            SimInput {
                signal: SimSignal::Sine {
                    frequency_hz,
                    amplitude: 0.5,
                },
                noise: 0.01,
                trigger: TriggerTiming::Random { max_polls: 50 },
                fill: FillTiming::After(10),
            },
        );
    }
    sim
}
