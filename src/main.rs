//! primenet-manager: unattended work queue manager for GIMPS clients

use clap::Parser;
use primenet_manager::{
    BatchSubmitter, DeviceProfile, Gpu72Client, LockManager, ManagerMode, Orchestrator,
    PrimenetClient, RecordGrammar, ResultReconciler, RunOutcome, Settings, WorkCache, WorkType,
    remote::{AssignmentSource, SessionClient},
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Keep GIMPS work queues topped off and submit finished results
#[derive(Parser)]
#[command(name = "primenet-manager")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Settings file (default: TFsettings.yml or LLsettings.yml by mode)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Client family the work directories belong to
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Primenet user name
    #[arg(long)]
    usr: Option<String>,

    /// Primenet password
    #[arg(long)]
    pass: Option<String>,

    /// GPU72 user name (trial factoring only)
    #[arg(long)]
    gusr: Option<String>,

    /// GPU72 password (trial factoring only)
    #[arg(long)]
    gpass: Option<String>,

    /// Polling delay in hours, 0 to run once (max 120)
    #[arg(long)]
    time: Option<u64>,

    /// Device number of the first device
    #[arg(long)]
    dev: Option<u32>,

    /// Number of assignments to cache
    #[arg(short = 'n')]
    n: Option<usize>,

    /// Target "will factor to" bit level (minimum 73)
    #[arg(long)]
    tgt: Option<u32>,

    /// Work type: lltf or dctf for trial factoring, a Primenet code for Lucas-Lehmer
    #[arg(short = 'T')]
    work_type: Option<String>,

    /// GPU72 work option: what_makes_sense, lowest_tf_level, highest_tf_level,
    /// lowest_exponent, oldest_exponent, let_gpu72_decide
    #[arg(long)]
    opt: Option<String>,

    /// Work directory with worktodo.txt and results.txt
    #[arg(long)]
    dir: Option<PathBuf>,

    /// GPU thread count recorded in the settings file for the client
    #[arg(long)]
    threads: Option<u32>,

    /// Append log output to this file instead of stderr
    #[arg(long)]
    logs: Option<PathBuf>,

    /// Write the effective settings to the settings file and exit
    #[arg(short = 'w', long = "write-defaults")]
    write_defaults: bool,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Mode {
    /// mfakto/mfaktc trial factoring
    Tf,
    /// clLucas Lucas-Lehmer testing
    Ll,
}

impl From<Mode> for ManagerMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Tf => ManagerMode::TrialFactoring,
            Mode::Ll => ManagerMode::LucasLehmer,
        }
    }
}

fn cli_mode(cli: &Cli) -> ManagerMode {
    cli.mode.map(ManagerMode::from).unwrap_or_default()
}

fn settings_path(cli: &Cli) -> PathBuf {
    if let Some(path) = &cli.config {
        return path.clone();
    }
    match cli_mode(cli) {
        ManagerMode::TrialFactoring => PathBuf::from("TFsettings.yml"),
        ManagerMode::LucasLehmer => PathBuf::from("LLsettings.yml"),
    }
}

fn apply_overrides(settings: &mut Settings, cli: &Cli) {
    if let Some(mode) = cli.mode {
        settings.mode = mode.into();
    }
    if let Some(usr) = &cli.usr {
        settings.username = usr.clone();
    }
    if let Some(pass) = &cli.pass {
        settings.password = pass.clone();
    }
    if let Some(gusr) = &cli.gusr {
        settings.gpu72_username = gusr.clone();
    }
    if let Some(gpass) = &cli.gpass {
        settings.gpu72_password = gpass.clone();
    }
    if let Some(hours) = cli.time {
        settings.poll_hours = hours;
    }
    if let Some(logs) = &cli.logs {
        settings.log_file = Some(logs.clone());
    }

    if settings.devices.is_empty() {
        settings.devices.push(DeviceProfile::for_mode(settings.mode));
    }
    let first = &mut settings.devices[0];
    if let Some(dev) = cli.dev {
        first.device = dev;
    }
    if let Some(n) = cli.n {
        first.cache = n;
    }
    if let Some(tgt) = cli.tgt {
        first.target = tgt;
    }
    if let Some(work_type) = &cli.work_type {
        first.work_type = match work_type.parse::<u32>() {
            Ok(code) => WorkType::Code(code),
            Err(_) => WorkType::Name(work_type.clone()),
        };
    }
    if let Some(opt) = &cli.opt {
        first.work_option = opt.clone();
    }
    if let Some(dir) = &cli.dir {
        first.workdir = dir.clone();
    }
    if let Some(threads) = cli.threads {
        first.threads = Some(threads);
    }
}

fn init_logging(log_file: Option<&Path>) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn build(settings: &Settings) -> primenet_manager::Result<Orchestrator> {
    let grammar = RecordGrammar::for_mode(settings.mode)?;
    let locks = LockManager::default();
    let primenet = Arc::new(PrimenetClient::from_settings(settings, grammar.clone())?);

    let mut sources: Vec<Arc<dyn AssignmentSource>> = Vec::new();
    if settings.has_gpu72() {
        sources.push(Arc::new(Gpu72Client::from_settings(settings, grammar.clone())?));
    }
    if settings.has_primenet() {
        sources.push(primenet.clone());
    }

    let work_cache = WorkCache::new(locks.clone(), grammar.clone(), sources);
    let reconciler = ResultReconciler::new(locks, grammar, BatchSubmitter::new(primenet.clone()));

    let mut orchestrator = Orchestrator::new(work_cache, reconciler, settings.devices.clone())
        .with_backoff(settings.backoff)
        .with_poll_interval(settings.poll_interval())
        .with_retry_policy(settings.retry_policy());
    if settings.has_primenet() {
        let session: Arc<dyn SessionClient> = primenet;
        orchestrator = orchestrator.with_session(session, !settings.has_gpu72());
    }
    Ok(orchestrator)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let path = settings_path(&cli);

    let mut settings = match Settings::load(&path, cli_mode(&cli)) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("cannot read {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
    };
    apply_overrides(&mut settings, &cli);

    if cli.write_defaults {
        return match settings.save(&path) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("cannot write {}: {e}", path.display());
                ExitCode::FAILURE
            }
        };
    }

    if let Err(e) = init_logging(settings.log_file.as_deref()) {
        eprintln!("cannot open log file: {e}");
        return ExitCode::FAILURE;
    }

    if let Err(e) = settings.prepare() {
        error!(error = %e, "invalid settings");
        return ExitCode::FAILURE;
    }
    info!(
        mode = settings.mode.tag(),
        devices = settings.devices.len(),
        poll_hours = settings.poll_hours,
        "starting"
    );

    let orchestrator = match build(&settings) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    match primenet_manager::run_with_shutdown(orchestrator).await {
        Ok(RunOutcome::Finished) => {
            info!("exiting");
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::Cancelled) => {
            info!("stopped by signal");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "exiting");
            ExitCode::FAILURE
        }
    }
}
