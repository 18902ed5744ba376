mod dump;
mod proxy;
mod serve;
mod wire;

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use gdbtape_config::{load_or_default, resolve, Config, LogLevel, Overrides};
use gdbtape_core::logging::{
    default_log_file_path, log_level_to_filter, prepare_log_file, DEFAULT_MAX_LOG_FILES,
    DEFAULT_MAX_LOG_SIZE,
};
use gdbtape_repro::{ReproMode, ReproSession};
use tokio::net::{TcpListener, TcpStream};

/// Exit status when a replayed debugger asks for more than was recorded.
const EXIT_REPLAY_EXHAUSTED: i32 = 3;

/// Record and replay GDB remote protocol sessions.
#[derive(Debug, Parser)]
#[command(name = "gdbtape", version)]
struct Cli {
    /// Config file (default: <config dir>/gdbtape/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long, global = true, value_parser = parse_log_level)]
    log_level: Option<LogLevel>,

    /// Log to a file instead of stderr; without a value, the configured or
    /// platform default file.
    #[arg(long, global = true, num_args = 0..=1)]
    log_file: Option<Option<PathBuf>>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Relay a debugger to a live stub, capturing the exchange.
    Proxy(ProxyArgs),
    /// Act as the stub, answering from a captured exchange.
    Serve(ServeArgs),
    /// Print a captured exchange.
    Dump(DumpArgs),
}

#[derive(Debug, Args)]
struct ProxyArgs {
    /// Address the debugger connects to.
    #[arg(long)]
    listen: String,
    /// Address of the live stub.
    #[arg(long)]
    remote: String,
    /// Reproducer directory to capture into.
    #[arg(long)]
    dir: Option<PathBuf>,
    /// Clear a non-empty reproducer directory first.
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Address the debugger connects to.
    #[arg(long)]
    listen: String,
    /// Reproducer directory to replay.
    #[arg(long)]
    dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct DumpArgs {
    /// Reproducer directory to print.
    #[arg(long)]
    dir: Option<PathBuf>,
}

/// How a command ended, when it did not fail.
enum Outcome {
    Done,
    ReplayExhausted { consumed: usize },
}

fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    match s.to_ascii_lowercase().as_str() {
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" | "warning" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        other => Err(format!("unknown log level '{other}'")),
    }
}

impl Cli {
    fn overrides(&self) -> Overrides {
        let mut overrides = Overrides {
            log_level: self.log_level,
            log_file: self.log_file.clone().flatten(),
            ..Overrides::default()
        };
        match &self.command {
            Command::Proxy(args) => {
                overrides.generate = Some(true);
                overrides.path = args.dir.clone();
                overrides.force = args.force.then_some(true);
            }
            Command::Serve(args) => {
                overrides.generate = Some(false);
                overrides.path = args.dir.clone();
                overrides.force = Some(false);
            }
            Command::Dump(args) => {
                overrides.path = args.dir.clone();
            }
        }
        overrides
    }
}

fn init_logging(config: &Config, to_file: bool) -> Result<()> {
    let filter = log_level_to_filter(config.log.level.as_str());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    if to_file || config.log.file.is_some() {
        let log_path = config
            .log
            .file
            .clone()
            .unwrap_or_else(default_log_file_path);
        prepare_log_file(&log_path, DEFAULT_MAX_LOG_SIZE, DEFAULT_MAX_LOG_FILES)
            .with_context(|| format!("failed to prepare log file {}", log_path.display()))?;
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("failed to open log file {}", log_path.display()))?;
        tracing_subscriber::fmt()
            .with_writer(std::sync::Mutex::new(log_file))
            .with_ansi(false)
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
    }

    info!("gdbtape starting, log level: {}", filter);
    Ok(())
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")
}

/// Drive `work` until it completes or Ctrl-C arrives.
///
/// Returns `None` when interrupted. `work` is dropped at that point, which
/// cancels any accept or socket read it was waiting on.
fn run_until_interrupted<F: Future>(
    runtime: &tokio::runtime::Runtime,
    work: F,
) -> Result<Option<F::Output>> {
    runtime.block_on(async {
        tokio::select! {
            output = work => Ok(Some(output)),
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                Ok(None)
            }
        }
    })
}

async fn bind(listen: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to listen on {listen}"))?;
    // Printed on stdout so wrappers can discover an ephemeral port.
    println!("listening on {}", listener.local_addr()?);
    Ok(listener)
}

fn run_proxy(config: &Config, args: &ProxyArgs) -> Result<Outcome> {
    let mode = ReproMode::from_settings(&config.reproducer);
    let mut session = ReproSession::start(mode).context("failed to start capture")?;

    let runtime = build_runtime()?;
    let (listener, stub) = runtime.block_on(async {
        let listener = bind(&args.listen).await?;
        let stub = TcpStream::connect(args.remote.as_str())
            .await
            .with_context(|| format!("failed to connect to stub at {}", args.remote))?;
        anyhow::Ok((listener, stub))
    })?;
    let stub = session.install(|| Ok(stub))?;
    let (stub, recorder) = proxy::stub_parts(stub)?;

    let result = run_until_interrupted(&runtime, proxy::serve_one(&listener, stub, recorder))?;
    match result {
        Some(stats) => {
            let stats = stats?;
            info!(
                to_stub = stats.to_stub,
                to_debugger = stats.to_debugger,
                "proxy session ended"
            );
        }
        None => {
            warn!("interrupted, finalizing partial capture");
            runtime.shutdown_timeout(Duration::from_millis(100));
        }
    }

    session.finish().context("failed to write reproducer")?;
    if let Some(root) = session.root() {
        eprintln!("gdbtape: reproducer written to {}", root.display());
    }
    Ok(Outcome::Done)
}

fn run_serve(config: &Config, args: &ServeArgs) -> Result<Outcome> {
    let mode = ReproMode::from_settings(&config.reproducer);
    if !matches!(mode, ReproMode::Replay { .. }) {
        bail!("serve needs a reproducer directory (--dir or reproducer.path)");
    }
    let mut session = ReproSession::start(mode).context("failed to open reproducer")?;
    let engine = session.install_replay()?;
    let capacity = config.history.capacity;

    let runtime = build_runtime()?;
    let listener = runtime.block_on(bind(&args.listen))?;
    let result = run_until_interrupted(&runtime, serve::serve_one(&listener, engine, capacity))?;
    match result {
        Some(outcome) => match outcome? {
            serve::ServeOutcome::DebuggerDisconnected => Ok(Outcome::Done),
            serve::ServeOutcome::Exhausted { consumed } => {
                Ok(Outcome::ReplayExhausted { consumed })
            }
        },
        None => {
            warn!("interrupted");
            runtime.shutdown_timeout(Duration::from_millis(100));
            Ok(Outcome::Done)
        }
    }
}

fn run_dump(config: &Config) -> Result<Outcome> {
    let Some(root) = config.reproducer.path.as_deref() else {
        bail!("dump needs a reproducer directory (--dir or reproducer.path)");
    };
    let stdout = std::io::stdout();
    dump::dump(root, &mut stdout.lock())?;
    Ok(Outcome::Done)
}

fn load(cli: &Cli) -> Result<Config> {
    let config = load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;
    resolve(config, &cli.overrides()).context("invalid configuration")
}

fn run(cli: Cli) -> Result<Outcome> {
    let config = load(&cli)?;
    init_logging(&config, cli.log_file.is_some())?;

    match &cli.command {
        Command::Proxy(args) => run_proxy(&config, args),
        Command::Serve(args) => run_serve(&config, args),
        Command::Dump(_) => run_dump(&config),
    }
}

fn main() {
    let cli = Cli::parse();

    match run(cli) {
        Ok(Outcome::Done) => {}
        Ok(Outcome::ReplayExhausted { consumed }) => {
            eprintln!(
                "gdbtape: replay exhausted after {consumed} recorded packets; \
                 the debugger asked for more than was captured"
            );
            std::process::exit(EXIT_REPLAY_EXHAUSTED);
        }
        Err(e) => {
            eprintln!("gdbtape: {:#}", e);
            std::process::exit(1);
        }
    }
}
