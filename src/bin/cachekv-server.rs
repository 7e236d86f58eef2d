//! this binary starts the cachekv server
//! to see the list of options, type: `cachekv-server --help`
//!
//! While the server runs it reads commands from STDIN, one per line:
//! - `s` prints the request totals and connection time statistics
//! - `r` resets the statistics
//! - `q` stops accepting connections, waits for open connections to finish and exits
//!
//! Closing STDIN leaves the server running.

use std::io::{self, BufRead};
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context};
use cachekv::config::{DEFAULT_CACHE_SIZE, DEFAULT_PORT, DEFAULT_STORAGE_DIR, DEFAULT_THREADS};
use cachekv::{
    FileBackend, KvStore, KvsEngine, KvsServer, ServerConfig, SharedQueueThreadPool, Shutdown,
    Stats, ThreadPool,
};
use clap::{crate_version, App, Arg, ArgMatches};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_ADDRESS: &str = "0.0.0.0:10801";
const DEFAULT_LOG_LEVEL: &str = "info";

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    config: ServerConfig,
    log_level: Level,
}

impl Opt {
    /// validates the command line options
    /// returns `Ok<Opt>` if everything is valid
    fn build(matches: &ArgMatches) -> anyhow::Result<Opt> {
        let addr = matches.value_of("addr").unwrap_or(DEFAULT_ADDRESS);
        let mut addr: SocketAddr = addr
            .parse()
            .map_err(|_| anyhow!("could not parse {} into an IP address and port", addr))?;
        if let Some(port) = matches.value_of("port") {
            let port = port
                .parse()
                .map_err(|_| anyhow!("{} is not a valid port", port))?;
            addr.set_port(port);
        }

        let threads = parse_number(matches, "threads", DEFAULT_THREADS)?;
        let cache_size = parse_number(matches, "cache-size", DEFAULT_CACHE_SIZE)?;
        let storage_dir = PathBuf::from(matches.value_of("dir").unwrap_or(DEFAULT_STORAGE_DIR));
        let config = ServerConfig {
            addr,
            threads,
            storage_dir,
            cache_size,
        };
        config.validate()?;

        let level = matches.value_of("log-level").unwrap_or(DEFAULT_LOG_LEVEL);
        let log_level = level
            .parse()
            .map_err(|_| anyhow!("unknown log level {}", level))?;

        Ok(Opt { config, log_level })
    }
}

fn parse_number<T: std::str::FromStr>(
    matches: &ArgMatches,
    name: &str,
    default: T,
) -> anyhow::Result<T> {
    match matches.value_of(name) {
        Some(value) => value
            .parse()
            .map_err(|_| anyhow!("--{} expects a non-negative number, got {}", name, value)),
        None => Ok(default),
    }
}

fn main() {
    let port_help = format!("overrides the port of --addr (default {})", DEFAULT_PORT);
    let matches = App::new("cachekv-server")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("a multi-threaded key-value store with a write-back cache")
        .arg(
            Arg::with_name("addr")
                .long("addr")
                .value_name("IP_ADDR:PORT")
                .help("sets the IP_ADDR:PORT that the server listens on")
                .default_value(DEFAULT_ADDRESS),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help(&port_help),
        )
        .arg(
            Arg::with_name("threads")
                .short("n")
                .long("threads")
                .value_name("COUNT")
                .help("sets the number of worker threads"),
        )
        .arg(
            Arg::with_name("dir")
                .long("dir")
                .value_name("PATH")
                .help("sets the storage directory, which is cleared at startup"),
        )
        .arg(
            Arg::with_name("cache-size")
                .long("cache-size")
                .value_name("ENTRIES")
                .help("sets the number of entries kept in memory, 0 disables the cache"),
        )
        .arg(
            Arg::with_name("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("one of trace, debug, info, warn or error")
                .default_value(DEFAULT_LOG_LEVEL),
        )
        .get_matches();

    let opt = match Opt::build(&matches) {
        Ok(opt) => opt,
        Err(err) => {
            eprintln!("{:#}", err);
            exit(1);
        }
    };

    // set up a tracing subscriber to log to STDERR
    subscriber_config(opt.log_level);

    if let Err(e) = run(opt) {
        error!("{:#}", e);
        exit(1);
    }
}

fn run(opt: Opt) -> anyhow::Result<()> {
    let config = opt.config;
    info!("cachekv-server {}", env!("CARGO_PKG_VERSION"));
    info!(
        threads = config.threads,
        cache_size = config.cache_size,
        "Storage directory: {}",
        config.storage_dir.display()
    );

    let backend = FileBackend::init(&config.storage_dir).with_context(|| {
        format!(
            "could not prepare storage directory {}",
            config.storage_dir.display()
        )
    })?;
    let engine = KvStore::new(backend, config.cache_size);
    let pool = SharedQueueThreadPool::new(config.threads)?;
    let listener = TcpListener::bind(config.addr)
        .with_context(|| format!("could not listen on {}", config.addr))?;

    let server = KvsServer::new(engine.clone(), pool);
    let stats = server.stats();
    {
        let stats = Arc::clone(&stats);
        let shutdown = server.shutdown_handle();
        thread::Builder::new()
            .name("console".to_string())
            .spawn(move || console(&stats, &shutdown))
            .context("could not start the console")?;
    }

    server.run_on(listener)?;

    engine
        .flush()
        .context("could not write the cache back to disk")?;
    let report = stats.report();
    info!("final statistics: {}", serde_json::to_string(&report)?);
    Ok(())
}

/// reads operator commands from STDIN until `q` or end of input
fn console(stats: &Stats, shutdown: &Shutdown) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("could not read from stdin: {}", e);
                break;
            }
        };
        match line.trim() {
            "s" => println!("{}", stats.report()),
            "r" => {
                stats.reset();
                println!("Statistics reset");
            }
            "q" => {
                shutdown.trigger();
                return;
            }
            "" => {}
            other => println!("Unknown command {:?}: use s, r or q", other),
        }
    }
    info!("stdin closed, the console is no longer available");
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config(level: Level) {
    let subscriber = FmtSubscriber::builder()
        // all spans/events at `level` or more severe are written
        .with_max_level(level)
        // log to stderr instead of stdout
        .with_writer(std::io::stderr)
        // completes the builder.
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting tracing default subscriber failed: {}", e);
    }
}
