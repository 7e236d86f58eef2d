//! The cachekv-client executable supports the following command line arguments:
//!
//! `cachekv-client set <KEY> <VALUE> [--addr IP-PORT]`
//!
//!     Store VALUE under KEY.
//!
//! `cachekv-client get <KEY> [--addr IP-PORT]`
//!
//!     Print the value of KEY, or "Key not found".
//!
//! `cachekv-client rm <KEY> [--addr IP-PORT]`
//!
//!     Remove KEY.
//!
//! `--addr` accepts an IP address, either v4 or v6, and a port number, with the format IP:PORT.
//! If it is not specified the client connects to 127.0.0.1:10801.
//! An error is printed and a non-zero exit code returned if the server cannot be reached, refuses
//! a `set` or `rm`, or if IP-PORT does not parse as an address.
//!
//! `cachekv-client -V`
//!
//!     Print the version.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::process::exit;

use anyhow::{anyhow, bail, Context};
use cachekv::protocol::{Request, RequestKind};
use cachekv::KvsClient;
use clap::{crate_version, App, AppSettings, Arg, ArgMatches, SubCommand};
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_ADDRESS: &str = "127.0.0.1:10801";

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    /// the server's ip:port
    addr: SocketAddr,
    req: Request,
}

impl Opt {
    /// validates the `addr` parameter is a valid IP address and PORT
    fn build(addr: &str, req: Request) -> anyhow::Result<Opt> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| anyhow!("could not parse {} into an IP address and port", addr))?;
        Ok(Opt { addr, req })
    }
}

fn main() {
    // configure a subscriber that will log messages to STDERR
    subscriber_config();

    let matches = App::new("cachekv-client")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("a client for the cachekv key-value server")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .subcommands(vec![
            SubCommand::with_name("set")
                .about("Set the value of a key")
                .arg(Arg::with_name("KEY").required(true).index(1))
                .arg(Arg::with_name("VALUE").required(true).index(2)),
            SubCommand::with_name("get")
                .about("Get the value of a key")
                .arg(Arg::with_name("KEY").required(true).index(1)),
            SubCommand::with_name("rm")
                .about("Removes a given key")
                .arg(Arg::with_name("KEY").required(true).index(1)),
        ])
        .arg(
            Arg::with_name("addr")
                .long("addr")
                .value_name("IP_ADDR:PORT")
                .help("sets the IP_ADDR:PORT of the server to connect to")
                .default_value(DEFAULT_ADDRESS)
                .global(true),
        )
        .get_matches();

    let result = parse_options(&matches).and_then(run);
    if let Err(e) = result {
        eprintln!("{:#}", e);
        exit(1);
    }
}

/// runs the specified request on a [`KvsClient`]
fn run(opt: Opt) -> anyhow::Result<()> {
    debug!("connecting to {}", opt.addr);
    let mut client = KvsClient::connect(opt.addr)
        .with_context(|| format!("could not connect to {}", opt.addr))?;
    let Request { kind, key, body } = opt.req;
    match kind {
        RequestKind::Get => match client.get(&key)? {
            Some(value) => {
                let mut stdout = io::stdout();
                stdout.write_all(&value)?;
                stdout.write_all(b"\n")?;
            }
            None => println!("Key not found"),
        },
        RequestKind::Post => {
            if !client.set(&key, body)? {
                bail!("the server did not store {}", key);
            }
        }
        RequestKind::Delete => {
            if !client.remove(&key)? {
                bail!("the server could not remove {}", key);
            }
        }
    }
    Ok(())
}

/// parses the matches from the command line into an [`Opt`] struct
fn parse_options(matches: &ArgMatches) -> anyhow::Result<Opt> {
    let (name, args) = matches.subcommand();
    let args = args.ok_or_else(|| anyhow!("a command is required"))?;
    let addr = args
        .value_of("addr")
        .or_else(|| matches.value_of("addr"))
        .unwrap_or(DEFAULT_ADDRESS);
    let key = args.value_of("KEY").unwrap_or_default();
    match name {
        "set" => {
            let value = args.value_of("VALUE").unwrap_or_default();
            Opt::build(addr, Request::post(key, value))
        }
        "get" => Opt::build(addr, Request::get(key)),
        "rm" => Opt::build(addr, Request::delete(key)),
        other => bail!("unknown command {}", other),
    }
}

/// configures a tracing subscriber that will log warnings and errors to STDERR
fn subscriber_config() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        // log to stderr instead of stdout
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting tracing default subscriber failed: {}", e);
    }
}
