use anyhow::Context;
use clap::Parser;
use nbdhs::{Client, HandshakeConfig, HandshakeFlags, TcpConnector, NBD_DEFAULT_PORT};
use std::time::Duration;
use tracing::info;

fn parse_flags(s: &str) -> Result<u16, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

/// Connect to an NBD server and check its fixed newstyle greeting.
#[derive(Parser)]
struct Opts {
    host: String,
    #[arg(long, default_value_t = NBD_DEFAULT_PORT)]
    port: u16,
    /// Handshake flag bits the server must set (decimal or 0x hex)
    #[arg(long, default_value = "0x0001", value_parser = parse_flags)]
    required_flags: u16,
    /// Per-read deadline, 0 waits forever
    #[arg(long, default_value_t = 30)]
    read_timeout_secs: u64,
    /// 0 waits forever
    #[arg(long, default_value_t = 30)]
    connect_timeout_secs: u64,
    #[arg(short, long)]
    verbose: bool,
}

fn secs(n: u64) -> Option<Duration> {
    if n == 0 {
        None
    } else {
        Some(Duration::from_secs(n))
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "nbdhs=debug,nbdhsctl=debug" } else { "nbdhs=info,nbdhsctl=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(true).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    init_tracing(opts.verbose);

    let connector = TcpConnector {
        port: opts.port,
        connect_timeout: secs(opts.connect_timeout_secs),
        ..TcpConnector::new(opts.host.clone())
    };
    let config = HandshakeConfig {
        required_flags: HandshakeFlags::from_wire(opts.required_flags),
        read_timeout: secs(opts.read_timeout_secs),
    };
    let conn = Client::new(connector, config)
        .connect()
        .await
        .with_context(|| format!("handshake with {}:{} failed", opts.host, opts.port))?;

    let flags = conn.flags();
    info!(no_zeroes = conn.established().no_zeroes(), "server flags {:#06x}", flags.bits());
    println!("{}:{} established, handshake flags {:#06x}", opts.host, opts.port, flags.bits());
    Ok(())
}
