use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::debug;
use tunconf_core::config::Config;
use tunconf_core::logging::{init_logging, LogOptions};
use tunconf_core::model::{build_set_request, decode_config, DriverConfig, PeerChange};
use tunconf_core::proto::{AllowedIpRecord, Field, InterfaceRecord, PeerRecord};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogLevelArg {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevelArg> for tracing::Level {
    fn from(level: LogLevelArg) -> Self {
        match level {
            LogLevelArg::Trace => tracing::Level::TRACE,
            LogLevelArg::Debug => tracing::Level::DEBUG,
            LogLevelArg::Info => tracing::Level::INFO,
            LogLevelArg::Warn => tracing::Level::WARN,
            LogLevelArg::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, after_help = "Examples:\n  tunconfctl decode --input wg0.bin --output json\n  tunconfctl encode --input wg0.json --out wg0.bin\n  tunconfctl layout")]
struct Args {
    /// Log level (overrides the configuration file)
    #[arg(short, long, value_enum, ignore_case = true, env = "TUNCONF_LOG_LEVEL")]
    log_level: Option<LogLevelArg>,

    /// Emit logs as JSON
    #[arg(long, env = "TUNCONF_JSON_LOGS")]
    json_logs: bool,

    /// Configuration file (default: platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a get-configuration buffer captured from the driver
    Decode {
        /// Raw buffer file
        #[arg(long)]
        input: PathBuf,

        /// Output format for the decoded configuration
        #[arg(long, value_enum, default_value = "table")]
        output: OutputFormat,
    },
    /// Assemble a set-configuration buffer from JSON
    Encode {
        /// JSON file holding an interface and its peers
        #[arg(long)]
        input: PathBuf,

        /// Where to write the buffer
        #[arg(long)]
        out: PathBuf,
    },
    /// Print record sizes and field offsets
    Layout,
}

#[derive(Serialize)]
struct Message<'a> {
    status: &'a str,
    detail: &'a str,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Config::load_or_default().context("loading default configuration"),
    }
}

fn print_table(config: &DriverConfig) {
    let iface = &config.interface;
    println!("interface:");
    if let Some(key) = &iface.public_key {
        println!("  public key: {key}");
    }
    if iface.private_key.is_some() {
        println!("  private key: (hidden)");
    }
    if let Some(port) = iface.listen_port {
        println!("  listening port: {port}");
    }
    if iface.replace_peers {
        println!("  replace peers: yes");
    }

    for peer in &config.peers {
        println!();
        println!("peer: {}", peer.public_key);
        let settings = match &peer.change {
            PeerChange::Remove => {
                println!("  action: remove");
                continue;
            }
            PeerChange::Update(settings) => {
                println!("  action: update");
                settings
            }
            PeerChange::Set(settings) => settings,
        };
        if settings.preshared_key.is_some() {
            println!("  preshared key: (hidden)");
        }
        if let Some(endpoint) = settings.endpoint {
            println!("  endpoint: {endpoint}");
        }
        if !settings.allowed_ips.is_empty() {
            let ips: Vec<String> = settings.allowed_ips.iter().map(|ip| ip.to_string()).collect();
            println!("  allowed ips: {}", ips.join(", "));
        }
        if let Some(keepalive) = settings.persistent_keepalive {
            println!("  persistent keepalive: every {keepalive} seconds");
        }
        let stats = &settings.stats;
        if let Some(at) = stats.last_handshake_time() {
            let ago = at.elapsed().map(|d| d.as_secs()).unwrap_or(0);
            println!("  latest handshake: {ago} seconds ago");
        }
        if stats.rx_bytes != 0 || stats.tx_bytes != 0 {
            println!(
                "  transfer: {} B received, {} B sent",
                stats.rx_bytes, stats.tx_bytes
            );
        }
    }
}

fn print_layout() {
    let records: [(&str, usize, &[Field]); 3] = [
        ("interface", InterfaceRecord::SIZE, InterfaceRecord::FIELDS),
        ("peer", PeerRecord::SIZE, PeerRecord::FIELDS),
        ("allowed ip", AllowedIpRecord::SIZE, AllowedIpRecord::FIELDS),
    ];
    for (name, size, fields) in records {
        println!("{name} ({size} bytes)");
        for field in fields {
            println!(
                "  {:<22} {:>3}..{:<3} ({} bytes)",
                field.name,
                field.offset,
                field.offset + field.size,
                field.size
            );
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    let mut options = LogOptions::from_config(&config);
    if let Some(level) = args.log_level {
        options.level = level.into();
    }
    options.json_format |= args.json_logs;
    let _guard = init_logging(options);

    match args.command {
        Command::Decode { input, output } => {
            let bytes =
                fs::read(&input).with_context(|| format!("reading {}", input.display()))?;
            let decoded = decode_config(&bytes)
                .with_context(|| format!("decoding {}", input.display()))?;
            debug!(len = bytes.len(), peers = decoded.peers.len(), "Decoded buffer");
            match output {
                OutputFormat::Table => print_table(&decoded),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&decoded)?),
            }
        }
        Command::Encode { input, out } => {
            let text = fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let config: DriverConfig = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", input.display()))?;
            let buffer = build_set_request(&config.interface, &config.peers)?;
            fs::write(&out, buffer.as_bytes())
                .with_context(|| format!("writing {}", out.display()))?;
            let detail = format!(
                "{} bytes, {} peers written to {}",
                buffer.len(),
                config.peers.len(),
                out.display()
            );
            let msg = Message {
                status: "ok",
                detail: &detail,
            };
            println!("{}", serde_json::to_string_pretty(&msg)?);
        }
        Command::Layout => print_layout(),
    }

    Ok(())
}
