//! RIFT CLI
//!
//! Rendezvous-Initiated Firewall Traversal for TCP

mod config;

use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rift_core::{
    Delta, DeltaType, IfaceEntry, Mapping, NatDescriptor, NatType, PeerAddr, PortRange,
    ReusableRoute, Route, SyncedClock, TimeSource,
};
use rift_probe::{ClockSynchronizer, LocalMappingProbe, SntpSource};
use rift_punch::{Endpoint, PunchCoordinator, PunchMode, Predictor, SignalHub};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use config::Config;

/// RIFT - TCP hole punching across NATs
#[derive(Parser)]
#[command(name = "rift")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, default_value = "~/.config/rift/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate local clock skew against SNTP servers
    Clock {
        /// Servers to query instead of the configured ones (host:port)
        #[arg(short, long)]
        server: Vec<String>,
    },

    /// Encode or decode peer addresses
    Addr {
        #[command(subcommand)]
        action: AddrCommands,
    },

    /// Predict mappings for a pair of NATs without touching the network
    Predict {
        /// Our NAT as type/delta[:value]
        #[arg(long, default_value = "open/na")]
        ours: String,

        /// Their NAT as type/delta[:value]
        #[arg(long, default_value = "open/na")]
        theirs: String,

        /// Our external port range as min-max
        #[arg(long)]
        range: Option<String>,

        /// Number of mappings to predict
        #[arg(short = 'n', long, default_value_t = 2)]
        count: usize,

        /// Punch mode (lan, remote, self)
        #[arg(short, long, default_value = "remote")]
        mode: String,

        /// Known mappings as remote,reply,local (repeatable)
        #[arg(long)]
        last: Vec<String>,
    },

    /// Punch a connection between two local coordinators
    SelfPunch {
        /// Pipe identifier
        #[arg(short, long, default_value = "pipe-1")]
        pipe: String,

        /// Message sent over the punched stream
        #[arg(short, long, default_value = "hello")]
        message: String,
    },
}

#[derive(Subcommand)]
enum AddrCommands {
    /// Print our configured address in text and binary form
    Encode,

    /// Decode an address from text or hex
    Decode {
        /// Address text, or hex of the binary form
        #[arg(required = true)]
        input: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose { "debug" } else { "info" })
        .init();

    // Load configuration
    let config_path = PathBuf::from(&cli.config);
    let config = if config_path.exists() {
        Config::load(&config_path)?
    } else if config_path == Config::default_path() {
        Config::load_or_default()?
    } else {
        Config::default()
    };

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Clock { server } => {
            estimate_clock(server, &config).await?;
        }
        Commands::Addr { action } => match action {
            AddrCommands::Encode => encode_addr(&config)?,
            AddrCommands::Decode { input } => decode_addr(&input, &config)?,
        },
        Commands::Predict {
            ours,
            theirs,
            range,
            count,
            mode,
            last,
        } => {
            predict(&ours, &theirs, range.as_deref(), count, &mode, &last)?;
        }
        Commands::SelfPunch { pipe, message } => {
            self_punch(&pipe, &message, &config).await?;
        }
    }

    Ok(())
}

/// Parse `type/delta[:value]`
fn parse_nat(text: &str) -> anyhow::Result<NatDescriptor> {
    let (nat_type, delta) = text
        .split_once('/')
        .ok_or_else(|| anyhow::anyhow!("NAT '{}' must be type/delta[:value]", text))?;
    let nat_type: NatType = nat_type.parse()?;
    let (kind, value) = match delta.split_once(':') {
        Some((kind, value)) => (kind, value.parse()?),
        None => (delta, 0),
    };
    let kind: DeltaType = kind.parse()?;
    Ok(NatDescriptor::new(nat_type, Delta::new(kind, value)))
}

/// Parse `min-max`
fn parse_range(text: &str) -> anyhow::Result<PortRange> {
    let (min, max) = text
        .split_once('-')
        .ok_or_else(|| anyhow::anyhow!("Range '{}' must be min-max", text))?;
    Ok(PortRange::new(min.trim().parse()?, max.trim().parse()?)?)
}

/// Our advertised address built from the configuration
fn our_addr(config: &Config, node_id: &str) -> anyhow::Result<PeerAddr> {
    let nat = config.nat()?;
    Ok(PeerAddr::new(node_id).with_interface(IfaceEntry {
        if_index: config.node.if_index,
        addr_index: 0,
        ext_ip: config.external_ip()?,
        nic_ip: config.bind_ip()?,
        port: config.network.listen_port,
        nat_type: nat.nat_type,
        delta: nat.delta,
    }))
}

/// Estimate clock skew
async fn estimate_clock(servers: Vec<String>, config: &Config) -> anyhow::Result<()> {
    let runtime = config.to_runtime();
    let servers = if servers.is_empty() {
        config.clock.ntp_servers.clone()
    } else {
        servers
    };

    let mut sources: Vec<Arc<dyn TimeSource>> = Vec::new();
    for server in &servers {
        match tokio::net::lookup_host(server.as_str()).await {
            Ok(mut addrs) => {
                if let Some(addr) = addrs.next() {
                    tracing::debug!("Using {} at {}", server, addr);
                    sources.push(Arc::new(
                        SntpSource::new(addr).with_timeout(runtime.clock.query_timeout),
                    ));
                }
            }
            Err(e) => tracing::warn!("Cannot resolve {}: {}", server, e),
        }
    }
    if sources.is_empty() {
        anyhow::bail!("No NTP server could be resolved");
    }

    tracing::info!("Querying {} time servers", sources.len());
    let synchronizer = ClockSynchronizer::new(sources, runtime.clock);
    let estimate = synchronizer.estimate().await?;

    println!("Servers: {}", servers.join(", "));
    println!("Samples: {}", estimate.samples);
    println!("Skew: {:.3} ms", estimate.skew_ms);
    println!("Deviation: {:.3} ms", estimate.sdev_ms);
    println!(
        "Synchronized time: {:.3}",
        SyncedClock::new(estimate.skew_ms).now()
    );

    Ok(())
}

/// Print our address
fn encode_addr(config: &Config) -> anyhow::Result<()> {
    let addr = our_addr(config, &config.node.node_id)?;
    let signal_servers = config.to_runtime().punch.signal_servers;
    addr.validate(signal_servers)?;

    println!("Text: {}", addr);
    println!("Binary: {}", hex::encode(addr.to_bytes()?));
    Ok(())
}

/// Decode an address from text or hex
fn decode_addr(input: &str, config: &Config) -> anyhow::Result<()> {
    let signal_servers = config.to_runtime().punch.signal_servers;
    let addr = match hex::decode(input.trim()) {
        Ok(bytes) => PeerAddr::from_bytes(&bytes, signal_servers)?,
        Err(_) => PeerAddr::parse(input, signal_servers)?,
    };

    println!("Node: {}", addr.node_id);
    println!("Signaling servers: {:?}", addr.signal);
    for entry in addr.v4.iter().chain(addr.v6.iter()) {
        println!(
            "  if{} v{}: ext={} nic={} port={} nat={} delta={}",
            entry.if_index,
            entry.af(),
            entry.ext_ip,
            entry.nic_ip,
            entry.port,
            entry.nat_type,
            entry.delta
        );
    }
    Ok(())
}

/// Offline prediction
fn predict(
    ours: &str,
    theirs: &str,
    range: Option<&str>,
    count: usize,
    mode: &str,
    last: &[String],
) -> anyhow::Result<()> {
    let mut ours = parse_nat(ours)?;
    if let Some(range) = range {
        ours = ours.with_range(parse_range(range)?);
    }
    let theirs = parse_nat(theirs)?;
    let mode: PunchMode = mode.parse()?;
    let known = last
        .iter()
        .map(|m| m.parse::<Mapping>())
        .collect::<Result<Vec<_>, _>>()?;

    let predictor = Predictor::new(mode, ours, theirs, count)?;
    let mut rng = StdRng::from_entropy();
    let targets = predictor.targets(&mut rng);

    println!("Mode: {}", mode);
    println!("Ours: {} {}", ours.nat_type, ours.delta);
    println!("Theirs: {} {}", theirs.nat_type, theirs.delta);
    println!("Strategy: {:?}", predictor.strategy());
    println!("Range: {}", predictor.range());
    if predictor.uses_stun_port() {
        println!("Targets pinned to the STUN port");
    }

    let mappings = predictor.predict_all(&targets, &known, &mut rng)?;
    println!();
    println!("{:>8} {:>8} {:>8}", "remote", "reply", "local");
    for mapping in &mappings {
        println!(
            "{:>8} {:>8} {:>8}",
            mapping.remote, mapping.reply, mapping.local
        );
    }
    Ok(())
}

/// Punch between two coordinators sharing this host
async fn self_punch(pipe: &str, message: &str, config: &Config) -> anyhow::Result<()> {
    let runtime = config.to_runtime();
    let route: Arc<dyn Route> = Arc::new(ReusableRoute::new(
        config.bind_ip()?,
        config.external_ip()?,
        config.node.if_index,
    ));
    let hub = SignalHub::new();

    let spawn = |name: String| -> anyhow::Result<PunchCoordinator> {
        let (signaling, inbox) = hub.join(name.clone());
        let endpoint = Endpoint {
            addr: our_addr(config, &name)?,
            route: Arc::clone(&route),
            nat: NatDescriptor::open(),
            probe: Some(Arc::new(LocalMappingProbe::new(Arc::clone(&route)))),
        };
        let coordinator = PunchCoordinator::new(
            endpoint,
            Arc::new(signaling),
            SyncedClock::local(),
            runtime.punch.clone(),
        );
        coordinator.spawn_listener(inbox);
        Ok(coordinator)
    };

    let initiator = spawn(format!("{}.a", config.node.node_id))?;
    let recipient = spawn(format!("{}.b", config.node.node_id))?;
    initiator.start().await?;
    recipient.start().await?;

    let theirs = our_addr(config, recipient.node_id())?;
    tracing::info!(
        "Punching {} -> {} over pipe {}",
        initiator.node_id(),
        recipient.node_id(),
        pipe
    );

    let (connected, accepted) =
        tokio::join!(initiator.connect(&theirs, pipe), recipient.accept());
    let mut stream = connected?;
    let mut punched = accepted?;

    println!("Initiator: {}", stream.local_addr()?);
    println!("Recipient: {}", punched.stream.local_addr()?);

    stream.write_all(message.as_bytes()).await?;
    stream.shutdown().await?;
    let mut received = Vec::new();
    tokio::time::timeout(
        Duration::from_secs(5),
        punched.stream.read_to_end(&mut received),
    )
    .await??;
    println!("Received: {}", String::from_utf8_lossy(&received));

    initiator.close().await;
    recipient.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nat() {
        let nat = parse_nat("restrict_port/dependent:4").unwrap();
        assert_eq!(nat.nat_type, NatType::RestrictPort);
        assert_eq!(nat.delta, Delta::new(DeltaType::Dependent, 4));

        let nat = parse_nat("open/na").unwrap();
        assert!(nat.is_open());

        assert!(parse_nat("open").is_err());
        assert!(parse_nat("open/sideways").is_err());
        assert!(parse_nat("open/dependent:x").is_err());
    }

    #[test]
    fn test_parse_range() {
        let range = parse_range("2000-3000").unwrap();
        assert_eq!(range.min(), 2000);
        assert_eq!(range.max(), 3000);
        assert!(parse_range("3000").is_err());
        assert!(parse_range("3000-2000").is_err());
    }

    #[test]
    fn test_our_addr_roundtrip() {
        let config = Config::default();
        let addr = our_addr(&config, "alice").unwrap();
        assert_eq!(addr.v4.len(), 1);
        let text = addr.to_string();
        assert_eq!(PeerAddr::parse(&text, 1).unwrap(), addr);
    }

    #[test]
    fn test_offline_predict() {
        assert!(predict("open/na", "open/na", None, 3, "remote", &[]).is_ok());
        assert!(
            predict(
                "restrict_port/dependent:4",
                "full_cone/na",
                None,
                2,
                "remote",
                &["30000,0,44330".to_string()]
            )
            .is_ok()
        );
        assert!(predict("symmetric/random", "open/na", None, 2, "remote", &[]).is_err());
    }
}
