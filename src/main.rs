use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use depthwatch::broker::BrokerClient;
use depthwatch::config::{EngineConfig, NotifierCredentials};
use depthwatch::notify::Notifier;
use depthwatch::orderbook::AlertThresholds;
use depthwatch::replay::replay_snapshots;
use depthwatch::{supervisor, EngineError};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{message}");
            print_usage();
            std::process::exit(2);
        }
    };

    if let Some(path) = &options.replay {
        if let Err(e) = run_replay(path, options.depth_levels) {
            tracing::error!(error = %e, "replay failed");
            std::process::exit(1);
        }
        return;
    }

    match run_engine(options).await {
        Ok(()) => tracing::info!("clean shutdown"),
        Err(e @ EngineError::FatalConfig(_)) => {
            tracing::error!(error = %e, "startup failed");
            std::process::exit(2);
        }
        Err(e) => {
            tracing::error!(error = %e, "engine terminated");
            std::process::exit(1);
        }
    }
}

async fn run_engine(options: Options) -> Result<(), EngineError> {
    let credentials = NotifierCredentials::from_env().map_err(EngineError::FatalConfig)?;
    let notifier = Arc::new(Notifier::from_credentials(credentials));
    if notifier.is_enabled() {
        tracing::info!("urgent-move notifications enabled");
    } else {
        tracing::warn!("notifier not configured, urgent moves will only be logged");
    }

    let symbols = match options.symbols {
        Some(symbols) => symbols,
        None => {
            tracing::info!(fiat = %options.fiat, "no --symbols given, querying broker");
            BrokerClient::new().list_trade_pairs(&options.fiat).await?
        }
    };

    let special: HashSet<String> = options.special.into_iter().collect();
    for symbol in &special {
        if !symbols.contains(symbol) {
            return Err(EngineError::FatalConfig(format!(
                "--special symbol {symbol} is not in the tracked set"
            )));
        }
    }

    let mut config = EngineConfig {
        symbols,
        special,
        out_dir: options.out_dir,
        depth_levels: options.depth_levels,
        ..EngineConfig::default()
    };
    if let Some(channel) = options.channel {
        config.stream.channel = channel;
    }
    supervisor::run(config, notifier).await
}

fn run_replay(path: &PathBuf, depth_levels: usize) -> anyhow::Result<()> {
    let steps = replay_snapshots(path, AlertThresholds::default(), depth_levels)?;
    tracing::info!(records = steps.len(), path = %path.display(), "replay loaded");
    for step in steps {
        println!(
            "{} {} mid={} spread={} imbalance={}",
            step.stats.timestamp.to_rfc3339(),
            step.stats.symbol,
            format_opt(step.stats.mid_price),
            format_opt(step.stats.spread),
            format_opt(step.stats.imbalance),
        );
        for alert in step.alerts {
            println!("  [{:?}] {}", alert.kind, alert.payload);
        }
        for (side, wall) in [("bid", step.bid_wall), ("ask", step.ask_wall)] {
            if let Some(wall) = wall {
                println!(
                    "  wall {side} @ {} cum_size={} avg={}",
                    wall.wall_price, wall.cum_wall_size, wall.avg_bucket_size
                );
            }
        }
    }
    Ok(())
}

fn format_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

struct Options {
    symbols: Option<Vec<String>>,
    special: Vec<String>,
    out_dir: PathBuf,
    channel: Option<String>,
    fiat: String,
    depth_levels: usize,
    replay: Option<PathBuf>,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut options = Options {
        symbols: None,
        special: Vec::new(),
        out_dir: PathBuf::from("./data"),
        channel: None,
        fiat: "USD".to_string(),
        depth_levels: 10,
        replay: None,
    };

    let mut i = 1;
    while i < args.len() {
        let take_value = |i: usize| -> Result<&String, String> {
            args.get(i + 1)
                .ok_or_else(|| format!("{} requires a value", args[i]))
        };
        match args[i].as_str() {
            "--symbols" => {
                options.symbols = Some(parse_list(take_value(i)?));
                i += 1;
            }
            "--special" => {
                options.special = parse_list(take_value(i)?);
                i += 1;
            }
            "--out" => {
                options.out_dir = PathBuf::from(take_value(i)?);
                i += 1;
            }
            "--channel" => {
                let channel = take_value(i)?.trim().to_string();
                if channel.is_empty() {
                    return Err("--channel must not be empty".to_string());
                }
                options.channel = Some(channel);
                i += 1;
            }
            "--fiat" => {
                options.fiat = take_value(i)?.to_uppercase();
                i += 1;
            }
            "--depth" => {
                options.depth_levels = take_value(i)?
                    .parse()
                    .map_err(|_| format!("invalid --depth value {:?}", args[i + 1]))?;
                if options.depth_levels == 0 {
                    return Err("--depth must be at least 1".to_string());
                }
                i += 1;
            }
            "--replay" => {
                options.replay = Some(PathBuf::from(take_value(i)?));
                i += 1;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 1;
    }

    if let Some(symbols) = &options.symbols {
        if symbols.is_empty() {
            return Err("--symbols must name at least one product".to_string());
        }
    }
    Ok(options)
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_uppercase())
        .filter(|item| !item.is_empty())
        .collect()
}

fn print_usage() {
    println!("depthwatch - multi-symbol L2 order book ingestion and analytics");
    println!();
    println!("USAGE:");
    println!("    depthwatch [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --symbols a,b,c     Products to track (default: query the broker)");
    println!("    --special a,b       Products persisted in full-book mode");
    println!("    --out <dir>         Output directory (default: ./data)");
    println!("    --channel <name>    Stream channel to subscribe (default: level2)");
    println!("    --fiat <ccy>        Quote currency for broker discovery (default: USD)");
    println!("    --depth <n>         Depth levels for statistics and alerts (default: 10)");
    println!("    --replay <file>     Replay a full-mode snapshot file and exit");
    println!("    --help, -h          Print this help message");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("    DEPTHWATCH_WS_URL          Stream endpoint override");
    println!("    DEPTHWATCH_BROKER_URL      Broker REST endpoint override");
    println!("    DEPTHWATCH_TG_BOT_TOKEN    Telegram bot token for urgent-move alerts");
    println!("    DEPTHWATCH_TG_CHAT_ID      Telegram chat id for urgent-move alerts");
    println!("    RUST_LOG                   Logging filter (default: info)");
    println!();
    println!("EXAMPLES:");
    println!("    # Track two pairs, full persistence for BTC");
    println!("    depthwatch --symbols BTC-USD,ETH-USD --special BTC-USD --out ./data");
    println!();
    println!("    # Discover the USD universe from the broker");
    println!("    depthwatch --fiat USD");
    println!();
    println!("    # Inspect a recorded session");
    println!("    depthwatch --replay ./data/order_book_BTC-USD_2025-08-07T16-35-06Z.jsonl.gz");
}
