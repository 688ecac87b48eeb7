// Copyright 2025 Servus Altissimi (Pseudonym)
//
// Permission is hereby granted, free of charge, to any person obtaining a copy of this software and associated documentation files (the "Software"), to deal in the Software without restriction, including without limitation the rights to use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is furnished to do so, subject to the following conditions:
// The above copyright notice and this permission notice shall be included in all copies or substantial portions of the Software.
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

use cake_core::prelude::*;
use cake_core::stats::StatsLogger;
use clap::{Parser, Subcommand};
use anyhow::Result;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Poisson};
use std::time::Duration;
use tracing::{info, Level};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a synthetic packet trace through one scheduler instance and
    /// print the resulting per-tin statistics.
    Run {
        /// Load a full `CakeParams` blob from a TOML file; overrides the
        /// flags below wherever a field is present.
        #[arg(short, long)]
        config: Option<String>,
        #[arg(short, long, default_value = "diffserv4")]
        mode: String,
        #[arg(short, long, default_value_t = 1_000_000)]
        rate: u64,
        #[arg(short = 'f', long, default_value_t = 4)]
        flows: u32,
        #[arg(short = 'n', long, default_value_t = 1000)]
        packets: u32,
        #[arg(short, long, default_value_t = 1500)]
        packet_size: u32,
        #[arg(long)]
        atm: bool,
        /// Append a per-tin stats snapshot to this CSV file every 100
        /// dequeued packets.
        #[arg(long)]
        log_csv: Option<String>,
    },

    /// List the four preset diffserv modes.
    Modes,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).with_target(false).init();

    match cli.command {
        Commands::Run { config, mode, rate, flows, packets, packet_size, atm, log_csv } => {
            let params = match config {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)?;
                    toml::from_str(&text)?
                }
                None => CakeParams { base_rate: rate, diffserv_mode: parse_mode(&mode)?, atm, ..Default::default() },
            };
            run_trace(params, flows, packets, packet_size, log_csv).await?;
        }
        Commands::Modes => {
            println!("Available diffserv modes:");
            for name in ["besteffort", "precedence", "diffserv4", "diffserv8"] {
                println!("  - {name}");
            }
            println!("\nUsage: cake-bench run --mode diffserv4 --rate 1000000");
        }
    }

    Ok(())
}

fn parse_mode(name: &str) -> Result<CakeMode> {
    match name.to_lowercase().as_str() {
        "besteffort" => Ok(CakeMode::BestEffort),
        "precedence" => Ok(CakeMode::Precedence),
        "diffserv4" => Ok(CakeMode::Diffserv4),
        "diffserv8" => Ok(CakeMode::Diffserv8),
        _ => anyhow::bail!("unknown diffserv mode: {name}"),
    }
}

async fn run_trace(
    params: CakeParams,
    flows: u32,
    packets: u32,
    packet_size: u32,
    log_csv: Option<String>,
) -> Result<()> {
    let mut sched = Scheduler::init(&params, 1024, 0xC4CE_5EED, RecordingWatchdog::default())?;
    let mut logger = log_csv.map(StatsLogger::new).transpose()?;

    let mut rng = StdRng::seed_from_u64(42);
    let poisson = Poisson::new(2.0).unwrap_or_else(|_| Poisson::new(1.0).unwrap());

    let mut now = TimeNs::ZERO;
    for i in 0..packets {
        let flow = rng.gen_range(0..flows.max(1));
        let key = FlowKey { src_ip: flow as u128, dst_ip: 1, src_port: 1000 + flow as u16, dst_port: 80, protocol: 6 };
        let dscp = (rng.gen_range(0u8..64)) & 0x3f;
        sched.enqueue(&key, Packet::new(PacketId(i as u64), packet_size, dscp, rng.gen_bool(0.3)), now);
        let gap_ms: f64 = poisson.sample(&mut rng).max(0.1);
        now = now + Duration::from_micros((gap_ms * 1000.0) as u64);
    }

    let mut sent = 0u32;
    let mut drain_time = now;
    while sent < packets {
        match sched.dequeue(drain_time) {
            Some(_) => {
                sent += 1;
                if sent % 100 == 0 {
                    if let Some(logger) = logger.as_mut() {
                        logger.log(sent as u64, &sched.dump_stats())?;
                    }
                }
            }
            None => drain_time = drain_time + Duration::from_micros(100),
        }
        if drain_time.as_nanos() > now.as_nanos() + 60_000_000_000 {
            break; // safety valve: stop after 60s of simulated idle draining
        }
    }

    let stats = sched.dump_stats();
    if let Some(logger) = logger.as_mut() {
        logger.log(sent as u64, &stats)?;
    }
    info!(memory_used = stats.memory_used, memory_limit = stats.memory_limit, "run complete");
    println!("{:<5} {:>10} {:>10} {:>10} {:>10} {:>8} {:>8}", "tin", "rate_bps", "packets", "bytes", "dropped", "ecn", "backlog");
    for (i, t) in stats.tins.iter().enumerate() {
        println!(
            "{:<5} {:>10} {:>10} {:>10} {:>10} {:>8} {:>8}",
            i, t.rate_bps, t.packets, t.bytes, t.dropped, t.ecn_marked, t.backlog_bytes
        );
    }

    Ok(())
}
