mod bandwidth;
mod poll;
mod stat;

use std::time::Duration;

use clap::{Parser, Subcommand};

use bandwidth::do_bandwidth;
use poll::do_poll;
use stat::do_stat;

#[derive(Parser)]
#[command(
    name = "dmcstat",
    about = "Hardware performance counter sessions for DMC-620 memory controllers and CPU PMUs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List event sources matching a name prefix
    List {
        #[arg(short, long, default_value = "")]
        prefix: String,
    },
    /// Measure memory traffic through DMC-620 bus access counters
    Bandwidth {
        #[arg(short, long, default_value = "arm_dmc620")]
        prefix: String,
        /// Length of the measurement interval
        #[arg(short, long, default_value_t = 5)]
        seconds: u64,
        /// CPU the system-wide counters are bound to
        #[arg(short, long, default_value_t = 0)]
        cpu: i32,
    },
    /// Count CPU events over a built-in workload as one atomic group
    Stat {
        /// Iterations of the measured workload
        #[arg(short, long, default_value_t = 2_000_000_000)]
        loops: u64,
        /// Extra raw event codes to add to the group
        #[arg(short, long)]
        raw: Vec<u64>,
    },
    /// Continuously print instruction and cycle counts until interrupted
    Poll {
        #[arg(short, long, default_value_t = 1000)]
        period_ms: u64,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Cli::parse();

    match args.command {
        Commands::List { prefix } => {
            let found = pmu::enumerate_sources(&prefix)?;
            for src in &found.sources {
                println!("{} (type {})", src.name, src.type_id);
            }
            Ok(())
        }
        Commands::Bandwidth {
            prefix,
            seconds,
            cpu,
        } => do_bandwidth(&prefix, seconds, cpu),
        Commands::Stat { loops, raw } => do_stat(loops, &raw),
        Commands::Poll { period_ms } => do_poll(Duration::from_millis(period_ms)),
    }
}
