//! Parses the command line arguments.
//!
//! Running a lossy transfer with logging on:
//!
//! ```cargo run -- --bytes 100000 --loss-rate 0.1 --rto-ms 100 --log```

use crate::transfer::{run_transfer, TransferOptions};
use anyhow::Context;
use clap::Parser;
use std::{
    fs::{create_dir_all, OpenOptions},
    sync::Arc,
    time::Duration,
};
use tracing_subscriber::FmtSubscriber;
use ustcp_core::TcpConfig;

/// Stores the different command line arguments.
#[derive(Parser, Debug)]
#[command(version, about = "Transfers data over user-space TCP on a simulated network")]
pub struct Args {
    /// Writes JSON logs to ./logs
    #[arg(short, long)]
    pub log: bool,
    /// Number of bytes the client sends
    #[arg(long, default_value_t = 100_000)]
    pub bytes: usize,
    /// Chance of losing each packet, between 0 and 1
    #[arg(long, default_value_t = 0.0)]
    pub loss_rate: f64,
    /// One-way network delay
    #[arg(long, default_value_t = 0)]
    pub latency_ms: u64,
    /// Seed for the payload and for packet loss
    #[arg(long, default_value_t = 0xBAD5EED)]
    pub seed: u64,
    /// Retransmission timeout
    #[arg(long, default_value_t = 1000)]
    pub rto_ms: u64,
    /// Retransmissions of a segment before the connection is given up
    #[arg(long, default_value_t = 10)]
    pub max_retransmits: u32,
    /// How long a closed connection lingers in TIME-WAIT
    #[arg(long, default_value_t = 5000)]
    pub time_wait_ms: u64,
}

impl Args {
    pub fn config(&self) -> TcpConfig {
        TcpConfig::default()
            .with_retransmit_timeout(Duration::from_millis(self.rto_ms))
            .with_max_retransmits(self.max_retransmits)
            .with_time_wait(Duration::from_millis(self.time_wait_ms))
    }

    pub fn options(&self) -> TransferOptions {
        TransferOptions {
            bytes: self.bytes,
            loss_rate: self.loss_rate,
            latency: Duration::from_millis(self.latency_ms),
            seed: self.seed,
            config: self.config(),
        }
    }
}

/// Parses the arguments and runs the transfer they describe.
pub async fn initialize_from_arguments() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.log {
        initialize_logging()?;
    }
    if !(0.0..=1.0).contains(&args.loss_rate) {
        anyhow::bail!("The loss rate must be between 0 and 1, got {}", args.loss_rate);
    }
    let report = run_transfer(args.options())
        .await
        .context("Transfer failed")?;
    println!("{report}");
    Ok(())
}

/// Sends every event to a JSON log file under ./logs. Only call once.
fn initialize_logging() -> anyhow::Result<()> {
    let main_path = "./logs";
    create_dir_all(main_path).context("Could not create the log directory")?;
    let file_path = format!(
        "{}/debug-{}.log",
        main_path,
        chrono::offset::Local::now().format("%y-%m-%d_%H-%M-%S")
    );
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(&file_path)
        .with_context(|| format!("Could not open {file_path}"))?;
    let subscriber = FmtSubscriber::builder()
        .with_writer(Arc::new(file))
        .with_max_level(tracing::Level::TRACE)
        .json()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("A global subscriber was already set")?;
    Ok(())
}
