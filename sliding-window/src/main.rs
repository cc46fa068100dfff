//! Entry point for `sliding-window`.
//!
//! Parses CLI arguments and dispatches into either **server** (receiver) or
//! **client** (sender) mode.  All protocol work is delegated to library
//! modules; `main.rs` owns only process setup (logging, argument parsing).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use sliding_window::config::{SessionConfig, DEFAULT_ADDR};
use sliding_window::error::SessionError;
use sliding_window::loss::{DropOnce, LossSource, RandomLoss};
use sliding_window::report::ReportDir;
use sliding_window::session;

/// Sliding-window reliability and flow control over a lossy channel.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run as the receiver, waiting for one sender.
    Server {
        /// Local address to bind.
        #[arg(short, long, default_value = DEFAULT_ADDR)]
        bind: SocketAddr,

        #[command(flatten)]
        common: Common,
    },
    /// Run as the sender, streaming segments to a server.
    Client {
        /// Remote server address.
        #[arg(short, long, default_value = DEFAULT_ADDR)]
        server: SocketAddr,

        /// Initial window size.
        #[arg(long, default_value_t = 10)]
        window: u32,

        /// Upper bound on the window size.
        #[arg(long, default_value_t = 200)]
        max_window: u32,

        /// Retransmission timeout in milliseconds.
        #[arg(long, default_value_t = 200)]
        rto_ms: u64,

        /// Probability that a transmission is dropped.
        #[arg(short = 'p', long, default_value_t = 0.01)]
        drop_probability: f64,

        /// Seed for the loss generator.
        #[arg(long)]
        seed: Option<u64>,

        /// Number of segments to send.
        #[arg(short = 'n', long, default_value_t = 10_000)]
        segments: u32,

        /// Drop the first transmission of these sequence numbers instead of
        /// dropping at random.
        #[arg(long, value_delimiter = ',')]
        drop_seq: Vec<u32>,

        /// Fail after this many retransmissions of one segment.
        #[arg(long)]
        max_retransmissions: Option<u32>,

        #[command(flatten)]
        common: Common,
    },
}

#[derive(Args)]
struct Common {
    /// Directory that receives the report files.
    #[arg(short, long, default_value = "reports")]
    report_dir: PathBuf,

    /// Segments between periodic goodput samples and progress lines.
    #[arg(long, default_value_t = 1_000)]
    report_interval: u32,

    /// Handshake timeout in seconds.
    #[arg(long, default_value_t = 5)]
    handshake_timeout: u64,
}

impl Common {
    fn apply(&self, config: &mut SessionConfig) {
        config.report_interval = self.report_interval;
        config.progress_interval = self.report_interval;
        config.handshake_timeout = Duration::from_secs(self.handshake_timeout);
    }
}

/// Attach a context that separates a failed bootstrap from a failed transfer.
fn describe_failure(err: SessionError, role: &str, addr: SocketAddr) -> anyhow::Error {
    let context = if err.is_bootstrap_failure() {
        format!("{role} could not set up a session with {addr}")
    } else {
        format!("{role} session with {addr} failed")
    };
    anyhow::Error::new(err).context(context)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default level.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Server { bind, common } => {
            let mut config = SessionConfig {
                addr: bind,
                ..SessionConfig::default()
            };
            common.apply(&mut config);
            let mut sink = ReportDir::new(&common.report_dir);

            log::info!("Starting server on {bind}");
            let report = session::run_server(&config, &mut sink)
                .await
                .map_err(|e| describe_failure(e, "receiver", bind))?;
            println!("{report}");
            log::info!("reports written to {}", sink.path().display());
        }
        Mode::Client {
            server,
            window,
            max_window,
            rto_ms,
            drop_probability,
            seed,
            segments,
            drop_seq,
            max_retransmissions,
            common,
        } => {
            let mut config = SessionConfig {
                addr: server,
                initial_window: window,
                max_window,
                growth_warmup: window,
                rto: Duration::from_millis(rto_ms),
                drop_probability,
                seed,
                total_segments: segments,
                max_retransmissions,
                ..SessionConfig::default()
            };
            common.apply(&mut config);
            config.validate().context("invalid client options")?;

            let loss: Box<dyn LossSource> = if drop_seq.is_empty() {
                Box::new(RandomLoss::for_config(&config))
            } else {
                Box::new(DropOnce::new(drop_seq))
            };
            let mut sink = ReportDir::new(&common.report_dir);

            log::info!("Starting client, connecting to {server}");
            let report = session::run_client(&config, loss, &mut sink)
                .await
                .map_err(|e| describe_failure(e, "sender", server))?;
            println!("{report}");
            log::info!("reports written to {}", sink.path().display());
        }
    }
    Ok(())
}
