//! CLI for the tsrip segment fetcher.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tsrip_core::config;

use commands::{run_bench, run_checksum, run_fetch, run_probe};

/// Top-level CLI for tsrip.
#[derive(Debug, Parser)]
#[command(name = "tsrip")]
#[command(about = "tsrip: concurrent HLS segment fetcher and stream assembler", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Fetch all segments of a media playlist and assemble one output file.
    Fetch {
        /// Playlist URL (http/https) or path to a local .m3u8 file.
        playlist: String,

        /// Output file path.
        #[arg(short, long, default_value = "output.ts")]
        output: PathBuf,

        /// Override the configured number of concurrent fetches.
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,

        /// Override the configured per-fetch timeout, in seconds.
        #[arg(long, value_name = "SECS")]
        timeout_secs: Option<u64>,

        /// Delete partial output instead of keeping the `.part` file when
        /// the merge fails.
        #[arg(long)]
        discard_partial: bool,

        /// Print the SHA-256 of the assembled file on success.
        #[arg(long)]
        checksum: bool,
    },

    /// List a playlist's resolved segment URIs without fetching payloads.
    Probe {
        /// Playlist URL (http/https) or path to a local .m3u8 file.
        playlist: String,
    },

    /// Benchmark admission limits (4, 8, 16) against a playlist.
    Bench {
        /// Playlist URL (http/https) or path to a local .m3u8 file.
        playlist: String,
    },

    /// Compute SHA-256 of a file (e.g. after a fetch).
    Checksum {
        /// Path to the file.
        path: String,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Fetch {
                playlist,
                output,
                concurrency,
                timeout_secs,
                discard_partial,
                checksum,
            } => {
                run_fetch(
                    &cfg,
                    &playlist,
                    &output,
                    concurrency,
                    timeout_secs,
                    discard_partial,
                    checksum,
                )
                .await?
            }
            CliCommand::Probe { playlist } => run_probe(&cfg, &playlist).await?,
            CliCommand::Bench { playlist } => run_bench(&cfg, &playlist).await?,
            CliCommand::Checksum { path } => run_checksum(std::path::Path::new(&path)).await?,
        }

        Ok(())
    }
}
