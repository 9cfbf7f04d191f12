// crates/cli/src/main.rs
//! `subtitler`: drive subtitle burn-in exports from the terminal.

mod export;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use subtitler_core::{CleanupTarget, HttpTransport};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "subtitler")]
#[command(about = "Submit subtitle burn-in exports to the render service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Render service base URL (overrides config and SUBTITLER_RENDER_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a request and download the result
    Export {
        /// Render request JSON file
        #[arg(short, long)]
        request: PathBuf,

        /// Where to write the rendered video
        #[arg(short, long)]
        out: PathBuf,

        /// Keep the upload and render job on the server afterwards
        #[arg(long)]
        keep: bool,
    },

    /// Release server-side resources
    Cleanup {
        /// Upload id to delete
        #[arg(long)]
        upload: Option<String>,

        /// Export token to delete
        #[arg(long)]
        export: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "info,subtitler_core=debug,subtitler_cli=debug"
    } else {
        "warn,subtitler_cli=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = settings::resolve_config(cli.config.as_deref(), cli.base_url.as_deref())?;

    match cli.command {
        Commands::Export { request, out, keep } => {
            let request = settings::read_request(&request)?;
            export::run(config, request, &out, keep).await
        }
        Commands::Cleanup {
            upload,
            export: token,
        } => {
            let mut targets = Vec::new();
            targets.extend(upload.map(CleanupTarget::Upload));
            targets.extend(token.map(CleanupTarget::Export));
            if targets.is_empty() {
                anyhow::bail!("nothing to clean up: pass --upload and/or --export");
            }
            let transport = Arc::new(HttpTransport::new(&config)?);
            export::release(&*transport, &targets).await;
            Ok(())
        }
    }
}
