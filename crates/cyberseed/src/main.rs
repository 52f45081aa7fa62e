use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use cyberseed_core::client::{MediaWikiClient, MediaWikiClientConfig};
use cyberseed_core::config::{DEFAULT_CONFIG_FILENAME, DatabaseTarget, SeedConfig, load_config};
use cyberseed_core::failure;
use cyberseed_core::pipeline::{Pipeline, PipelineSettings, StageSelection};
use cyberseed_core::store::{SourceRecord, open_store};
use cyberseed_core::summarize::{Summarizer, SummarizerKind};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "cyberseed",
    version,
    about = "Seed a relational store with Night City wiki content"
)]
struct Cli {
    #[arg(long, help = "Run every stage")]
    all: bool,
    #[arg(long, help = "Ingest sub-districts")]
    subdistricts: bool,
    #[arg(long, help = "Ingest operating-system cyberware")]
    os: bool,
    #[arg(long, help = "Ingest arms cyberware")]
    arms: bool,
    #[arg(long, help = "Ingest consumable items")]
    consumables: bool,
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_FILENAME)]
    config: PathBuf,
    #[arg(long, value_name = "PATH", help = "Directory for JSON snapshots")]
    out_dir: Option<PathBuf>,
    #[arg(long, value_enum, help = "Markup stripping strategy")]
    summarizer: Option<SummarizerArg>,
    #[arg(short, long, action = clap::ArgAction::Count, help = "Raise log verbosity")]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SummarizerArg {
    Parser,
    Regex,
}

impl From<SummarizerArg> for SummarizerKind {
    fn from(value: SummarizerArg) -> Self {
        match value {
            SummarizerArg::Parser => SummarizerKind::Parser,
            SummarizerArg::Regex => SummarizerKind::Regex,
        }
    }
}

impl Cli {
    fn selection(&self) -> StageSelection {
        if self.all {
            return StageSelection::all();
        }
        StageSelection {
            subdistricts: self.subdistricts,
            cyberware_os: self.os,
            cyberware_arms: self.arms,
            consumables: self.consumables,
        }
    }
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{}", failure::render(&error));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    let selection = cli.selection();
    if selection.is_empty() {
        warn!("no stage selected; pass --all or a stage flag");
    }

    let summarizer = match cli.summarizer {
        Some(choice) => Summarizer::select(Some(choice.into())),
        None => Summarizer::select(config.summarizer()?),
    };
    let target = DatabaseTarget::parse(&config.database_url())
        .context("invalid DATABASE_URL")?;
    let settings = PipelineSettings {
        output_dir: cli.out_dir.clone().unwrap_or_else(|| config.output_dir()),
        source: SourceRecord::fandom(),
    };
    info!(
        backend = target.backend_name(),
        output_dir = %settings.output_dir.display(),
        strategy = summarizer.strategy(),
        "starting seed run"
    );

    let mut client = build_client(&config)?;
    let mut store = open_store(&target)?;
    let manifest = Pipeline::new(&mut client, &mut *store, &summarizer, settings)
        .run(&selection)?;

    println!(
        "{}",
        serde_json::to_string_pretty(&manifest).context("failed to render manifest")?
    );
    Ok(())
}

fn build_client(config: &SeedConfig) -> Result<MediaWikiClient> {
    MediaWikiClient::new(MediaWikiClientConfig::from_config(config))
}

/// Logs go to stderr; stdout is reserved for the manifest.
fn init_tracing(verbose: u8) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match verbose {
        0 => "cyberseed=info,cyberseed_core=info",
        1 => "cyberseed=debug,cyberseed_core=debug",
        _ => "cyberseed=trace,cyberseed_core=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
