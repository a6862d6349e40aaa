use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::StreamExt;
use linkharvest::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "linkharvest",
    version,
    about = "Fetch a batch of pages and keep the links matching your keywords"
)]
struct Cli {
    /// Addresses to fetch
    addresses: Vec<String>,

    /// File with one address per line
    #[arg(long, short, env = "LINKHARVEST_INPUT")]
    input: Option<PathBuf>,

    /// Keep links containing any of these keywords, comma separated
    #[arg(long, env = "LINKHARVEST_INCLUDE")]
    include: Option<String>,

    /// Drop links containing any of these keywords, comma separated
    #[arg(long, env = "LINKHARVEST_EXCLUDE")]
    exclude: Option<String>,

    /// Maximum concurrent fetches (defaults to the number of CPUs)
    #[arg(long, env = "LINKHARVEST_WORKERS")]
    workers: Option<usize>,

    /// Per-address timeout in seconds
    #[arg(long, env = "LINKHARVEST_TIMEOUT_SECS")]
    timeout_secs: Option<f64>,

    /// Directory receiving the link file
    #[arg(long, env = "LINKHARVEST_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// JSON configuration file; flags override its values
    #[arg(long, env = "LINKHARVEST_CONFIG")]
    config: Option<PathBuf>,

    /// Drop `#fragment` suffixes from collected links
    #[arg(long, default_value_t = false)]
    strip_fragments: bool,

    /// Drop trailing slashes from collected links
    #[arg(long, default_value_t = false)]
    strip_trailing_slash: bool,

    /// Emit logs as JSON
    #[arg(long, env = "LINKHARVEST_LOG_JSON", default_value_t = false)]
    log_json: bool,
}

impl Cli {
    fn build_config(&self) -> Result<HarvestConfig> {
        let mut config = match &self.config {
            Some(path) => HarvestConfig::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => HarvestConfig::default(),
        };

        if let Some(workers) = self.workers {
            config.pool.max_workers = workers;
        }
        if let Some(seconds) = self.timeout_secs {
            config.fetch.timeout_seconds = seconds;
        }
        if self.strip_fragments {
            config.normalization.strip_fragment = true;
        }
        if self.strip_trailing_slash {
            config.normalization.strip_trailing_slash = true;
        }

        config.validate()?;
        Ok(config)
    }

    async fn candidates(&self) -> Result<Vec<String>> {
        let mut candidates = self.addresses.clone();
        if let Some(path) = &self.input {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            candidates.extend(text.lines().map(str::to_string));
        }
        Ok(candidates)
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = cli.build_config()?;
    let candidates = cli.candidates().await?;
    if candidates.iter().all(|candidate| candidate.trim().is_empty()) {
        bail!("no addresses given; pass them as arguments or with --input");
    }

    let harvester = LinkHarvester::builder(config)
        .with_event_sink(Arc::new(LoggingEventSink::debug()))
        .build()?;
    let user = UserId::from("cli");
    if cli.include.is_some() || cli.exclude.is_some() {
        harvester
            .set_filters(user.clone(), cli.include.as_deref(), cli.exclude.as_deref())
            .await;
    }

    let mut batch = harvester.submit_batch(user, &candidates);
    while let Some(event) = batch.next().await {
        match event {
            BatchEvent::Started { total, rejected, .. } => {
                for candidate in &rejected {
                    eprintln!("skipping invalid address: {candidate}");
                }
                eprintln!("fetching {total} addresses");
            }
            BatchEvent::Progress(progress) => {
                eprintln!(
                    "[{}/{}] {} links collected ({} failed)",
                    progress.completed, progress.total, progress.collected, progress.error_count
                );
            }
            BatchEvent::Finished(_) => {}
        }
    }

    let report = batch.join().await?;
    let collected = report.collected;
    let links = report.into_links()?;
    if links.is_empty() {
        println!("no links match the filters ({collected} collected)");
        return Ok(());
    }

    let path = write_link_file(&cli.output_dir, &links).await?;
    println!("{}", path.display());
    Ok(())
}
