use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use fof_adapters::{FixtureGrantsApi, GrantsApi};
use fof_core::ExportRow;
use fof_docs::DocumentReader;
use fof_sync::{DiscoveryConfig, DiscoveryPipeline, RankingPolicies, RunOutcome, ScoreStats};
use tracing::info;
use tracing_subscriber::EnvFilter;

const PREVIEW_ROWS: usize = 10;

#[derive(Debug, Parser)]
#[command(name = "fof")]
#[command(about = "Funding opportunity finder")]
struct Cli {
    /// Raise log level to debug.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Crawl, enrich, score, rank and export opportunities.
    Discover(DiscoverArgs),
    /// Re-rank an existing full export without calling the API.
    Rank {
        #[arg(long, default_value = "top_grants_full.csv")]
        input: PathBuf,
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Extract text from supporting documents.
    ReadDocs {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Print each document's text after loading.
        #[arg(long)]
        print: bool,
    },
}

#[derive(Debug, Default, Args)]
struct DiscoverArgs {
    #[arg(long)]
    keyword: Option<String>,
    #[arg(long)]
    page_size: Option<usize>,
    #[arg(long)]
    max_records: Option<usize>,
    #[arg(long)]
    min_days: Option<i64>,
    #[arg(long)]
    taxonomy: Option<PathBuf>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Also write a Parquet snapshot of the full table.
    #[arg(long)]
    parquet: bool,
    /// Serve search/detail responses from a fixture directory instead of the live API.
    #[arg(long)]
    fixtures: Option<PathBuf>,
}

impl DiscoverArgs {
    fn apply(&self, config: &mut DiscoveryConfig) {
        if let Some(keyword) = &self.keyword {
            config.keyword = keyword.clone();
        }
        if let Some(page_size) = self.page_size {
            config.page_size = page_size;
        }
        if let Some(max_records) = self.max_records {
            config.max_records = max_records;
        }
        if let Some(min_days) = self.min_days {
            config.min_days_to_deadline = min_days;
        }
        if let Some(taxonomy) = &self.taxonomy {
            config.taxonomy_path = taxonomy.clone();
        }
        if let Some(output_dir) = &self.output_dir {
            config.output_dir = output_dir.clone();
        }
        config.write_parquet |= self.parquet;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_directive = if cli.verbose { "fof=debug" } else { "fof=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_directive.parse()?))
        .init();

    match cli.command.unwrap_or(Commands::Discover(DiscoverArgs::default())) {
        Commands::Discover(args) => discover(args).await?,
        Commands::Rank {
            input,
            output_dir,
            top_k,
        } => {
            let mut policies = RankingPolicies::default();
            if let Some(k) = top_k {
                policies.top_k = k;
                policies.fit_top = k;
            }
            let sets = fof_sync::rerank_full_table(&input, output_dir, &policies).await?;
            println!(
                "rank complete: rows={} relevant={} adaptive={} (q={:.2})",
                sets.full.len(),
                sets.relevant.len(),
                sets.adaptive.rows.len(),
                sets.adaptive.quantile
            );
            print_stats(fof_sync::score_stats(&sets.full));
            print_preview(sets.preview(PREVIEW_ROWS));
        }
        Commands::ReadDocs { paths, print } => {
            let mut reader = DocumentReader::new(paths);
            let report = reader.load_all();
            for (path, error) in &report.failures {
                eprintln!("failed: {} ({error})", path.display());
            }
            if print {
                for (path, content) in reader.documents() {
                    println!("==== {} ====\n{content}\n", path.display());
                }
            }
            println!(
                "loaded {}/{} documents, {} characters total",
                report.loaded,
                report.attempted,
                reader.get_all_content().chars().count()
            );
        }
    }

    Ok(())
}

async fn discover(args: DiscoverArgs) -> Result<()> {
    let mut config = DiscoveryConfig::from_env();
    args.apply(&mut config);
    let taxonomy = fof_sync::load_taxonomy(&config.taxonomy_path)?;
    let api: Arc<dyn GrantsApi> = match &args.fixtures {
        Some(dir) => {
            info!(dir = %dir.display(), "using fixture API");
            Arc::new(FixtureGrantsApi::from_dir(dir)?)
        }
        None => fof_sync::live_api(&config)?,
    };
    let today = chrono::Local::now().date_naive();

    match DiscoveryPipeline::new(config, api, taxonomy).run_once(today).await? {
        RunOutcome::NoOpportunities => println!("No opportunities returned."),
        RunOutcome::Completed(summary) => {
            println!(
                "discover complete: run_id={} crawled={} unique={} after_deadline={} relevant={} adaptive={}",
                summary.run_id,
                summary.crawled,
                summary.unique,
                summary.after_deadline,
                summary.relevant,
                summary.adaptive
            );
            for file in &summary.outputs {
                println!("  wrote {} ({} rows)", file.path, file.rows);
            }
            print_stats(summary.stats);
            print_preview(&summary.preview);
        }
    }
    Ok(())
}

fn print_stats(stats: Option<ScoreStats>) {
    if let Some(stats) = stats {
        println!(
            "score distribution: min={} max={} mean={:.1}",
            stats.min, stats.max, stats.mean
        );
    }
}

fn print_preview(rows: &[ExportRow]) {
    if rows.is_empty() {
        return;
    }
    println!(
        "{:>5}  {:<60}  {:<30}  {:<10}  {:>4}",
        "Score", "Title", "Agency", "CloseDate", "Days"
    );
    for row in rows {
        let days = row
            .days_left
            .map(|d| d.to_string())
            .unwrap_or_default();
        println!(
            "{:>5}  {:<60}  {:<30}  {:<10}  {:>4}",
            row.score,
            clip(&row.title, 60),
            clip(&row.agency, 30),
            row.close_date,
            days
        );
    }
}

fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head = text.chars().take(max.saturating_sub(3)).collect::<String>();
        format!("{head}...")
    }
}
