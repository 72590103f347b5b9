use anyhow::Result;
use clap::{Parser, Subcommand};
use movierec::{init_tracing, AppState, Config, Strategy};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Push a local rating snapshot into the store
    Reconcile {
        #[arg(short, long)]
        snapshot: PathBuf,
    },
    /// Print top-k recommendations for a user
    Recommend {
        #[arg(short, long)]
        user: i64,

        #[arg(short, long)]
        k: Option<usize>,

        #[arg(short, long)]
        strategy: Option<Strategy>,
    },
    /// Print a user's rating statistics
    Stats {
        #[arg(short, long)]
        user: i64,
    },
    /// List a user's stored ratings, newest first
    Ratings {
        #[arg(short, long)]
        user: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing();

    let config = if std::path::Path::new(&args.config).exists() {
        Config::from_file(&args.config)?
    } else {
        info!("Config file not found, using default configuration");
        Config::default()
    };

    let state = AppState::new(config).await?;

    match args.command {
        Command::Reconcile { snapshot } => {
            let report = state
                .reconciliation_service
                .reconcile_file_with_report(&snapshot)
                .await?;
            println!(
                "user {}: {} ratings stored, {} entries skipped",
                report.user_id,
                report.inserted,
                report.skipped.len()
            );
            for skipped in &report.skipped {
                println!("  entry {}: {:?}", skipped.index, skipped.reason);
            }
        }
        Command::Recommend { user, k, strategy } => {
            let k = k.unwrap_or(state.config.recommendation.default_k);
            let strategy = strategy.unwrap_or(state.config.recommendation.strategy);
            let ranking = state
                .recommendation_service
                .recommend_with(user, k, strategy)
                .await?;
            let items = state.recommendation_service.enrich(&ranking.items).await?;

            println!("Recommendations for user {} ({}):", user, ranking.strategy);
            for (rank, item) in items.iter().enumerate() {
                println!("{:>3}. {} [{:.4}]", rank + 1, item.title, item.score);
            }
        }
        Command::Stats { user } => {
            let stats = state.recommendation_service.user_stats(user).await?;
            println!(
                "user {}: {} ratings, average {:.2}",
                stats.user_id, stats.total_ratings, stats.average_rating
            );
            for genre in &stats.top_genres {
                println!("  {}: {}", genre.genre, genre.count);
            }
        }
        Command::Ratings { user } => {
            let ratings = state.recommendation_service.user_ratings(user).await?;
            println!("user {}: {} ratings", user, ratings.len());
            for rated in &ratings {
                println!("  {:.1}  {}", rated.rating, rated.title);
            }
        }
    }

    Ok(())
}
