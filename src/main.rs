use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use salsa_finder::{
    cast_existence_vote, cast_venue_vote, models::VoteRow, run_discovery, AppConfig,
    ExistenceVote, Store, VenueVote,
};

#[derive(Parser)]
#[command(name = "salsa-finder")]
#[command(about = "Finds Latin-dance socials on the web and keeps a deduplicated event list")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search, scrape and store events for a city
    Discover {
        #[arg(long)]
        city: String,
        /// YYYY-MM-DD; defaults to today
        #[arg(long)]
        date: Option<String>,
        /// Weekday for the search query; derived from the date when omitted
        #[arg(long)]
        weekday: Option<String>,
        /// Preferred dance style (repeatable)
        #[arg(long = "style")]
        styles: Vec<String>,
    },
    /// Cast, switch or withdraw an existence vote
    Vote {
        event_id: i64,
        vote: ExistenceVote,
        user_id: String,
    },
    /// Cast, switch or withdraw an indoor/outdoor vote
    VenueVote {
        event_id: i64,
        vote: VenueVote,
        user_id: String,
    },
    /// List stored events for a city
    Events {
        #[arg(long)]
        city: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show the series an event belongs to
    Series { event_id: i64 },
    /// List the votes recorded for an event
    Votes { event_id: i64 },
}

#[derive(Serialize)]
struct VoteListing {
    votes: Vec<VoteRow>,
    venue_votes: Vec<VoteRow>,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "salsa_finder=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load().map_err(anyhow::Error::msg)?;
    let db_path = config.database_path();
    let mut store = Store::open(&db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    tracing::debug!(path = %db_path.display(), "database ready");

    match cli.command {
        Commands::Discover {
            city,
            date,
            weekday,
            styles,
        } => {
            let summary = run_discovery(
                &store,
                config,
                &city,
                date.as_deref(),
                weekday.as_deref(),
                styles,
            )
            .await?;
            print_json(&summary)?;
        }
        Commands::Vote {
            event_id,
            vote,
            user_id,
        } => {
            let counts = cast_existence_vote(&mut store, event_id, vote, &user_id)?;
            print_json(&counts)?;
        }
        Commands::VenueVote {
            event_id,
            vote,
            user_id,
        } => {
            let counts = cast_venue_vote(&mut store, event_id, vote, &user_id)?;
            print_json(&counts)?;
        }
        Commands::Events { city, date } => {
            print_json(&store.search_events(&city, date)?)?;
        }
        Commands::Series { event_id } => {
            print_json(&store.series(event_id)?)?;
        }
        Commands::Votes { event_id } => {
            let listing = VoteListing {
                votes: store.votes_for::<ExistenceVote>(event_id)?,
                venue_votes: store.votes_for::<VenueVote>(event_id)?,
            };
            print_json(&listing)?;
        }
    }

    store.close()?;
    Ok(())
}
