use casting_engine::casting::{CastingSession, CommitManager, StaffConfirmation};
use casting_engine::config::{load_dotenv, CastingPolicy, ServerConfig};
use casting_engine::display::{print_simulation, print_stats, write_simulation_to_file};
use casting_engine::parser::load_snapshot;
use casting_engine::store::CsvStore;
use casting_engine::web;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CATEGORY: &str = "main";

fn print_usage() {
    println!("Usage:");
    println!("  casting simulate <data_dir> [category]");
    println!("  casting commit <data_dir> <confirmed_by> [category]");
    println!("  casting stats <data_dir> [category]");
    println!("  casting web [port]");
}

fn open_session(dir: &str, category: &str, policy: &CastingPolicy) -> Result<CastingSession, Box<dyn std::error::Error>> {
    println!("Loading casting data from {}...", dir);
    let snapshot = load_snapshot(dir, category)?;
    println!(
        "Loaded {} players, {} roles, {} preference submissions (resubmissions merged)",
        snapshot.players.len(),
        snapshot.roles.len(),
        snapshot.submissions.len()
    );
    Ok(CastingSession::new(snapshot, policy.clone())?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "casting_engine=info,casting=info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let policy = CastingPolicy::from_env();
    policy.validate()?;

    match args.get(1).map(String::as_str) {
        Some("web") => {
            let mut config = ServerConfig::from_env();
            if let Some(port) = args.get(2).and_then(|p| p.parse::<u16>().ok()) {
                config.port = port;
            }
            println!("Starting web server on port {}...", config.port);
            println!("Committed rounds are stored in {}", config.store_dir.display());
            println!("Access the API at http://localhost:{}/api", config.port);

            web::start_server(config, policy).await?;
        }
        Some("simulate") => {
            let Some(dir) = args.get(2) else {
                print_usage();
                return Ok(());
            };
            let category = args.get(3).map(String::as_str).unwrap_or(DEFAULT_CATEGORY);
            let mut session = open_session(dir, category, &policy)?;

            println!("\n=== Running casting simulation ===");
            let result = session.simulate()?.clone();
            print_simulation(&result, session.roster(), session.catalog());

            let filename = format!("simulation_{}.txt", category);
            write_simulation_to_file(&result, session.roster(), session.catalog(), &filename)?;
            println!("\nSimulation saved to {}", filename);
        }
        Some("commit") => {
            let (Some(dir), Some(confirmed_by)) = (args.get(2), args.get(3)) else {
                print_usage();
                return Ok(());
            };
            let category = args.get(4).map(String::as_str).unwrap_or(DEFAULT_CATEGORY);
            let confirmation = StaffConfirmation::confirm(confirmed_by.as_str())?;
            let config = ServerConfig::from_env();
            let mut manager = CommitManager::new(CsvStore::new(&config.store_dir)?);

            let mut session = open_session(dir, category, &policy)?;
            let result = session.simulate()?.clone();
            print_simulation(&result, session.roster(), session.catalog());

            let outcome = session.commit(&mut manager, &confirmation)?;
            println!(
                "\nCommitted {} pairing(s) for {} by {}",
                outcome.records.len(),
                outcome.round,
                outcome.committed_by
            );
            println!("Saved to {}", manager.store().path_for(&outcome.round).display());
        }
        Some("stats") => {
            let Some(dir) = args.get(2) else {
                print_usage();
                return Ok(());
            };
            let category = args.get(3).map(String::as_str).unwrap_or(DEFAULT_CATEGORY);
            let session = open_session(dir, category, &policy)?;
            print_stats(&session.stats());
        }
        _ => print_usage(),
    }

    Ok(())
}
