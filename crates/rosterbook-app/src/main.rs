// Rosterbook entry point.
//
// Startup sequence:
// 1. Load config
// 2. Initialize tracing (log to file, stdout carries command results)
// 3. Open database
// 4. Read commands from stdin until EOF

use anyhow::Context;
use tokio::io::BufReader;
use tracing::info;

use rosterbook_app::command::Session;
use rosterbook_app::run_lines;
use rosterbook_core::config;
use rosterbook_core::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = config::load_config().context("failed to load configuration")?;

    // 2. Initialize tracing
    init_tracing(&config.log_filter)?;
    info!("Rosterbook starting up");

    // 3. Open database
    if let Some(parent) = std::path::Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let db = Database::open(&config.db_path).context("failed to open database")?;
    info!("Database opened at {}", config.db_path);

    // 4. Command loop
    let session = Session::new(db, config);
    let stdin = BufReader::new(tokio::io::stdin());
    let failures = run_lines(&session, stdin, tokio::io::stdout()).await?;

    info!("Rosterbook shut down cleanly ({failures} failed command(s))");
    Ok(())
}

/// Initialize tracing to log to a file; stdout is reserved for JSON results.
fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("rosterbook.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
