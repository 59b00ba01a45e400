use scout_core::logging;

mod cli;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    // A missing .env is normal; variables already set in the process win.
    let _ = dotenvy::dotenv();

    if let Err(e) = logging::init_logging() {
        logging::init_logging_stderr();
        tracing::warn!("file logging unavailable ({:#}), logging to stderr", e);
    }

    if let Err(err) = Cli::run_from_args().await {
        eprintln!("scout error: {:#}", err);
        std::process::exit(1);
    }
}
