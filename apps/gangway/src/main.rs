use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use gangway::cli::Cli;
use gangway::session;

#[tokio::main]
async fn main() {
    // Raw mode owns the terminal, so logs go to stderr and default quiet.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match session::run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            error!(error = %err, "session failed");
            1
        }
    };
    // All relay tasks were joined by now; exiting here is what finally
    // releases the stdin thread that may still be parked in read(2).
    std::process::exit(code);
}
