//! Backlog CLI - shared task board for agent processes
//!
//! Binary name: `backlog`

use std::process;

use backlog::cli::{build_cli, handlers};
use backlog::commands::CommandStatus;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let matches = build_cli().get_matches();

    let default_level = match matches.get_count("verbose") {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = match handlers::dispatch(&matches).await {
        Ok(status) => status.exit_code(),
        Err(err) => {
            #[allow(clippy::print_stderr)]
            {
                eprintln!("Error: {}", handlers::format_error(&err));
            }
            1
        }
    };

    if code != CommandStatus::Done.exit_code() {
        #[allow(clippy::exit)]
        process::exit(code);
    }
}
