//! fieldsync CLI entry point.

use clap::Parser;
use fieldsync::cli::commands;
use fieldsync::cli::commands::sync::RemoteOverrides;
use fieldsync::cli::{Cli, Commands};
use fieldsync::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.json {
                eprintln!("{}", e.to_structured_json());
            } else if !cli.quiet {
                if let Some(hint) = e.hint() {
                    eprintln!("Error: {e}\n  Hint: {hint}");
                } else {
                    eprintln!("Error: {e}");
                }
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,rusqlite=info,hyper=info,reqwest=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(cli: &Cli) -> Result<(), Error> {
    let json = cli.json;
    match &cli.command {
        Commands::Version => commands::version::execute(json),
        Commands::Migrate => commands::migrate::execute(cli.db.as_ref(), json),
        Commands::Sync { command } => {
            let remote = RemoteOverrides {
                url: cli.remote_url.as_deref(),
                api_key: cli.remote_key.as_deref(),
            };
            commands::sync::execute(command, cli.db.as_ref(), remote, json)
        }
        Commands::Completions { shell } => commands::completions::execute(shell),
    }
}
