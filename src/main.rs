//! psync CLI entry point.

use clap::Parser;
use psync::cli::commands::{self, Globals};
use psync::cli::{Cli, Commands};
use psync::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Set up tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    // Resolve effective JSON mode: --json OR non-TTY stdout
    let json = cli.json || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    match run(&cli, json) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if json {
                eprintln!("{}", e.to_structured_json());
            } else if e.is_blocking() {
                // Shown even in quiet mode: the change was not saved.
                eprintln!("Error: {}", e.user_message());
            } else if !cli.quiet {
                if let Some(hint) = e.hint() {
                    eprintln!("Error: {}\n  Hint: {hint}", e.user_message());
                } else {
                    eprintln!("Error: {}", e.user_message());
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
            2 => EnvFilter::new("debug,rusqlite=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(cli: &Cli, json: bool) -> Result<(), Error> {
    let globals = Globals {
        db: cli.db.as_deref(),
        user: cli.user.as_deref(),
        json,
    };

    match &cli.command {
        Commands::Init { force, seed } => commands::init::execute(&globals, *force, seed.as_deref()),
        Commands::Student { command } => commands::student::execute(command, &globals),
        Commands::Submission { command } => commands::submission::execute(command, &globals),
        Commands::Complete {
            student,
            content_type,
            content_id,
        } => commands::rewards::complete(&globals, student, content_type, content_id),
        Commands::Achievement { command } => commands::rewards::achievement(command, &globals),
        Commands::Badge { command } => commands::rewards::badge(command, &globals),
        Commands::Progress { command } => commands::progress::execute(command, &globals),
        Commands::Notification { command } => commands::notification::execute(command, &globals),
        Commands::Watch { student, duration } => {
            commands::progress::watch(&globals, student, *duration)
        }
        Commands::Completions { shell } => commands::completions::execute(shell),
    }
}
