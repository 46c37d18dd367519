//! pgdeck CLI - Postgres connection manager
//!
//! Runs the pgdeck HTTP API (`serve`) and generates shell completions.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

mod commands;
mod config;
mod tracing_setup;

use tracing_setup::TracingConfig;

#[derive(Parser, Debug)]
#[command(
    name = "pgdeck",
    author,
    version,
    about = "Manage Postgres connection profiles and pooled queries over HTTP",
    long_about = "Keeps one lazily created connection pool per profile, runs queries and \
                  gathers pool statistics through it, and tests credentials without \
                  touching the live pools."
)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, global = true)]
    debug: bool,

    /// Export traces over OTLP (requires the telemetry feature)
    #[arg(long, global = true)]
    otel: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API server
    Serve(commands::serve::ServeArgs),
    /// Generate shell completion scripts
    Completions(CompletionsArgs),
}

#[derive(Parser, Debug)]
struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    shell: Shell,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
#[allow(clippy::enum_variant_names)] // PowerShell is a proper noun, not a suffix
enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Before parsing, so env fallbacks see .env values
    let loaded_from = config::load_dotenv();
    let cli = Cli::parse();

    tracing_setup::init(&TracingConfig {
        debug: cli.debug,
        otel: cli.otel,
    })
    .ok();

    if loaded_from.is_empty() {
        tracing::debug!("No .env files found (current dir or ~/.pgdeck)");
    } else {
        tracing::info!("Loaded configuration from: {}", loaded_from.join(", "));
    }

    let result = match cli.command {
        Commands::Serve(args) => commands::run_serve(args).await,
        Commands::Completions(args) => run_completions(args),
    };

    tracing_setup::shutdown_otel();
    result
}

fn run_completions(args: CompletionsArgs) -> Result<()> {
    use clap::CommandFactory;
    use clap_complete::{generate, Shell as CompletionShell};
    use std::io;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();

    let shell = match args.shell {
        Shell::Bash => CompletionShell::Bash,
        Shell::Zsh => CompletionShell::Zsh,
        Shell::Fish => CompletionShell::Fish,
        Shell::PowerShell => CompletionShell::PowerShell,
        Shell::Elvish => CompletionShell::Elvish,
    };

    generate(shell, &mut cmd, bin_name, &mut io::stdout());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::time::Duration;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_builds_pool_defaults() {
        let cli = Cli::try_parse_from([
            "pgdeck",
            "--debug",
            "serve",
            "--max-connections-ceiling",
            "20",
            "--max-connections",
            "5",
            "--acquire-timeout",
            "250",
            "--statement-timeout",
            "1000",
        ])
        .unwrap();
        assert!(cli.debug);

        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let defaults = args.pool.to_defaults();
        assert_eq!(defaults.max_size_ceiling, 20);
        assert_eq!(defaults.default_max_size, 5);
        assert_eq!(defaults.acquire_timeout, Duration::from_millis(250));
        assert_eq!(defaults.idle_timeout, Duration::from_millis(30_000));
        assert_eq!(defaults.statement_timeout, Some(Duration::from_millis(1000)));
        assert!(!defaults.allow_explicit_max);
        assert!(defaults.validate().is_ok());
        assert_eq!(args.bind.port(), 3001);
    }

    #[test]
    fn zero_ceiling_fails_validation() {
        let cli = Cli::try_parse_from(["pgdeck", "serve", "--max-connections-ceiling", "0"]).unwrap();
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert!(args.pool.to_defaults().validate().is_err());
    }

    #[test]
    fn completions_parse() {
        let cli = Cli::try_parse_from(["pgdeck", "completions", "zsh"]).unwrap();
        assert!(matches!(cli.command, Commands::Completions(_)));
    }
}
