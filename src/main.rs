// Migraph: branch-aware schema migrations
//
// Keeps migration scripts as a revision graph, merges heads created on
// different branches, applies scripts to a SQLite database and checks the
// application log against the graph.

use anyhow::Result;
use clap::Parser;

use migraph::cli::{self, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout stays reserved for command output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Run the appropriate command
    if let Err(err) = run_command(&cli) {
        let code = cli::report_error(cli.output, &err);
        std::process::exit(code);
    }

    Ok(())
}

fn run_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Init(args) => cli::cmds::init(args, cli)?,
        Commands::Heads(args) => cli::cmds::heads(args, cli)?,
        Commands::Current(args) => cli::cmds::current(args, cli)?,
        Commands::Create(args) => cli::cmds::create(args, cli)?,
        Commands::Merge(args) => cli::cmds::merge(args, cli)?,
        Commands::LastRevision(args) => cli::cmds::last_revision(args, cli)?,
        Commands::Migrate(args) => cli::cmds::migrate(args, cli)?,
        Commands::Downgrade(args) => cli::cmds::downgrade(args, cli)?,
        Commands::Pending(args) => cli::cmds::pending(args, cli)?,
        Commands::History(args) => cli::cmds::history(args, cli)?,
        Commands::CompareHistory(args) => cli::cmds::compare_history(args, cli)?,
        Commands::Log(args) => cli::cmds::log(args, cli)?,
    }
    Ok(())
}
