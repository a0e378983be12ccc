// CLI command definitions

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::script::template::DEFAULT_TEMPLATE;

/// Migraph - branch-aware schema migrations
///
/// Keeps migration scripts as a graph of revisions, so scripts written on
/// different source-control branches can coexist and be merged.
#[derive(Parser, Debug, Clone)]
#[command(name = "migraph")]
#[command(author, version, about)]
#[command(long_about = "Migraph keeps database migration scripts as a directed acyclic graph.

Each script records the branch it was created on. When two branches both
add scripts the graph grows several heads; nothing is created or applied
until an operator picks which pair of heads to merge.

Every applied transition is written to an application log inside the
target database, which can be compared against the graph at any time.")]
pub struct Cli {
    /// Migration script directory
    #[arg(global = true, long, env = "MIGRAPH_DIR")]
    pub dir: Option<PathBuf>,

    /// Path to the target SQLite database
    #[arg(global = true, long, env = "MIGRAPH_DB")]
    pub db: Option<PathBuf>,

    /// Git repository used to read the active branch
    #[arg(global = true, long, env = "MIGRAPH_REPO")]
    pub repo: Option<PathBuf>,

    /// Output format
    #[arg(global = true, long, value_enum, default_value_t = OutputFormat::Human)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output
    Human,
    /// Compact JSON for programmatic consumption
    Json,
    /// Formatted JSON with indentation
    Pretty,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Create a new migration directory from a template
    Init(InitArgs),

    /// Show the current heads of the script graph
    Heads(HeadsArgs),

    /// Show the revision the database is at
    Current(CurrentArgs),

    /// Create a new script on top of the single head
    Create(CreateArgs),

    /// Merge two heads into one
    Merge(MergeArgs),

    /// Show the newest script of the history
    LastRevision(LastRevisionArgs),

    /// Upgrade the database to the single head
    Migrate(MigrateArgs),

    /// Revert the database to an earlier revision
    Downgrade(DowngradeArgs),

    /// List scripts not yet applied to the database
    Pending(PendingArgs),

    /// Show the script history
    History(HistoryArgs),

    /// Compare the application log with the script graph
    CompareHistory(CompareHistoryArgs),

    /// Show the application log
    Log(LogArgs),
}

// ============================================================================
// Script Commands
// ============================================================================

#[derive(Parser, Debug, Clone)]
pub struct InitArgs {
    /// Template to scaffold the directory from
    #[arg(long, default_value = DEFAULT_TEMPLATE)]
    pub template: String,

    /// List the available templates and exit
    #[arg(long)]
    pub list: bool,
}

#[derive(Parser, Debug, Clone, Copy)]
pub struct HeadsArgs {}

#[derive(Parser, Debug, Clone)]
pub struct CreateArgs {
    /// Short description of the change
    pub name: String,

    /// Branch tag to record instead of asking git
    #[arg(long)]
    pub branch: Option<String>,

    /// Fail instead of prompting when the graph has several heads
    #[arg(long)]
    pub no_merge: bool,
}

#[derive(Parser, Debug, Clone, Copy)]
pub struct MergeArgs {
    /// Candidate to merge (1-based); prompts when omitted
    #[arg(long)]
    pub choice: Option<usize>,
}

#[derive(Parser, Debug, Clone, Copy)]
pub struct LastRevisionArgs {}

#[derive(Parser, Debug, Clone, Copy)]
pub struct HistoryArgs {
    /// Maximum number of scripts to show
    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Start from the oldest script instead of the newest
    #[arg(long)]
    pub oldest_first: bool,
}

// ============================================================================
// Database Commands
// ============================================================================

#[derive(Parser, Debug, Clone, Copy)]
pub struct CurrentArgs {}

#[derive(Parser, Debug, Clone, Copy)]
pub struct MigrateArgs {
    /// Fail instead of prompting when the graph has several heads
    #[arg(long)]
    pub no_merge: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct DowngradeArgs {
    /// Revision to keep; `base` reverts everything
    pub target: String,
}

impl DowngradeArgs {
    /// `None` when every script should be reverted
    pub fn target(&self) -> Option<&str> {
        match self.target.as_str() {
            BASE_REVISION => None,
            other => Some(other),
        }
    }
}

/// Downgrade target that reverts every script
pub const BASE_REVISION: &str = "base";

#[derive(Parser, Debug, Clone, Copy)]
pub struct PendingArgs {}

#[derive(Parser, Debug, Clone, Copy)]
pub struct CompareHistoryArgs {}

#[derive(Parser, Debug, Clone, Copy)]
pub struct LogArgs {
    /// Maximum number of entries to show
    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Entries to skip, counted from the newest
    #[arg(long, default_value_t = 0)]
    pub offset: usize,
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Resolve the configuration from the global flags
///
/// Priority per path: CLI arg > environment variable > default.
pub fn resolve_config(cli: &Cli) -> crate::config::Config {
    crate::config::Config::resolve(cli.dir.clone(), cli.db.clone(), cli.repo.clone())
}

/// Print `err` in the selected format and return the process exit code
pub fn report_error(format: OutputFormat, err: &anyhow::Error) -> i32 {
    use crate::output;

    match err.downcast_ref::<crate::Error>() {
        Some(e) => {
            let json = output::JsonError::from_error(e);
            match format {
                OutputFormat::Human => {
                    output::error(&json.message);
                    if let Some(hint) = &json.remediation {
                        output::info(&format!("Hint: {}", hint));
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string(&json).unwrap_or_default()),
                OutputFormat::Pretty => {
                    println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default())
                }
            }
            output::exit_code(e)
        }
        None => {
            let message = format!("{:#}", err);
            match format {
                OutputFormat::Human => output::error(&message),
                _ => {
                    let json = output::JsonError::new("Error", &message, output::E_OTHER);
                    println!("{}", serde_json::to_string(&json).unwrap_or_default());
                }
            }
            output::EXIT_ERROR
        }
    }
}

// ============================================================================
// Command Handlers
// ============================================================================

pub mod cmds {
    use super::*;
    use crate::branch::{BranchProvider, BranchTagger, FixedBranch};
    use crate::config::Config;
    use crate::error::Error;
    use crate::merge::{MergeOutcome, MergeResolver};
    use crate::output;
    use crate::reconcile::HistoryReconciler;
    use crate::script::{template, Script};
    use crate::upgrade::{DowngradeReport, ExecutionEngine, UpgradePlanner, UpgradeReport};
    use anyhow::Result;
    use serde::Serialize;
    use std::io::{self, BufRead, Write};

    /// JSON view of a script
    #[derive(Debug, Clone, Serialize)]
    pub struct ScriptView {
        pub id: String,
        pub parents: Vec<String>,
        pub branch: String,
        pub message: String,
        pub sequence: u64,
        pub created_at: String,
        pub is_merge: bool,
    }

    impl ScriptView {
        pub fn new(script: &Script) -> Self {
            ScriptView {
                id: script.id().to_string(),
                parents: script.parents().to_vec(),
                branch: crate::branch::tag_for(script).to_string(),
                message: script.message().to_string(),
                sequence: script.sequence(),
                created_at: script.created_at().to_rfc3339(),
                is_merge: script.is_merge(),
            }
        }
    }

    #[derive(Debug, Clone, Serialize)]
    struct TemplateView {
        name: &'static str,
        description: &'static str,
    }

    #[derive(Debug, Clone, Serialize)]
    struct InitView {
        dir: String,
        template: String,
    }

    #[derive(Debug, Clone, Serialize)]
    struct CurrentView {
        database: String,
        current_revision: Option<String>,
        logged_transitions: usize,
    }

    #[derive(Debug, Clone, Serialize)]
    struct MergeView {
        merged: Option<ScriptView>,
    }

    fn emit<T: Serialize>(format: OutputFormat, data: T, human: impl FnOnce(&T)) {
        match format {
            OutputFormat::Human => human(&data),
            OutputFormat::Json => println!("{}", output::JsonResponse::new(data).to_json()),
            OutputFormat::Pretty => {
                println!("{}", output::JsonResponse::new(data).to_pretty_json())
            }
        }
    }

    fn tagger(config: &Config, branch: Option<&str>) -> BranchTagger {
        let provider: Box<dyn BranchProvider> = match branch {
            Some(name) => Box::new(FixedBranch(name.to_string())),
            None => Box::new(config.branch_provider()),
        };
        BranchTagger::new(provider)
    }

    fn views(scripts: &[&Script]) -> Vec<ScriptView> {
        scripts.iter().map(|s| ScriptView::new(s)).collect()
    }

    /// Ask the operator which pair of heads to merge until the answer is usable
    ///
    /// Candidates are derived again on every pass. Bad input is reported
    /// and asked again; any other error ends the prompt. End of input
    /// before a valid answer is treated as a non-integer answer.
    pub fn prompt_merge(
        resolver: &MergeResolver<'_>,
        input: &mut dyn BufRead,
        out: &mut dyn Write,
    ) -> crate::Result<MergeOutcome> {
        loop {
            let candidates = resolver.candidates()?;
            if candidates.is_empty() {
                return Ok(MergeOutcome::NothingToMerge);
            }

            writeln!(out, "Select the heads to merge:")?;
            resolver.present(&candidates, out)?;
            write!(out, "> ")?;
            out.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                return Err(Error::NotAnInteger(String::new()));
            }

            match resolver.resolve(&line) {
                Err(e) if e.is_recoverable_input() => {
                    writeln!(out, "{}", e)?;
                }
                other => return other,
            }
        }
    }

    /// Report the divergent heads and run the interactive merge
    fn merge_divergent_heads(resolver: &MergeResolver<'_>, count: usize) -> crate::Result<MergeOutcome> {
        output::warn(&format!("The script graph has {} heads and must be merged first", count));
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let stdout = io::stdout();
        let mut out = stdout.lock();
        let outcome = prompt_merge(resolver, &mut input, &mut out)?;
        if let MergeOutcome::Merged(script) = &outcome {
            output::success(&format!("Created merge script {}", script));
        }
        Ok(outcome)
    }

    pub fn init(args: &InitArgs, cli: &Cli) -> Result<()> {
        if args.list {
            let templates: Vec<TemplateView> = template::all()
                .iter()
                .map(|t| TemplateView {
                    name: t.name,
                    description: t.description,
                })
                .collect();
            emit(cli.output, templates, |templates| {
                for t in templates {
                    println!("{:<12} {}", t.name, t.description);
                }
            });
            return Ok(());
        }

        let config = resolve_config(cli);
        let store = config.store();
        store.initialize(&args.template)?;

        let view = InitView {
            dir: store.dir().display().to_string(),
            template: args.template.clone(),
        };
        emit(cli.output, view, |v| {
            output::success(&format!("Initialized {} from template {}", v.dir, v.template));
        });
        Ok(())
    }

    pub fn heads(_args: &HeadsArgs, cli: &Cli) -> Result<()> {
        let config = resolve_config(cli);
        let graph = config.store().graph()?;
        let heads = graph.heads();

        emit(cli.output, views(&heads), |heads| {
            if heads.is_empty() {
                output::info("No scripts yet");
                return;
            }
            for head in heads {
                println!("{} ({}) {}", head.id, head.branch, head.message);
            }
            if heads.len() > 1 {
                output::warn(&format!("{} heads; run 'migraph merge'", heads.len()));
            }
        });
        Ok(())
    }

    pub fn current(_args: &CurrentArgs, cli: &Cli) -> Result<()> {
        let config = resolve_config(cli);
        let db = config.open_db()?;
        let status = db.status()?;

        let view = CurrentView {
            database: status.path,
            current_revision: status.current_revision,
            logged_transitions: status.logged_transitions,
        };
        emit(cli.output, view, |v| {
            println!("{}", v.current_revision.as_deref().unwrap_or(crate::storage::NO_REVISION));
        });
        Ok(())
    }

    pub fn create(args: &CreateArgs, cli: &Cli) -> Result<()> {
        let config = resolve_config(cli);
        let store = config.store();
        let tagger = tagger(&config, args.branch.as_deref());
        let branch = tagger.current_branch()?;

        let script = match store.create(&args.name, &branch) {
            Err(Error::AmbiguousHead { count })
                if !args.no_merge && cli.output == OutputFormat::Human =>
            {
                let resolver = MergeResolver::new(&store, &tagger);
                merge_divergent_heads(&resolver, count)?;
                store.create(&args.name, &branch)?
            }
            other => other?,
        };

        emit(cli.output, ScriptView::new(&script), |_| {
            output::success(&format!("Created script {}", script));
            if let Some(path) = script.path() {
                output::info(&format!("Descriptor: {}", path.display()));
            }
        });
        Ok(())
    }

    pub fn merge(args: &MergeArgs, cli: &Cli) -> Result<()> {
        let config = resolve_config(cli);
        let store = config.store();
        let tagger = tagger(&config, None);
        let resolver = MergeResolver::new(&store, &tagger);

        let outcome = match (args.choice, cli.output) {
            (Some(choice), _) => resolver.resolve_index(choice)?,
            (None, OutputFormat::Human) => {
                let stdin = io::stdin();
                let mut input = stdin.lock();
                let stdout = io::stdout();
                let mut out = stdout.lock();
                prompt_merge(&resolver, &mut input, &mut out)?
            }
            (None, format) => {
                // Machine output cannot prompt: list the candidates instead
                let candidates = resolver.candidates()?;
                emit(format, resolver.views(&candidates), |_| {});
                return Ok(());
            }
        };

        let merged = match &outcome {
            MergeOutcome::Merged(script) => Some(ScriptView::new(script)),
            MergeOutcome::NothingToMerge => None,
        };
        emit(cli.output, MergeView { merged }, |_| match &outcome {
            MergeOutcome::Merged(script) => {
                output::success(&format!("Created merge script {}", script))
            }
            MergeOutcome::NothingToMerge => output::info("Nothing to merge"),
        });
        Ok(())
    }

    pub fn last_revision(_args: &LastRevisionArgs, cli: &Cli) -> Result<()> {
        let config = resolve_config(cli);
        let graph = config.store().graph()?;
        let last = graph.last_revision().map(ScriptView::new);
        let display = graph.last_revision().map(|s| s.to_string());

        emit(cli.output, last, |_| match &display {
            Some(line) => println!("{}", line),
            None => output::info("No scripts yet"),
        });
        Ok(())
    }

    pub fn migrate(args: &MigrateArgs, cli: &Cli) -> Result<()> {
        let config = resolve_config(cli);
        let store = config.store();
        let db = config.open_db()?;
        let planner = UpgradePlanner::new(&store);
        let log = db.log();
        let mut engine = db.engine();

        let report: UpgradeReport = match planner.upgrade(&mut engine, &log) {
            Err(Error::AmbiguousHead { count })
                if !args.no_merge && cli.output == OutputFormat::Human =>
            {
                let tagger = tagger(&config, None);
                let resolver = MergeResolver::new(&store, &tagger);
                merge_divergent_heads(&resolver, count)?;
                planner.upgrade(&mut engine, &log)?
            }
            other => other?,
        };

        emit(cli.output, report, |r| {
            if r.is_noop() {
                output::info(&format!(
                    "Database is up to date at {}",
                    r.to.as_deref().unwrap_or(crate::storage::NO_REVISION)
                ));
                return;
            }
            for id in &r.applied {
                println!("  applied {}", id);
            }
            output::success(&format!(
                "Upgraded {} -> {} ({} scripts, {} log entries)",
                r.from.as_deref().unwrap_or(crate::storage::NO_REVISION),
                r.to.as_deref().unwrap_or(crate::storage::NO_REVISION),
                r.applied.len(),
                r.logged
            ));
        });
        Ok(())
    }

    pub fn downgrade(args: &DowngradeArgs, cli: &Cli) -> Result<()> {
        let config = resolve_config(cli);
        let store = config.store();
        let db = config.open_db()?;
        let log = db.log();
        let mut engine = db.engine();
        let report: DowngradeReport =
            UpgradePlanner::new(&store).downgrade(args.target(), &mut engine, &log)?;

        emit(cli.output, report, |r| {
            if r.is_noop() {
                output::info(&format!("Nothing to revert above {}", args.target));
                return;
            }
            for id in &r.reverted {
                println!("  reverted {}", id);
            }
            output::success(&format!(
                "Downgraded {} -> {} ({} scripts, {} log entries removed)",
                r.from.as_deref().unwrap_or(crate::storage::NO_REVISION),
                r.to.as_deref().unwrap_or(crate::storage::NO_REVISION),
                r.reverted.len(),
                r.unlogged
            ));
        });
        Ok(())
    }

    pub fn pending(_args: &PendingArgs, cli: &Cli) -> Result<()> {
        let config = resolve_config(cli);
        let store = config.store();
        let db = config.open_db()?;
        let current = db.engine().current_revision()?;
        let pending = UpgradePlanner::new(&store).pending(current.as_deref(), &db.log())?;
        let refs: Vec<&Script> = pending.iter().collect();

        emit(cli.output, views(&refs), |_| {
            if pending.is_empty() {
                output::info("No pending scripts");
            }
            for script in &pending {
                println!("{}", script);
            }
        });
        Ok(())
    }

    pub fn history(args: &HistoryArgs, cli: &Cli) -> Result<()> {
        let config = resolve_config(cli);
        let graph = config.store().graph()?;
        let window = graph.history(args.limit, !args.oldest_first);

        emit(cli.output, views(&window), |_| {
            for script in &window {
                println!("{}", script);
            }
        });
        Ok(())
    }

    pub fn compare_history(_args: &CompareHistoryArgs, cli: &Cli) -> Result<()> {
        let config = resolve_config(cli);
        let store = config.store();
        let db = config.open_db()?;
        let log = db.log();
        let report = HistoryReconciler::new(&store, &log).reconcile()?;

        emit(cli.output, report, |r| {
            output::header("Application log");
            for entry in &r.matched {
                println!("  {:>4}  {} -> {}", entry.index, entry.previous_revision, entry.forward_revision);
            }
            output::rule();
            output::success(&format!(
                "{} entries match the script graph, {} pending",
                r.matched.len(),
                r.pending
            ));
        });
        Ok(())
    }

    pub fn log(args: &LogArgs, cli: &Cli) -> Result<()> {
        let config = resolve_config(cli);
        let db = config.open_db()?;
        let entries = db.log().list(args.offset, args.limit)?;

        emit(cli.output, entries, |entries| {
            if entries.is_empty() {
                output::info("Application log is empty");
            }
            for entry in entries {
                println!("{}", entry);
            }
        });
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
