//! # Tandem CLI
//!
//! Administers a Tandem `SQLite` database: seed resources, submit edits,
//! inspect the pending log and conflicts, and manage version history.
//! Results are printed as JSON; logs go to stderr.

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use std::env;
use std::sync::Arc;
use tandem_core::{
    merge, CollaborationEngine, Content, ContentStore, EditRequest, EngineStores, Error,
    ResourceKey, ResourceType, VersionHistory,
};
use tandem_store::SqliteStore;
use tracing_subscriber::EnvFilter;

mod config;

use config::CliConfig;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "merge" => {
            let earlier = arg(&args, 2, "merge <earlier> <later>")?;
            let later = arg(&args, 3, "merge <earlier> <later>")?;
            println!("{}", merge::merge_lines(earlier, later));
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            let config = CliConfig::from_env()?;
            let store = SqliteStore::open(&config.db_path)
                .with_context(|| format!("Failed to open {}", config.db_path.display()))?;
            tracing::debug!(db_path = %config.db_path.display(), "Opened database");

            let cli = Cli::new(config, store);
            let output = match cmd {
                "init" => cli.init(&args)?,
                "edit" => cli.edit(&args)?,
                "ops" => cli.ops(&args)?,
                "clear" => cli.clear(&args)?,
                "conflicts" => cli.conflicts(&args)?,
                "save" => cli.save(&args)?,
                "history" => cli.history(&args)?,
                "compare" => cli.compare(&args)?,
                "rollback" => cli.rollback(&args)?,
                "cleanup" => cli.cleanup(&args)?,
                _ => {
                    eprintln!("Unknown command: {cmd}");
                    print_help();
                    std::process::exit(1);
                }
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

struct Cli {
    store: SqliteStore,
    engine: CollaborationEngine,
    history: VersionHistory,
}

impl Cli {
    fn new(config: CliConfig, store: SqliteStore) -> Self {
        let shared = Arc::new(store.clone());
        let engine = CollaborationEngine::new(
            EngineStores::shared(shared.clone()),
            store.handlers(),
            config.policy,
        );
        let history = VersionHistory::new(shared);

        Self {
            store,
            engine,
            history,
        }
    }

    fn init(&self, args: &[String]) -> Result<Value> {
        const USAGE: &str = "init <type> <id> [content]";
        let key = resource(args, USAGE)?;
        let content = args.get(4).map_or("", String::as_str);

        self.store
            .content_store(key.resource_type)
            .update_resource_content(&key.resource_id, content)?;
        tracing::info!(resource = %key, "Initialized resource");

        Ok(json!({ "resource": key, "content": content }))
    }

    fn edit(&self, args: &[String]) -> Result<Value> {
        const USAGE: &str = "edit <type> <id> <user> <content> [--base N] [--position P]";
        let key = resource(args, USAGE)?;
        let user = arg(args, 4, USAGE)?;
        let content = arg(args, 5, USAGE)?;

        let mut request = EditRequest::new(key, user, content);
        let mut options = args[6..].iter();
        while let Some(flag) = options.next() {
            let value = options
                .next()
                .with_context(|| format!("Missing value for {flag}"))?;
            match flag.as_str() {
                "--base" => {
                    request = request.based_on(value.parse::<u64>().context("Invalid --base")?);
                }
                "--position" => {
                    request = request.at(value.parse::<usize>().context("Invalid --position")?);
                }
                other => bail!("Unknown option: {other}\nUsage: tandem {USAGE}"),
            }
        }

        match self.engine.submit_edit(request) {
            Ok(outcome) => Ok(json!({
                "applied": outcome.applied,
                "content": outcome.content,
                "operation": outcome.operation,
                "version": outcome.version,
                "resolution": outcome.resolution,
            })),
            Err(Error::Unresolvable(resolution)) => {
                eprintln!("Conflict needs a user choice; nothing was applied");
                println!("{}", serde_json::to_string_pretty(&resolution)?);
                std::process::exit(2);
            }
            Err(err) => Err(err).context("Edit rejected"),
        }
    }

    fn ops(&self, args: &[String]) -> Result<Value> {
        let key = resource(args, "ops <type> <id>")?;
        let ops = self.engine.get_operation_history(&key)?;
        let version = self.engine.current_version(&key)?;
        Ok(json!({ "version": version, "pending": ops }))
    }

    fn clear(&self, args: &[String]) -> Result<Value> {
        let key = resource(args, "clear <type> <id>")?;
        let removed = self.engine.clear_pending(&key)?;
        Ok(json!({ "resource": key, "removed": removed }))
    }

    fn conflicts(&self, args: &[String]) -> Result<Value> {
        let key = resource(args, "conflicts <type> <id>")?;
        Ok(serde_json::to_value(self.engine.resolutions(&key)?)?)
    }

    fn save(&self, args: &[String]) -> Result<Value> {
        const USAGE: &str = "save <type> <id> <user> <json-object> [summary]";
        let key = resource(args, USAGE)?;
        let user = arg(args, 4, USAGE)?;
        let content: Content =
            serde_json::from_str(arg(args, 5, USAGE)?).context("Content must be a JSON object")?;
        let summary = args.get(6).map(String::as_str);

        let version = self.history.create_version(&key, content, summary, user)?;
        Ok(serde_json::to_value(version)?)
    }

    fn history(&self, args: &[String]) -> Result<Value> {
        let key = resource(args, "history <type> <id>")?;
        Ok(serde_json::to_value(self.history.get_version_history(&key)?)?)
    }

    fn compare(&self, args: &[String]) -> Result<Value> {
        const USAGE: &str = "compare <type> <id> <from> <to>";
        let key = resource(args, USAGE)?;
        let from = arg(args, 4, USAGE)?.parse::<u64>().context("Invalid <from>")?;
        let to = arg(args, 5, USAGE)?.parse::<u64>().context("Invalid <to>")?;
        Ok(serde_json::to_value(self.history.compare_versions(&key, from, to)?)?)
    }

    fn rollback(&self, args: &[String]) -> Result<Value> {
        const USAGE: &str = "rollback <type> <id> <version> <user> [summary]";
        let key = resource(args, USAGE)?;
        let target = arg(args, 4, USAGE)?.parse::<u64>().context("Invalid <version>")?;
        let user = arg(args, 5, USAGE)?;
        let summary = args.get(6).map(String::as_str);

        let version = self.history.rollback_to_version(&key, target, user, summary)?;
        Ok(serde_json::to_value(version)?)
    }

    fn cleanup(&self, args: &[String]) -> Result<Value> {
        const USAGE: &str = "cleanup <type> <id> <keep>";
        let key = resource(args, USAGE)?;
        let keep = arg(args, 4, USAGE)?.parse::<usize>().context("Invalid <keep>")?;
        let removed = self.history.cleanup_old_versions(&key, keep)?;
        Ok(json!({ "resource": key, "removed": removed }))
    }
}

fn arg<'a>(args: &'a [String], index: usize, usage: &str) -> Result<&'a str> {
    match args.get(index) {
        Some(value) => Ok(value.as_str()),
        None => bail!("Usage: tandem {usage}"),
    }
}

fn resource(args: &[String], usage: &str) -> Result<ResourceKey> {
    let resource_type: ResourceType = arg(args, 2, usage)?.parse()?;
    let resource_id = arg(args, 3, usage)?;
    Ok(ResourceKey::new(resource_type, resource_id))
}

fn print_help() {
    println!(
        r#"Tandem CLI

USAGE:
    tandem <COMMAND> [ARGS]

COMMANDS:
    init <type> <id> [content]                 Create or overwrite a resource body
    edit <type> <id> <user> <content>          Submit a content edit
         [--base N] [--position P]
    ops <type> <id>                            Show version and pending operations
    clear <type> <id>                          Clear the pending operation log
    conflicts <type> <id>                      List recorded conflict resolutions
    save <type> <id> <user> <json> [summary]   Save a document version
    history <type> <id>                        List versions with their changes
    compare <type> <id> <from> <to>            Diff two versions
    rollback <type> <id> <version> <user>      Restore a version as a new version
         [summary]
    cleanup <type> <id> <keep>                 Keep only the newest versions
    merge <earlier> <later>                    Line-merge two contents
    help                                       Show this help message

    <type> is one of: task, project, comment

ENVIRONMENT:
    TANDEM_DB_PATH             SQLite database path (default ./tandem.db)
    TANDEM_CONFLICT_WINDOW_MS  Concurrency window (default 1000)
    TANDEM_MERGE_RULE          line_union | keep_latest
    TANDEM_STRATEGY            last_write_wins | operational_transform | merge
    RUST_LOG                   Log filter (default info)

EXAMPLES:
    tandem init task t-1 "Write report"
    tandem edit task t-1 alice "Write quarterly report" --base 0
    tandem save project p-1 bob '{{"name": "Launch", "status": "open"}}'
"#
    );
}
