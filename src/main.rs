//! kiwi CLI: administer a KiWi triple store.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;

use kiwi_store::config::StoreConfig;
use kiwi_store::connection::{TripleConnection, TriplePattern};
use kiwi_store::model::{Term, Triple};
use kiwi_store::persistence::functions::FunctionRegistry;
use kiwi_store::persistence::statements::create_script;
use kiwi_store::persistence::{Dialect, ObjectFilter};
use kiwi_store::store::TripleStore;

#[derive(Parser)]
#[command(name = "kiwi", version, about = "Relational RDF triple store")]
struct Cli {
    /// Store configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file; overrides the configuration.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema.
    Init {
        /// Also write the effective configuration to this file.
        #[arg(long)]
        write_config: Option<PathBuf>,
    },

    /// Print the DDL for a dialect.
    Schema {
        #[arg(long, default_value = "sqlite")]
        dialect: Dialect,
    },

    /// Add one statement. Terms use N-Triples syntax or bound prefixes.
    Add {
        subject: String,
        predicate: String,
        object: String,
        #[arg(long)]
        context: Option<String>,
    },

    /// Soft-delete the statements matching a pattern.
    Remove {
        #[command(flatten)]
        pattern: PatternArgs,
    },

    /// List the statements matching a pattern as JSON lines.
    Query {
        #[command(flatten)]
        pattern: PatternArgs,

        /// Regular expression on the object's value.
        #[arg(long)]
        regex: Option<String>,

        /// Regex flags (i, s, m, x).
        #[arg(long, default_value = "")]
        flags: String,

        /// Skip inferred statements.
        #[arg(long)]
        explicit_only: bool,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// List the named graphs.
    Contexts,

    /// Print store statistics as JSON.
    Stats,

    /// Show how native functions render for a dialect.
    Functions {
        #[arg(long, default_value = "sqlite")]
        dialect: Dialect,
    },

    /// Manage namespace prefixes.
    Ns {
        #[command(subcommand)]
        action: NsAction,
    },
}

#[derive(clap::Args)]
struct PatternArgs {
    #[arg(long)]
    subject: Option<String>,
    #[arg(long)]
    predicate: Option<String>,
    #[arg(long)]
    object: Option<String>,
    #[arg(long)]
    context: Option<String>,
}

#[derive(Subcommand)]
enum NsAction {
    /// Bind a prefix.
    Set { prefix: String, uri: String },
    /// List bindings.
    List,
    /// Remove a binding.
    Remove { prefix: String },
}

#[derive(Serialize)]
struct TripleOut {
    id: i64,
    subject: String,
    predicate: String,
    object: String,
    context: Option<String>,
    inferred: bool,
}

impl From<&Triple> for TripleOut {
    fn from(t: &Triple) -> Self {
        Self {
            id: t.id,
            subject: t.subject.to_string(),
            predicate: t.predicate.to_string(),
            object: t.object.to_string(),
            context: t.context.as_ref().map(|c| c.to_string()),
            inferred: t.inferred,
        }
    }
}

#[derive(Serialize)]
struct FunctionOut {
    name: &'static str,
    supported: bool,
    sql: Option<String>,
    error: Option<String>,
}

fn load_config(cli: &Cli) -> Result<StoreConfig> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::sqlite("kiwi.db"),
    };
    if let Some(db) = &cli.database {
        config.database = db.clone();
    }
    Ok(config)
}

/// N-Triples syntax, a bound `prefix:local` name, or a bare absolute IRI.
fn parse_term(store: &TripleStore, input: &str) -> Result<Term> {
    let s = input.trim();
    if s.starts_with('<') || s.starts_with('"') || s.starts_with("_:") {
        return Ok(s.parse::<Term>()?);
    }
    if let Some(uri) = store.namespaces().expand(s)? {
        return Ok(Term::checked_uri(uri)?);
    }
    Ok(Term::checked_uri(s)?)
}

fn pattern(store: &TripleStore, args: &PatternArgs) -> Result<TriplePattern> {
    let term = |v: &Option<String>| v.as_deref().map(|s| parse_term(store, s)).transpose();
    let mut pattern = TriplePattern::any();
    pattern.subject = term(&args.subject)?;
    pattern.predicate = term(&args.predicate)?;
    pattern.object = term(&args.object)?;
    if let Some(ctx) = term(&args.context)? {
        pattern.contexts.push(Some(ctx));
    }
    Ok(pattern)
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Schema { dialect } => {
            for statement in create_script(*dialect) {
                println!("{statement};");
            }
            return Ok(());
        }
        Commands::Functions { dialect } => {
            let registry = FunctionRegistry::with_builtins();
            let mut out = Vec::new();
            for name in registry.names() {
                let function = registry.get(name)?;
                let args: Vec<String> = (1..=*function.arity().start()).map(|i| format!("${i}")).collect();
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                let rendered = function.native(*dialect, &args);
                out.push(FunctionOut {
                    name,
                    supported: function.is_supported(*dialect),
                    error: rendered.as_ref().err().map(|e| e.to_string()),
                    sql: rendered.ok(),
                });
            }
            return print_json(&out);
        }
        _ => {}
    }

    let config = load_config(&cli)?;
    let store = TripleStore::open(config.clone())?;

    match &cli.command {
        Commands::Init { write_config } => {
            if let Some(path) = write_config {
                config.save(path)?;
                println!("Wrote configuration to {}", path.display());
            }
            println!("Initialized {} at {}", config.name, config.database.display());
        }

        Commands::Add {
            subject,
            predicate,
            object,
            context,
        } => {
            let s = parse_term(&store, subject)?;
            let p = parse_term(&store, predicate)?;
            let o = parse_term(&store, object)?;
            let c = context.as_deref().map(|c| parse_term(&store, c)).transpose()?;
            let mut conn = store.connection()?;
            conn.begin()?;
            let triple = conn.add_statement(&s, &p, &o, c.as_ref())?;
            conn.commit()?;
            print_json(&TripleOut::from(&triple))?;
        }

        Commands::Remove { pattern: args } => {
            let pattern = pattern(&store, args)?;
            let mut conn = store.connection()?;
            conn.begin()?;
            let removed = conn.remove_statements(&pattern)?;
            conn.commit()?;
            println!("Removed {removed} statement(s)");
        }

        Commands::Query {
            pattern: args,
            regex,
            flags,
            explicit_only,
            limit,
        } => {
            let mut pattern = pattern(&store, args)?.include_inferred(!explicit_only);
            if let Some(regex) = regex {
                pattern = pattern.filter(ObjectFilter::regex(regex.clone(), flags.clone()));
            }
            let conn = store.connection()?;
            for triple in conn.get_statements(&pattern)?.take(limit.unwrap_or(usize::MAX)) {
                println!(
                    "{}",
                    serde_json::to_string(&TripleOut::from(&triple?)).into_diagnostic()?
                );
            }
        }

        Commands::Contexts => {
            let conn = store.connection()?;
            for ctx in conn.get_context_ids()? {
                println!("{ctx}");
            }
        }

        Commands::Stats => {
            let conn = store.connection()?;
            let stats = serde_json::json!({
                "name": config.name,
                "dialect": store.dialect().name(),
                "triples": conn.size(&[])?,
                "contexts": conn.get_context_ids()?.len(),
                "namespaces": store.namespaces().list()?.len(),
                "cache": store.cache().stats(),
            });
            print_json(&stats)?;
        }

        Commands::Ns { action } => match action {
            NsAction::Set { prefix, uri } => {
                print_json(&store.namespaces().set(prefix, uri)?)?;
            }
            NsAction::List => {
                print_json(&store.namespaces().list()?)?;
            }
            NsAction::Remove { prefix } => {
                if store.namespaces().remove(prefix)? {
                    println!("Removed prefix {prefix}");
                } else {
                    println!("Prefix {prefix} was not bound");
                }
            }
        },

        Commands::Schema { .. } | Commands::Functions { .. } => {}
    }

    store.close();
    Ok(())
}
