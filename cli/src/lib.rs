use anyhow::{Error, Result};
use clap::{Parser, Subcommand};
use log::{debug, info};
use nativerdf::consts::{CONFIG_FILE, METADATA_FILE, NAMESPACES_FILE, VALUES_FILE};
use nativerdf::triple_store::{index_file, load_metadata};
use nativerdf::{ContextPattern, NativeStore, StoreConfig, SyncMode, Term};
use oxigraph::io::{RdfFormat, RdfParser};
use oxigraph::model::GraphName;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "nativerdf")]
#[command(about = "Native RDF quad store")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Verbose mode - sets the RUST_LOG level to info, defaults to warning level
    #[clap(long, short, action, default_value = "false", global = true)]
    verbose: bool,
    /// Debug mode - sets the RUST_LOG level to debug, defaults to warning level
    #[clap(long, action, default_value = "false", global = true)]
    debug: bool,
    /// Directory holding the store, created if missing
    #[clap(long, short, default_value = "nativerdf-data", global = true)]
    dir: PathBuf,
    /// Comma separated triple indexes, e.g. 'spoc,posc'. Defaults to the saved configuration
    #[clap(long, short = 'x', global = true)]
    indexes: Option<String>,
    /// Force every sync to reach the disk
    #[clap(long, action, default_value = "false", global = true)]
    force_sync: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load an RDF file into the store in a single transaction
    Load {
        /// The file to load
        file: PathBuf,
        /// One of nquads, trig, turtle, ntriples, rdfxml. Guessed from the extension if omitted
        #[clap(long, short)]
        format: Option<String>,
        /// Graph IRI for statements without a graph, defaults to the default graph
        #[clap(long, short)]
        graph: Option<String>,
    },
    /// Print the statements matching a pattern as N-Quads
    Query {
        /// Subject term, e.g. '<http://example.org/s>' or '_:b0'
        #[clap(long, short)]
        subject: Option<String>,
        /// Predicate IRI
        #[clap(long, short)]
        predicate: Option<String>,
        /// Object term; literals as '"label"', '"label"@en' or '"1"^^<datatype>'
        #[clap(long, short)]
        object: Option<String>,
        /// Graph IRI, or 'default' for the default graph. All graphs if omitted
        #[clap(long, short)]
        context: Option<String>,
        /// Include inferred statements
        #[clap(long, action, default_value = "false")]
        inferred: bool,
        /// Stop after this many statements
        #[clap(long, short)]
        limit: Option<usize>,
    },
    /// Print statement and value counts, the active indexes and file sizes
    Stats {
        /// Output JSON instead of text
        #[clap(long, action, default_value = "false")]
        json: bool,
    },
    /// Print every stored value with its id
    DumpValues,
    /// Change the triple indexes of the store, e.g. 'spoc,posc,cosp'
    Reindex {
        /// The new index list; the first index is the primary one
        spec: String,
    },
    /// Print the store configuration
    Config,
    /// Prints the version of the nativerdf binary
    Version,
}

impl ToString for Commands {
    fn to_string(&self) -> String {
        match self {
            Commands::Load { .. } => "Load".to_string(),
            Commands::Query { .. } => "Query".to_string(),
            Commands::Stats { .. } => "Stats".to_string(),
            Commands::DumpValues => "DumpValues".to_string(),
            Commands::Reindex { .. } => "Reindex".to_string(),
            Commands::Config => "Config".to_string(),
            Commands::Version => "Version".to_string(),
        }
    }
}

pub fn run() -> Result<()> {
    nativerdf::init_logging();
    let cmd = Cli::parse();
    execute(cmd)
}

pub fn run_from_args<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    nativerdf::init_logging();
    let cmd = Cli::try_parse_from(args).map_err(Error::from)?;
    execute(cmd)
}

/// Saved configuration of the store in `dir` with the command line overrides applied.
fn resolve_config(cmd: &Cli) -> Result<(StoreConfig, bool)> {
    let path = cmd.dir.join(CONFIG_FILE);
    let mut config = if path.exists() {
        debug!("Loading configuration from {}", path.display());
        StoreConfig::from_file(&path)?
    } else {
        StoreConfig::new(&cmd.dir)
    };
    let mut changed = !path.exists();
    config.data_dir = cmd.dir.clone();
    if let Some(indexes) = &cmd.indexes {
        changed |= config.triple_indexes != *indexes;
        config.triple_indexes = indexes.clone();
    }
    if cmd.force_sync && !config.force_sync() {
        config.sync_mode = SyncMode::Force;
        changed = true;
    }
    Ok((config, changed))
}

fn execute(cmd: Cli) -> Result<()> {
    // The RUST_LOG env var is set by `init_logging` if NATIVERDF_LOG is present.
    // CLI flags for verbosity take precedence. If nothing is set, we default to "warn".
    if cmd.debug {
        std::env::set_var("RUST_LOG", "debug");
    } else if cmd.verbose {
        std::env::set_var("RUST_LOG", "info");
    } else if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    let _ = env_logger::try_init();

    if let Commands::Version = cmd.command {
        println!("nativerdf {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let (config, changed) = resolve_config(&cmd)?;
    if cmd.verbose || cmd.debug {
        config.print();
    }
    let mut store = NativeStore::open(config)?;
    if changed {
        // the store has accepted the configuration, remember it for the next run
        store
            .config()
            .save_to_file(&cmd.dir.join(CONFIG_FILE))?;
    }
    info!("Running {}", cmd.command.to_string());

    match cmd.command {
        Commands::Load {
            file,
            format,
            graph,
        } => {
            let (total, added) = load_file(&store, &file, format.as_deref(), graph.as_deref())?;
            println!(
                "Loaded {total} statements ({added} new) from {}",
                file.display()
            );
        }
        Commands::Query {
            subject,
            predicate,
            object,
            context,
            inferred,
            limit,
        } => {
            let subject = subject.as_deref().map(parse_term).transpose()?;
            let predicate = predicate.as_deref().map(parse_term).transpose()?;
            let object = object.as_deref().map(parse_term).transpose()?;
            let graph = match context.as_deref() {
                Some(c) if c != "default" => Some(parse_term(c)?),
                _ => None,
            };
            let context = match (&context, &graph) {
                (_, Some(g)) => ContextPattern::Named(g),
                (Some(_), None) => ContextPattern::DefaultGraph,
                (None, None) => ContextPattern::Any,
            };
            let stdout = std::io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            let statements = store.statements(
                subject.as_ref(),
                predicate.as_ref(),
                object.as_ref(),
                context,
                inferred,
            )?;
            for statement in statements.take(limit.unwrap_or(usize::MAX)) {
                let statement = statement?;
                if statement.explicit {
                    writeln!(out, "{statement}")?;
                } else {
                    writeln!(out, "{statement} # inferred")?;
                }
            }
            out.flush()?;
        }
        Commands::Stats { json } => {
            let stats = collect_stats(&store)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats.to_json())?);
            } else {
                stats.print();
            }
        }
        Commands::DumpValues => {
            let values = store.value_store();
            let stdout = std::io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            for id in 1..=values.max_id() {
                if let Some(term) = values.get_value(id)? {
                    writeln!(out, "{id}\t{term}")?;
                }
            }
            out.flush()?;
        }
        Commands::Reindex { spec } => {
            store.reindex(&spec)?;
            store
                .config()
                .save_to_file(&cmd.dir.join(CONFIG_FILE))?;
            println!("Indexes: {}", store.config().triple_indexes);
        }
        Commands::Config => {
            let config_json = serde_json::to_value(store.config())?;
            println!("{}", serde_json::to_string_pretty(&config_json)?);
        }
        Commands::Version => {
            // This command is handled before the store is opened.
        }
    }

    store.close()?;
    Ok(())
}

fn parse_term(s: &str) -> Result<Term> {
    Term::parse(s).ok_or_else(|| anyhow::anyhow!("Invalid term '{}'", s))
}

fn parse_format(name: &str) -> Result<RdfFormat> {
    Ok(match name.to_ascii_lowercase().as_str() {
        "nquads" | "nq" => RdfFormat::NQuads,
        "trig" => RdfFormat::TriG,
        "turtle" | "ttl" => RdfFormat::Turtle,
        "ntriples" | "nt" => RdfFormat::NTriples,
        "rdfxml" | "xml" | "rdf" => RdfFormat::RdfXml,
        other => {
            return Err(anyhow::anyhow!(
                "Unsupported format '{}'. Use one of: nquads, trig, turtle, ntriples, rdfxml",
                other
            ))
        }
    })
}

/// Parses `file` and adds every quad in one transaction.
///
/// Returns the number of statements read and how many of them were new.
fn load_file(
    store: &NativeStore,
    file: &Path,
    format: Option<&str>,
    graph: Option<&str>,
) -> Result<(usize, usize)> {
    let format = match format {
        Some(f) => parse_format(f)?,
        None => {
            let ext = file
                .extension()
                .and_then(|e| e.to_str())
                .ok_or_else(|| anyhow::anyhow!("Cannot guess the format of {}", file.display()))?;
            parse_format(ext)?
        }
    };
    let default_graph = graph.map(parse_term).transpose()?;
    let reader = BufReader::new(File::open(file)?);
    let parser = RdfParser::from_format(format).for_reader(reader);

    let mut txn = store.begin();
    let (mut total, mut added) = (0, 0);
    for quad in parser {
        let quad = quad?;
        let subject = Term::from_oxigraph_resource(&quad.subject)?;
        let predicate = Term::iri(quad.predicate.as_str());
        let object = Term::from_oxigraph(quad.object.as_ref())?;
        let context = match &quad.graph_name {
            GraphName::NamedNode(n) => Some(Term::iri(n.as_str())),
            GraphName::BlankNode(b) => Some(Term::bnode(b.as_str())),
            GraphName::DefaultGraph => default_graph.clone(),
        };
        if txn.add_statement(&subject, &predicate, &object, context.as_ref())? {
            added += 1;
        }
        total += 1;
    }
    txn.commit()?;
    Ok((total, added))
}

struct StoreStats {
    statements: usize,
    explicit: usize,
    contexts: usize,
    values: i32,
    indexes: String,
    updated: Option<String>,
    files: Vec<(String, u64)>,
}

fn collect_stats(store: &NativeStore) -> Result<StoreStats> {
    let dir = &store.config().data_dir;
    let explicit = store
        .statements(None, None, None, ContextPattern::Any, false)?
        .count();
    let mut files: Vec<PathBuf> = vec![dir.join(VALUES_FILE), dir.join(NAMESPACES_FILE)];
    files.extend(store.index_specs().iter().map(|spec| index_file(dir, spec)));
    files.push(dir.join(METADATA_FILE));
    let files = files
        .into_iter()
        .filter_map(|path| {
            let size = std::fs::metadata(&path).ok()?.len();
            let name = path.file_name()?.to_string_lossy().into_owned();
            Some((name, size))
        })
        .collect();
    Ok(StoreStats {
        statements: store.size(ContextPattern::Any)?,
        explicit,
        contexts: store.contexts()?.len(),
        values: store.value_store().max_id(),
        indexes: nativerdf::IndexSpec::format_list(&store.index_specs()),
        updated: load_metadata(dir)?.map(|m| m.updated.to_rfc3339()),
        files,
    })
}

impl StoreStats {
    fn total_size(&self) -> u64 {
        self.files.iter().map(|(_, size)| size).sum()
    }

    fn print(&self) {
        println!("Statements: {} ({} explicit)", self.statements, self.explicit);
        println!("Named graphs: {}", self.contexts);
        println!("Values: {}", self.values);
        println!("Indexes: {}", self.indexes);
        if let Some(updated) = &self.updated {
            println!("Indexes updated: {updated}");
        }
        println!("Files:");
        for (name, size) in &self.files {
            println!("  {name}: {}", pretty_bytes::converter::convert(*size as f64));
        }
        println!(
            "Total size: {}",
            pretty_bytes::converter::convert(self.total_size() as f64)
        );
    }

    fn to_json(&self) -> serde_json::Value {
        let files: serde_json::Map<String, serde_json::Value> = self
            .files
            .iter()
            .map(|(name, size)| (name.clone(), serde_json::json!(size)))
            .collect();
        serde_json::json!({
            "statements": self.statements,
            "explicit": self.explicit,
            "contexts": self.contexts,
            "values": self.values,
            "indexes": self.indexes,
            "updated": self.updated,
            "files": files,
            "total_size": self.total_size(),
        })
    }
}
