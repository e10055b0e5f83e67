mod output;

use anyhow::{Context, Result};
use caslake_core::{Entry, Fields, LakeConfig, LocalLake, Order, Query, extension_of, migrate_tree};
use clap::{ArgAction, Parser, Subcommand};
use output::{
    EntryInfo, InitOutput, LinkOutput, MigrateOutput, OutputWriter, PathOutput, PutOutput,
    SelectOutput,
};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Caslake - A transactional content-addressed object lake
#[derive(Parser)]
#[command(name = "caslake")]
#[command(about = "Content-addressed object lake with a SQLite catalog", long_about = None)]
#[command(version)]
struct Cli {
    /// Lake root directory (defaults to CASLAKE_ROOT env var or ./caslake)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new lake
    Init {
        /// Caller field that must be unique across entries (repeatable)
        #[arg(long = "unique", value_name = "FIELD")]
        unique_fields: Vec<String>,
    },

    /// Add files to the lake in a single transaction
    Put {
        /// Files to add
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Field stored with every entry, as key=value or key:=json (repeatable)
        #[arg(long = "field", value_name = "K=V", value_parser = parse_assignment)]
        fields: Vec<(String, Value)>,

        /// File extension to store objects under (defaults to each file's own)
        #[arg(long)]
        ext: Option<String>,
    },

    /// Import every file under a directory
    Migrate {
        /// Source directory
        source: PathBuf,
    },

    /// List catalog entries
    Select {
        #[command(flatten)]
        filter: WhereArgs,

        /// Field to order by
        #[arg(long)]
        order_by: Option<String>,

        /// Order descending
        #[arg(long, requires = "order_by")]
        desc: bool,

        /// Maximum number of entries
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Output the content of exactly one matching entry to stdout
    Cat {
        #[command(flatten)]
        filter: RequiredWhereArgs,
    },

    /// Print stored paths of matching entries
    Path {
        #[command(flatten)]
        filter: RequiredWhereArgs,
    },

    /// Replace a directory with symlinks to matching entries
    Link {
        /// Destination directory
        dest: PathBuf,

        /// Field holding each link's relative path
        #[arg(long)]
        name_field: String,

        #[command(flatten)]
        filter: WhereArgs,
    },
}

#[derive(clap::Args)]
struct WhereArgs {
    /// Equality filter, as key=value or key:=json (repeatable)
    #[arg(long = "where", value_name = "K=V", value_parser = parse_assignment)]
    conditions: Vec<(String, Value)>,
}

#[derive(clap::Args)]
struct RequiredWhereArgs {
    /// Equality filter, as key=value or key:=json (repeatable)
    #[arg(long = "where", value_name = "K=V", value_parser = parse_assignment, required = true)]
    conditions: Vec<(String, Value)>,
}

/// Parse `key=value` as a string field, or `key:=json` as a JSON value.
fn parse_assignment(s: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = if let Some((key, raw)) = s.split_once(":=") {
        let value = serde_json::from_str(raw)
            .map_err(|e| format!("invalid JSON value for '{}': {}", key, e))?;
        (key, value)
    } else if let Some((key, raw)) = s.split_once('=') {
        (key, Value::String(raw.to_string()))
    } else {
        return Err(format!("expected key=value, got '{}'", s));
    };

    if key.is_empty() {
        return Err(format!("missing key in '{}'", s));
    }
    Ok((key.to_string(), value))
}

fn build_query(conditions: &[(String, Value)]) -> Query {
    conditions
        .iter()
        .fold(Query::all(), |query, (key, value)| {
            query.where_eq(key.as_str(), value.clone())
        })
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let output = OutputWriter::new(cli.json);

    // Determine lake root: CLI arg > CASLAKE_ROOT env var > ./caslake default
    let root = cli
        .root
        .or_else(|| std::env::var("CASLAKE_ROOT").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./caslake"));
    tracing::debug!(root = %root.display(), "resolved lake root");

    let result = match cli.command {
        Commands::Init { unique_fields } => cmd_init(&root, unique_fields, &output),
        Commands::Put { files, fields, ext } => cmd_put(&root, files, fields, ext, &output),
        Commands::Migrate { source } => cmd_migrate(&root, &source, &output),
        Commands::Select {
            filter,
            order_by,
            desc,
            limit,
        } => {
            let mut query = build_query(&filter.conditions);
            if let Some(field) = order_by {
                let order = if desc { Order::Desc } else { Order::Asc };
                query = query.order_by(field.as_str(), order);
            }
            if let Some(limit) = limit {
                query = query.limit(limit);
            }
            cmd_select(&root, &query, &output)
        }
        Commands::Cat { filter } => cmd_cat(&root, &build_query(&filter.conditions)),
        Commands::Path { filter } => cmd_path(&root, &build_query(&filter.conditions), &output),
        Commands::Link {
            dest,
            name_field,
            filter,
        } => cmd_link(
            &root,
            &dest,
            &name_field,
            &build_query(&filter.conditions),
            &output,
        ),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output.write_error(&e, 1);
            ExitCode::from(1)
        }
    }
}

fn open_lake(root: &Path) -> Result<LocalLake> {
    LocalLake::load(root).with_context(|| format!("Failed to open lake at {}", root.display()))
}

fn entry_infos(lake: &LocalLake, entries: &[Entry<Fields>]) -> Result<Vec<EntryInfo>> {
    entries
        .iter()
        .filter_map(|entry| {
            let path = match lake.to_path(entry) {
                Ok(path) => path,
                Err(e) => return Some(Err(e.into())),
            };
            EntryInfo::new(entry, path).map(Ok)
        })
        .collect()
}

fn cmd_init(root: &Path, unique_fields: Vec<String>, output: &OutputWriter) -> Result<()> {
    let config = LakeConfig {
        unique_fields,
        ..LakeConfig::default()
    };

    let lake = LocalLake::init_with(root, config)
        .with_context(|| format!("Failed to initialize lake at {}", root.display()))?;

    let data = InitOutput {
        success: true,
        result_code: 0,
        root: root.display().to_string(),
        base_dir: lake.base_dir().to_string(),
    };

    output.write(&data, || {
        format!(
            "Initialized caslake at {}\nStore: {}\n",
            root.display(),
            lake.base_dir()
        )
    })
}

fn cmd_put(
    root: &Path,
    files: Vec<PathBuf>,
    fields: Vec<(String, Value)>,
    ext: Option<String>,
    output: &OutputWriter,
) -> Result<()> {
    let lake = open_lake(root)?;

    let mut staged = Vec::with_capacity(files.len());
    for path in &files {
        let file =
            fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

        let mut entry_fields = Fields::new();
        if let Some(name) = path.file_name() {
            entry_fields.insert(
                "name".to_string(),
                Value::String(name.to_string_lossy().into_owned()),
            );
        }
        for (key, value) in &fields {
            entry_fields.insert(key.clone(), value.clone());
        }

        let extension = ext.clone().unwrap_or_else(|| extension_of(path));
        staged.push((file, Entry::new(extension, entry_fields)));
    }

    let committed = lake
        .with_transaction(|tx| {
            for (file, entry) in staged {
                tx.put(file, entry)?;
            }
            tx.commit()
        })
        .context("Failed to commit files")?;

    let data = PutOutput {
        success: true,
        result_code: 0,
        entries: entry_infos(&lake, &committed)?,
    };

    output.write(&data, || {
        data.entries
            .iter()
            .zip(&files)
            .map(|(info, path)| format!("{} {}\n", info.path, path.display()))
            .collect()
    })
}

fn cmd_migrate(root: &Path, source: &Path, output: &OutputWriter) -> Result<()> {
    let lake = open_lake(root)?;

    let stats = migrate_tree(&lake, source)
        .with_context(|| format!("Failed to migrate {}", source.display()))?;

    let data = MigrateOutput {
        success: true,
        result_code: 0,
        source: source.display().to_string(),
        files: stats.files,
        bytes: stats.bytes,
    };

    output.write(&data, || {
        format!(
            "Migrated {} files ({} bytes) from {}\n",
            stats.files,
            stats.bytes,
            source.display()
        )
    })
}

fn cmd_select(root: &Path, query: &Query, output: &OutputWriter) -> Result<()> {
    let lake = open_lake(root)?;

    let entries: Vec<Entry<Fields>> = lake.select(query).context("Failed to query catalog")?;

    let data = SelectOutput {
        success: true,
        result_code: 0,
        entries: entry_infos(&lake, &entries)?,
    };

    output.write(&data, || {
        if data.entries.is_empty() {
            "No matching entries\n".to_string()
        } else {
            data.entries.iter().map(EntryInfo::to_line).collect()
        }
    })
}

fn cmd_cat(root: &Path, query: &Query) -> Result<()> {
    let lake = open_lake(root)?;

    let entries: Vec<Entry<Fields>> = lake
        .select(&query.clone().limit(2))
        .context("Failed to query catalog")?;

    let entry = match entries.as_slice() {
        [entry] => entry,
        [] => anyhow::bail!("No matching entry"),
        _ => anyhow::bail!("More than one entry matches; narrow the filter"),
    };

    let mut reader = lake.open(entry).context("Failed to open object")?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    io::copy(&mut reader, &mut handle).context("Failed to write object to stdout")?;

    Ok(())
}

fn cmd_path(root: &Path, query: &Query, output: &OutputWriter) -> Result<()> {
    let lake = open_lake(root)?;

    let entries: Vec<Entry<Fields>> = lake.select(query).context("Failed to query catalog")?;
    let paths = entries
        .iter()
        .map(|entry| lake.to_path(entry))
        .collect::<caslake_core::Result<Vec<_>>>()?;

    let data = PathOutput {
        success: true,
        result_code: 0,
        paths,
    };

    output.write(&data, || {
        data.paths.iter().map(|p| format!("{}\n", p)).collect()
    })
}

/// Link name for an entry: the named field, or the object's own file name.
fn link_name(entry: &Entry<Fields>, name_field: &str) -> PathBuf {
    match entry.fields().get(name_field) {
        Some(Value::String(name)) => PathBuf::from(name),
        Some(Value::Number(n)) => PathBuf::from(n.to_string()),
        _ => {
            let hash = entry
                .content_hash()
                .map(|h| h.to_string())
                .unwrap_or_default();
            PathBuf::from(format!("{}{}", hash, entry.file_extension()))
        }
    }
}

#[cfg(unix)]
fn cmd_link(
    root: &Path,
    dest: &Path,
    name_field: &str,
    query: &Query,
    output: &OutputWriter,
) -> Result<()> {
    let lake = open_lake(root)?;

    let links = caslake_core::project_links(&lake, dest, query, |entry: &Entry<Fields>| {
        link_name(entry, name_field)
    })
    .with_context(|| format!("Failed to project links into {}", dest.display()))?;

    let data = LinkOutput {
        success: true,
        result_code: 0,
        destination: dest.display().to_string(),
        links,
    };

    output.write(&data, || {
        format!("Linked {} entries into {}\n", links, dest.display())
    })
}

#[cfg(not(unix))]
fn cmd_link(
    _root: &Path,
    _dest: &Path,
    _name_field: &str,
    _query: &Query,
    _output: &OutputWriter,
) -> Result<()> {
    anyhow::bail!("Symlink projection is only supported on unix")
}
