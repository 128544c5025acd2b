use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use collector::config::Config;
use collector::db::backup::snapshot_file_name;
use collector::db::{Database, FieldType, Item, ItemCursor, MetaField, QueryComponent, QueryOperator, Value};
use collector::export::{ExportFormat, ExportOptions};
use collector::logging;
use collector::tasks::BackgroundTaskManager;

#[derive(Debug, PartialEq)]
enum Command {
    Albums,
    Fields { album: String },
    Items { album: String },
    Search {
        album: String,
        match_all: bool,
        components: Vec<QueryComponent>,
    },
    Quick { album: String, term: String },
    Sql { album: String, query: String },
    Create {
        album: String,
        fields: Vec<MetaField>,
        pictures: bool,
    },
    Add { album: String, values: Vec<(String, String)> },
    Backup { path: Option<PathBuf> },
    Restore { path: PathBuf },
    Export {
        album: String,
        path: PathBuf,
        format: ExportFormat,
    },
}

#[derive(Debug, PartialEq)]
struct Args {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut config_path = None;
    let mut rest = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("collector {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                let Some(path) = args.get(i + 1) else {
                    bail!("--config requires a path argument");
                };
                config_path = Some(PathBuf::from(path));
                i += 1;
            }
            other => rest.push(other.to_string()),
        }
        i += 1;
    }

    let command = parse_command(rest)?;
    Ok(Args { config_path, command })
}

fn parse_command(mut rest: Vec<String>) -> Result<Command> {
    if rest.is_empty() {
        bail!("no command given");
    }
    let name = rest.remove(0);
    let flag = |rest: &mut Vec<String>, flag: &str| -> bool {
        let before = rest.len();
        rest.retain(|a| a != flag);
        rest.len() != before
    };

    let command = match name.as_str() {
        "albums" => Command::Albums,
        "fields" => Command::Fields { album: one(&rest, "fields ALBUM")? },
        "items" => Command::Items { album: one(&rest, "items ALBUM")? },
        "search" => {
            let match_all = !flag(&mut rest, "--any");
            let Some((album, triples)) = rest.split_first() else {
                bail!("usage: search ALBUM [--any] FIELD OP VALUE ...");
            };
            if triples.is_empty() || triples.len() % 3 != 0 {
                bail!("search expects FIELD OP VALUE triples");
            }
            let components = triples
                .chunks(3)
                .map(|t| -> Result<QueryComponent> {
                    let op = QueryOperator::from_str(&t[1])
                        .with_context(|| format!("unknown operator '{}'", t[1]))?;
                    Ok(QueryComponent::new(&t[0], op, &t[2]))
                })
                .collect::<Result<Vec<_>>>()?;
            Command::Search {
                album: album.clone(),
                match_all,
                components,
            }
        }
        "quick" => match rest.as_slice() {
            [album, term] => Command::Quick {
                album: album.clone(),
                term: term.clone(),
            },
            _ => bail!("usage: quick ALBUM TERM"),
        },
        "sql" => match rest.as_slice() {
            [album, query] => Command::Sql {
                album: album.clone(),
                query: query.clone(),
            },
            _ => bail!("usage: sql ALBUM QUERY"),
        },
        "create" => {
            let pictures = flag(&mut rest, "--pictures");
            let Some((album, specs)) = rest.split_first() else {
                bail!("usage: create ALBUM [--pictures] NAME:TYPE ...");
            };
            let fields = specs
                .iter()
                .map(|spec| parse_field_spec(spec))
                .collect::<Result<Vec<_>>>()?;
            Command::Create {
                album: album.clone(),
                fields,
                pictures,
            }
        }
        "add" => {
            let Some((album, pairs)) = rest.split_first() else {
                bail!("usage: add ALBUM FIELD=VALUE ...");
            };
            let values = pairs
                .iter()
                .map(|pair| {
                    pair.split_once('=')
                        .map(|(f, v)| (f.to_string(), v.to_string()))
                        .with_context(|| format!("expected FIELD=VALUE, got '{}'", pair))
                })
                .collect::<Result<Vec<_>>>()?;
            Command::Add {
                album: album.clone(),
                values,
            }
        }
        "backup" => match rest.as_slice() {
            [] => Command::Backup { path: None },
            [path] => Command::Backup {
                path: Some(PathBuf::from(path)),
            },
            _ => bail!("usage: backup [FILE]"),
        },
        "restore" => Command::Restore {
            path: PathBuf::from(one(&rest, "restore FILE")?),
        },
        "export" => {
            let json = flag(&mut rest, "--json");
            match rest.as_slice() {
                [album, path] => {
                    let path = PathBuf::from(path);
                    let format = if json {
                        ExportFormat::Json
                    } else {
                        ExportFormat::from_path(&path)
                    };
                    Command::Export {
                        album: album.clone(),
                        path,
                        format,
                    }
                }
                _ => bail!("usage: export ALBUM FILE [--json]"),
            }
        }
        other => bail!("unknown command '{}'", other),
    };
    Ok(command)
}

fn one(rest: &[String], usage: &str) -> Result<String> {
    match rest {
        [value] => Ok(value.clone()),
        _ => bail!("usage: {}", usage),
    }
}

/// `Name:TYPE`, with a trailing `*` on the type marking the field quick-searchable.
fn parse_field_spec(spec: &str) -> Result<MetaField> {
    let (name, type_name) = spec
        .rsplit_once(':')
        .with_context(|| format!("expected NAME:TYPE, got '{}'", spec))?;
    let (type_name, quick) = match type_name.strip_suffix('*') {
        Some(t) => (t, true),
        None => (type_name, false),
    };
    let field_type =
        FieldType::from_str(type_name).with_context(|| format!("unknown field type '{}'", type_name))?;
    Ok(MetaField::new(name, field_type).quick_searchable(quick))
}

fn print_help() {
    println!(
        r#"collector - catalogue collections in user-defined albums

USAGE:
    collector [OPTIONS] COMMAND [ARGS]

COMMANDS:
    albums                              List albums
    fields ALBUM                        Show an album's fields
    items ALBUM                         Show all items of an album
    search ALBUM [--any] FIELD OP VALUE ...
                                        Structured search (OP: = != ~ > >= < <=)
    quick ALBUM TERM                    Search all quick-searchable fields
    sql ALBUM QUERY                     Run a read-only SELECT returning ids
    create ALBUM [--pictures] NAME:TYPE[*] ...
                                        Create an album (* = quick-searchable)
    add ALBUM FIELD=VALUE ...           Add an item
    backup [FILE]                       Snapshot the store
    restore FILE                        Replace the store with a snapshot
    export ALBUM FILE [--json]          Export items as CSV or JSON

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    COLLECTOR_CONFIG    Path to config file (overrides default location)
    COLLECTOR_LOG       Log filter (trace, debug, info, warn, error)

Field types: TEXT DATE INTEGER DECIMAL OPTION STAR_RATING TIME URL"#
    );
}

fn print_items(db: &Database, album: &str, items: ItemCursor<'_>) -> Result<()> {
    let fields = db.get_fields(album)?;
    let mut count = 0;
    for item in items {
        let item = item?;
        count += 1;
        println!("#{}", item.id.unwrap_or_default());
        for field in &fields {
            if let Some(value) = item.value(&field.name).filter(|v| !v.is_null()) {
                println!("    {}: {}", field.name, value);
            }
        }
        for picture in &item.pictures {
            println!("    [picture] {}", picture.original_path.display());
        }
    }
    println!("{} item(s)", count);
    Ok(())
}

/// Drive background tasks to completion, reporting progress on stderr.
fn wait_for_tasks(manager: &mut BackgroundTaskManager) -> Result<()> {
    loop {
        for info in manager.poll_updates() {
            eprintln!();
            if !info.success {
                bail!("{} failed: {}", info.task_type.display_name(), info.message);
            }
            println!("{}", info.message);
        }
        if !manager.has_running_tasks() {
            return Ok(());
        }
        if let Some(task) = manager.running_tasks().first() {
            if let Some(progress) = &task.progress {
                eprint!("\r{}: {:>3}%", task.task_type.display_name(), progress.percent());
            }
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

fn run(config: Config, command: Command) -> Result<()> {
    let mut db = Database::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?
        .with_page_size(config.search.page_size);

    match command {
        Command::Albums => {
            for name in db.list_albums()? {
                let pictures = if db.is_picture_album(&name)? { " [pictures]" } else { "" };
                println!("{} ({} items){}", name, db.get_item_count(&name)?, pictures);
            }
        }
        Command::Fields { album } => {
            for field in db.get_fields(&album)? {
                println!(
                    "{:>3}  {:<24} {:<12}{}",
                    field.ordinal,
                    field.name,
                    field.field_type.as_str(),
                    if field.quick_searchable { " quick" } else { "" }
                );
            }
        }
        Command::Items { album } => print_items(&db, &album, db.select_all(&album)?)?,
        Command::Search {
            album,
            match_all,
            components,
        } => {
            let query = db.build_query(&components, match_all, &album)?;
            print_items(&db, &album, db.execute(&query))?;
        }
        Command::Quick { album, term } => print_items(&db, &album, db.quick_search(&album, &term)?)?,
        Command::Sql { album, query } => print_items(&db, &album, db.execute_raw_query(&album, &query)?)?,
        Command::Create {
            album,
            fields,
            pictures,
        } => {
            db.create_album(&album, fields, pictures)?;
            println!("Created album '{}'", album);
        }
        Command::Add { album, values } => {
            let schema = db.album(&album)?;
            let mut item = Item::new(&schema.name);
            for (name, literal) in values {
                let field = schema
                    .field(&name)
                    .with_context(|| format!("album '{}' has no field '{}'", schema.name, name))?;
                let value = Value::parse(field.field_type, &literal)
                    .map_err(|reason| anyhow::anyhow!("{}: {}", field.name, reason))?;
                item.set_value(field.name.clone(), value);
            }
            let id = db.add_item(&item, true)?;
            println!("Added item #{} to '{}'", id, schema.name);
        }
        Command::Backup { path } => {
            let path = path.unwrap_or_else(|| {
                config
                    .backup
                    .directory
                    .join(snapshot_file_name(chrono::Local::now()))
            });
            let shared = Arc::new(Mutex::new(db));
            let mut manager = BackgroundTaskManager::new();
            manager.spawn_backup(shared, path, config.backup.pages_per_step);
            wait_for_tasks(&mut manager)?;
        }
        Command::Restore { path } => {
            let shared = Arc::new(Mutex::new(db));
            let mut manager = BackgroundTaskManager::new();
            manager.spawn_restore(shared, path, config.backup.pages_per_step);
            wait_for_tasks(&mut manager)?;
        }
        Command::Export { album, path, format } => {
            let shared = Arc::new(Mutex::new(db));
            let mut manager = BackgroundTaskManager::new();
            manager.spawn_export(shared, album, path, format, ExportOptions::from(&config.export));
            wait_for_tasks(&mut manager)?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&argv) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    let config = match args.config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };

    match logging::init(config.log_dir.clone()) {
        Ok(sink) => tracing::debug!(?sink, db = %config.db_path.display(), "Starting"),
        Err(e) => eprintln!("Warning: logging disabled: {:#}", e),
    }

    run(config, args.command)
}
