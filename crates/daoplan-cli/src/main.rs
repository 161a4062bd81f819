//! daoplan CLI: check, explain, and try out DAO declarations.

use clap::{Parser, Subcommand};
use daoplan_core::call::{Arg, Output};
use daoplan_core::config::DaoConfig;
use daoplan_core::mapper::{SqlLookup, SqlMapper};
use daoplan_core::value::Value;
use daoplan_exec::Dao;
use daoplan_io::{load_csv, MemoryDataSource, TableDef};
use daoplan_planner::{compile_interface, parse_dao_yaml, parse_mapper_yaml, DaoFile};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "daoplan-cli")]
#[command(about = "daoplan: compile data-access interfaces into executable plans", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile an interface declaration and report the first error
    Validate {
        /// Path to the interface YAML file
        #[arg(short, long)]
        dao: PathBuf,

        /// Extra SQL mapper YAML merged over the inline `sql:` table
        #[arg(short, long)]
        mapper: Option<PathBuf>,
    },

    /// Print the compiled plan of every method (EXPLAIN)
    Explain {
        /// Path to the interface YAML file
        #[arg(short, long)]
        dao: PathBuf,

        /// Extra SQL mapper YAML merged over the inline `sql:` table
        #[arg(short, long)]
        mapper: Option<PathBuf>,
    },

    /// Bind against an in-memory database and invoke one method
    Call {
        /// Path to the interface YAML file
        #[arg(short, long)]
        dao: PathBuf,

        /// Extra SQL mapper YAML merged over the inline `sql:` table
        #[arg(short, long)]
        mapper: Option<PathBuf>,

        /// Table to create, as `name:col,col`; prefix the key with `+` for
        /// an auto-increment id (e.g. `account:+id,name`)
        #[arg(long = "table")]
        tables: Vec<String>,

        /// CSV fixture to load, as `table=path.csv`
        #[arg(long = "seed")]
        seeds: Vec<String>,

        /// Method to invoke
        method: String,

        /// Arguments as a JSON array
        #[arg(default_value = "[]")]
        args: String,
    },
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { dao, mapper } => {
            if let Err(e) = validate_dao(&dao, mapper.as_deref()) {
                eprintln!("Validation failed: {}", e);
                std::process::exit(1);
            }
            println!("✓ Interface is valid");
        }
        Commands::Explain { dao, mapper } => {
            if let Err(e) = explain_dao(&dao, mapper.as_deref()) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Call {
            dao,
            mapper,
            tables,
            seeds,
            method,
            args,
        } => {
            if let Err(e) = call_method(&dao, mapper.as_deref(), &tables, &seeds, &method, &args) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

/// Read the interface file and merge any extra mapper file into its SQL table.
fn load(dao: &Path, mapper: Option<&Path>) -> Result<DaoFile, Box<dyn std::error::Error>> {
    let mut file = parse_dao_yaml(&fs::read_to_string(dao)?)?;
    if let Some(path) = mapper {
        let extra = parse_mapper_yaml(&fs::read_to_string(path)?)?;
        merge(&mut file.sql, &extra);
    }
    Ok(file)
}

fn merge(into: &mut SqlMapper, extra: &SqlMapper) {
    for id in extra.ids() {
        if let Some(entry) = extra.get(id) {
            into.insert(id, entry);
        }
    }
}

fn validate_dao(dao: &Path, mapper: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let file = load(dao, mapper)?;
    compile_interface(&file.interface, Some(&file.sql), &DaoConfig::from_env())?;
    Ok(())
}

fn explain_dao(dao: &Path, mapper: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let file = load(dao, mapper)?;
    let config = DaoConfig::from_env();
    let program = compile_interface(&file.interface, Some(&file.sql), &config)?;

    println!("Interface Plan");
    println!("==============");
    println!();
    println!("SQL entries: {}", file.sql.len());
    println!("Batch size:  {}", config.default_batch_size);
    println!();
    print!("{}", program);
    Ok(())
}

fn call_method(
    dao: &Path,
    mapper: Option<&Path>,
    tables: &[String],
    seeds: &[String],
    method: &str,
    args: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let file = load(dao, mapper)?;

    let ds = MemoryDataSource::new("cli");
    for spec in tables {
        ds.create_table(parse_table(spec)?)?;
    }
    for spec in seeds {
        let (table, path) = parse_seed(spec)?;
        let rows = load_csv(&ds, table, File::open(path)?)?;
        tracing::info!(table, rows, "seeded");
    }

    let dao = Dao::builder(file.interface)
        .data_source(Arc::new(ds))
        .mapper(Arc::new(file.sql))
        .config(DaoConfig::from_env())
        .bind()?;

    let out = dao.call(method, &parse_args(args)?)?;
    print_output(out)
}

/// `name:col,col` with an optional `+` marking the auto-increment key.
fn parse_table(spec: &str) -> Result<TableDef, String> {
    let (name, cols) = spec
        .split_once(':')
        .ok_or_else(|| format!("table '{spec}' must look like name:col,col"))?;
    let mut def = TableDef::new(name.trim());
    for col in cols.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        def = match col.strip_prefix('+') {
            Some(key) => def.auto_increment(key),
            None => def.column(col),
        };
    }
    Ok(def)
}

fn parse_seed(spec: &str) -> Result<(&str, &str), String> {
    match spec.split_once('=') {
        Some((table, path)) if !table.is_empty() && !path.is_empty() => Ok((table, path)),
        _ => Err(format!("seed '{spec}' must look like table=path.csv")),
    }
}

fn parse_args(json: &str) -> Result<Vec<Arg>, Box<dyn std::error::Error>> {
    let raw: Vec<serde_json::Value> = serde_json::from_str(json)?;
    Ok(raw.into_iter().map(|v| Arg::Value(Value::from(v))).collect())
}

fn print_output(out: Output) -> Result<(), Box<dyn std::error::Error>> {
    match out {
        Output::Unit => println!("✓ ok"),
        Output::Value(v) => println!("{}", serde_json::to_string_pretty(&serde_json::Value::from(&v))?),
        Output::RowSet(rs) => {
            let rows: Vec<serde_json::Value> = rs
                .iter()
                .map(|row| {
                    row.to_map()
                        .iter()
                        .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                        .collect::<serde_json::Map<_, _>>()
                        .into()
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Output::Stream(stream) => {
            for item in stream {
                println!("{}", serde_json::Value::from(&item?));
            }
        }
    }
    Ok(())
}
