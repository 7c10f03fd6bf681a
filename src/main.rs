use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Args, Parser, Subcommand, ValueEnum};

use shelfkeep_lib::config::{LogConfig, StoreConfig};
use shelfkeep_lib::db::health::{HealthReport, HealthStatus};
use shelfkeep_lib::{
    flush_file_logs, init_file_logging, AppError, AssistantAnswer, FieldDefinition, FieldValue, FieldValues, InputClass,
    InventoryStore, Record, ValueType,
};

#[derive(Debug, Parser)]
#[command(name = "shelfkeep", about = "Inventory catalog with user-defined fields", version)]
struct Cli {
    /// Inventory database; defaults to SHELFKEEP_DB or the user data directory.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Reject items that omit any field, not only required ones.
    #[arg(long, global = true)]
    strict: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage the field definitions.
    #[command(subcommand)]
    Fields(FieldsCommand),
    /// Add, change, and look up inventory items.
    #[command(subcommand)]
    Items(ItemsCommand),
    /// Manage images attached to items.
    #[command(subcommand)]
    Images(ImagesCommand),
    /// Database inspection.
    #[command(subcommand)]
    Db(DbCommand),
    /// Manage the login account.
    #[command(subcommand)]
    Login(LoginCommand),
    /// Print every item as a JSON array.
    Export,
    /// Resolve an assistant reply into text or the items it names.
    Reply { text: String },
}

#[derive(Debug, Subcommand)]
enum FieldsCommand {
    List,
    Add {
        name: String,
        #[arg(long = "type", value_enum)]
        value_type: TypeArg,
        #[arg(long, value_enum, default_value = "small")]
        input: InputArg,
        #[arg(long)]
        required: bool,
    },
    Remove { name: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TypeArg {
    String,
    Int,
    Float,
}

impl From<TypeArg> for ValueType {
    fn from(arg: TypeArg) -> Self {
        match arg {
            TypeArg::String => ValueType::String,
            TypeArg::Int => ValueType::Int,
            TypeArg::Float => ValueType::Float,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InputArg {
    Small,
    Large,
    Image,
}

impl From<InputArg> for InputClass {
    fn from(arg: InputArg) -> Self {
        match arg {
            InputArg::Small => InputClass::Small,
            InputArg::Large => InputClass::Large,
            InputArg::Image => InputClass::Image,
        }
    }
}

#[derive(Debug, Args)]
struct SetArgs {
    /// `field=value`, repeatable.
    #[arg(long = "set", value_parser = parse_assignment)]
    set: Vec<(String, String)>,
}

impl SetArgs {
    fn values(&self) -> FieldValues {
        self.set
            .iter()
            .map(|(k, v)| (k.clone(), FieldValue::Text(v.clone())))
            .collect()
    }
}

#[derive(Debug, Subcommand)]
enum ItemsCommand {
    Add {
        #[command(flatten)]
        values: SetArgs,
        #[arg(long = "image")]
        images: Vec<PathBuf>,
    },
    /// Take stock off an item.
    Remove { id: String, amount: i64 },
    Update {
        id: String,
        #[command(flatten)]
        values: SetArgs,
    },
    Get { ids: Vec<String> },
    Search {
        query: String,
        #[arg(long = "field")]
        fields: Vec<String>,
    },
    List,
}

#[derive(Debug, Subcommand)]
enum ImagesCommand {
    List {
        id: String,
        /// Print base64 payloads as JSON.
        #[arg(long)]
        json: bool,
    },
    Add { id: String, path: PathBuf },
    Remove { id: String, path: PathBuf },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Run the health checks and report their status.
    Status {
        /// Emit the raw JSON health report instead of the table view.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
enum LoginCommand {
    Status,
    Set {
        username: String,
        password: String,
        #[arg(long)]
        required: bool,
    },
}

fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected field=value, got '{raw}'"))
}

fn main() {
    let log_config = LogConfig::from_env();
    shelfkeep_lib::logging::init_logging_with(&log_config.filter);
    if let Err(err) = init_file_logging(&log_config) {
        tracing::warn!(
            target: "shelfkeep",
            event = "file_logging_unavailable",
            dir = %log_config.dir.display(),
            error = %err
        );
    }

    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            match err.downcast_ref::<AppError>() {
                Some(app) => eprintln!("Error: [{}] {}", app.code(), format_app_error(app)),
                None => eprintln!("Error: {err:#}"),
            }
            1
        }
    };
    // `process::exit` skips destructors, so the file worker is drained here.
    flush_file_logs();
    process::exit(code);
}

fn format_app_error(err: &AppError) -> String {
    match err.context().get("field") {
        Some(field) => format!("{} (field '{field}')", err.message()),
        None => err.message().to_string(),
    }
}

fn open_store(cli: &Cli) -> Result<InventoryStore> {
    let mut config = StoreConfig::from_env();
    if let Some(db) = &cli.db {
        let strict = config.strict_insert;
        config = StoreConfig::for_db(db.clone()).strict(strict);
    }
    let mut store = InventoryStore::open(&config)?;
    if cli.strict {
        store.set_strict_insert(true);
    }
    Ok(store)
}

fn run(cli: Cli) -> Result<i32> {
    let mut store = open_store(&cli)?;
    match cli.command {
        Commands::Fields(cmd) => run_fields(&mut store, cmd),
        Commands::Items(cmd) => run_items(&mut store, cmd),
        Commands::Images(cmd) => run_images(&mut store, cmd),
        Commands::Db(DbCommand::Status { json }) => {
            let report = store.health();
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report_table(&report);
            }
            Ok(match report.status {
                HealthStatus::Ok => 0,
                HealthStatus::Error => 1,
            })
        }
        Commands::Login(LoginCommand::Status) => {
            println!("{}", serde_json::to_string_pretty(&store.login_status()?)?);
            Ok(0)
        }
        Commands::Login(LoginCommand::Set {
            username,
            password,
            required,
        }) => {
            store.set_credentials(&username, &password, required)?;
            Ok(0)
        }
        Commands::Export => {
            println!("{}", store.snapshot_json()?);
            Ok(0)
        }
        Commands::Reply { text } => {
            match store.resolve_reply(&text)? {
                AssistantAnswer::Text(text) => println!("{text}"),
                AssistantAnswer::Records(records) => print_records(&records)?,
            }
            Ok(0)
        }
    }
}

fn run_fields(store: &mut InventoryStore, cmd: FieldsCommand) -> Result<i32> {
    match cmd {
        FieldsCommand::List => {
            println!("{:<24} {:<10} {:<7} Required", "Field", "Input", "Type");
            for def in store.fields()? {
                println!(
                    "{:<24} {:<10} {:<7} {}",
                    def.name,
                    def.input_class.as_str(),
                    def.value_type.as_str(),
                    if def.required { "yes" } else { "no" }
                );
            }
        }
        FieldsCommand::Add {
            name,
            value_type,
            input,
            required,
        } => {
            let def = FieldDefinition::new(name, value_type.into())
                .input(input.into())
                .required(required);
            store.add_field(&def)?;
            println!("Added field {}", def.name);
        }
        FieldsCommand::Remove { name } => {
            store.remove_field(&name)?;
            println!("Removed field {name}");
        }
    }
    Ok(0)
}

fn run_items(store: &mut InventoryStore, cmd: ItemsCommand) -> Result<i32> {
    match cmd {
        ItemsCommand::Add { values, images } => {
            let blobs = images
                .iter()
                .map(|path| {
                    std::fs::read(path).with_context(|| format!("read image {}", path.display()))
                })
                .collect::<Result<Vec<_>>>()?;
            let added = store.add_item(&values.values(), &blobs)?;
            println!("Added item {}", added.id);
            if added.images_failed > 0 {
                eprintln!("Warning: {} image(s) could not be attached", added.images_failed);
                return Ok(2);
            }
        }
        ItemsCommand::Remove { id, amount } => {
            let remaining = store.remove_stock(&id, amount)?;
            println!("{id}: {remaining} remaining");
        }
        ItemsCommand::Update { id, values } => {
            let new_id = store.update_item(&id, &values.values())?;
            println!("Updated item {new_id}");
        }
        ItemsCommand::Get { ids } => print_records(&store.find_items(&ids)?)?,
        ItemsCommand::Search { query, fields } => {
            print_records(&store.search_items(&fields, &query)?)?
        }
        ItemsCommand::List => print_records(&store.snapshot()?)?,
    }
    Ok(0)
}

fn run_images(store: &mut InventoryStore, cmd: ImagesCommand) -> Result<i32> {
    match cmd {
        ImagesCommand::List { id, json } => {
            let blobs = store.images_for(&id)?;
            if json {
                let encoded: Vec<String> = blobs.iter().map(|b| BASE64.encode(b)).collect();
                println!("{}", serde_json::to_string_pretty(&encoded)?);
            } else {
                for (idx, blob) in blobs.iter().enumerate() {
                    println!("{idx}: {} bytes", blob.len());
                }
            }
        }
        ImagesCommand::Add { id, path } => {
            let blob =
                std::fs::read(&path).with_context(|| format!("read image {}", path.display()))?;
            let image_id = store.add_image(&id, &blob)?;
            println!("Added image {image_id} to {id}");
        }
        ImagesCommand::Remove { id, path } => {
            let blob =
                std::fs::read(&path).with_context(|| format!("read image {}", path.display()))?;
            if store.remove_image(&id, &blob)? {
                println!("Removed image from {id}");
            } else {
                println!("No matching image on {id}");
            }
        }
    }
    Ok(0)
}

fn print_records(records: &[Record]) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(records)?);
    Ok(())
}

fn status_label(status: &HealthStatus) -> &'static str {
    match status {
        HealthStatus::Ok => "ok",
        HealthStatus::Error => "error",
    }
}

fn print_report_table(report: &HealthReport) {
    println!("Database health report");
    println!("Status       : {}", status_label(&report.status));
    println!("Schema hash  : {}", report.schema_hash);
    println!("App version  : {}", report.app_version);
    println!("Generated at : {}", report.generated_at);

    println!("\nChecks:");
    println!(
        "{:<20} {:<7} {:>13}  Details",
        "Check", "Passed", "Duration (ms)"
    );
    for check in &report.checks {
        let passed = if check.passed { "yes" } else { "no" };
        let details = check
            .details
            .as_deref()
            .map(|value| value.replace('\n', " "))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<7} {:>13}  {}",
            check.name, passed, check.duration_ms, details
        );
    }

    if report.offenders.is_empty() {
        println!("\nOffenders: none");
    } else {
        println!("\nOffenders:");
        println!("{:<20} {:>10}  Message", "Table", "RowID");
        for offender in &report.offenders {
            println!(
                "{:<20} {:>10}  {}",
                offender.table,
                offender.rowid,
                offender.message.replace('\n', " ")
            );
        }
    }
}
