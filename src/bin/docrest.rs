use bson::Bson;
use clap::{Parser, Subcommand};
use docrest::access::{Access, AccessContext, ExcludedMap};
use docrest::config::AppConfig;
use docrest::envelope::Envelope;
use docrest::model::{IdKind, ResourceModel};
use docrest::operations::{Operations, Request};
use docrest::query::parse_query_options_json;
use docrest::scope::FieldScope;
use docrest::store::MemoryStore;
use docrest::types::Document;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "docrest", version, about = "Run REST resource operations against a JSON fixture", long_about=None)]
struct Cli {
    #[arg(long, help = "Path to a config file (TOML). Falls back to DOCREST_CONFIG, then defaults.")]
    config: Option<PathBuf>,
    #[arg(long, help = "JSON fixture: an object mapping collection names to arrays of documents")]
    fixture: Option<PathBuf>,
    #[arg(long, help = "Resource model name; defaults to the first model in the config")]
    model: Option<String>,
    #[arg(long, default_value = "public", help = "Access level: public|protected|private")]
    access: Access,
    #[arg(long, help = "Caller identity used by --scope-field")]
    caller: Option<String>,
    #[arg(long, help = "Restrict documents to those whose field equals the caller")]
    scope_field: Option<String>,
    #[arg(long, help = "Query options as JSON, e.g. '{\"query\":{\"age\":{\"$gt\":3}},\"sort\":\"-age\"}'")]
    query: Option<String>,
    #[arg(long, help = "Report the total count alongside list results")]
    total_count: bool,
    #[arg(long, help = "Log configuration file (log4rs YAML); otherwise DOCREST_LOG_* env vars are used")]
    log_config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "List matching documents")]
    List,
    #[command(about = "Count matching documents")]
    Count,
    #[command(about = "Read one document by identity")]
    Get { id: String },
    #[command(about = "Read one document with nested values replaced by true")]
    Shallow { id: String },
    #[command(about = "Create a document from a JSON body")]
    Create {
        #[arg(long)]
        body: String,
    },
    #[command(about = "Update a document with a JSON body")]
    Update {
        id: String,
        #[arg(long)]
        body: String,
    },
    #[command(about = "Delete one document, or every matching document when no identity is given")]
    Delete { id: Option<String> },
}

fn parse_body(json: &str) -> Result<Document, Box<dyn std::error::Error>> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    match Bson::try_from(value)? {
        Bson::Document(d) => Ok(d),
        other => Err(format!("body must be a JSON object, got {other}").into()),
    }
}

fn load_fixture(store: &MemoryStore, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    let fixture: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&raw)?;
    for (collection, docs) in fixture {
        let serde_json::Value::Array(docs) = docs else {
            return Err(format!("fixture collection {collection} must be an array").into());
        };
        let mut parsed = Vec::with_capacity(docs.len());
        for d in docs {
            match Bson::try_from(d)? {
                Bson::Document(d) => parsed.push(d),
                other => return Err(format!("fixture {collection}: not a document: {other}").into()),
            }
        }
        log::debug!("fixture: {} documents into {collection}", parsed.len());
        store.seed(&collection, parsed);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<Envelope, Box<dyn std::error::Error>> {
    let mut cfg = AppConfig::load(cli.config.as_deref())?;
    if cli.total_count {
        cfg.options.total_count_header = true;
    }
    let mut registry = cfg.registry();
    let name = cli.model.clone().or_else(|| cfg.models.first().map(|m| m.name.clone())).ok_or("no --model given and no models configured")?;
    let model = match registry.get(&name) {
        Some(m) => m,
        None => registry.register(ResourceModel::new(&name).id_kind(IdKind::String)),
    };

    let store = Arc::new(MemoryStore::new(registry));
    if let Some(path) = &cli.fixture {
        load_fixture(&store, path)?;
    }

    let mut ops = Operations::new(model.clone(), store, cfg.options.clone());
    if let Some(field) = &cli.scope_field {
        ops = ops.with_context_filter(Arc::new(FieldScope::new(field)));
    }

    let mut access = AccessContext::new(cli.access, Arc::new(ExcludedMap::from_model(&model)));
    if let Some(caller) = &cli.caller {
        access = access.caller(caller);
    }
    let mut req = Request::new(access);
    if let Some(q) = &cli.query {
        req = req.query(parse_query_options_json(q)?);
    }

    let mut env = Envelope::new();
    let res = match cli.command {
        Commands::List => ops.get_items(&req, &mut env).await,
        Commands::Count => ops.get_count(&req, &mut env).await,
        Commands::Get { id } => ops.get_item(&req.id(model.parse_id(&id)), &mut env).await,
        Commands::Shallow { id } => ops.get_shallow(&req.id(model.parse_id(&id)), &mut env).await,
        Commands::Create { body } => ops.create_object(&req.body(parse_body(&body)?), &mut env).await,
        Commands::Update { id, body } => {
            let req = req.id(model.parse_id(&id)).body(parse_body(&body)?);
            if ops.options.find_one_and_update {
                ops.modify_object(&req, &mut env).await
            } else {
                match ops.load_document(&req, &mut env).await {
                    Ok(()) => ops.modify_object(&req, &mut env).await,
                    Err(e) => Err(e),
                }
            }
        }
        Commands::Delete { id: None } => ops.delete_items(&req, &mut env).await,
        Commands::Delete { id: Some(id) } => {
            let req = req.id(model.parse_id(&id));
            if ops.options.find_one_and_remove {
                ops.delete_item(&req, &mut env).await
            } else {
                match ops.load_document(&req, &mut env).await {
                    Ok(()) => ops.delete_item(&req, &mut env).await,
                    Err(e) => Err(e),
                }
            }
        }
    };
    if let Err(e) = res {
        log::debug!("operation failed: {e}");
    }
    Ok(env)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let logging = match &cli.log_config {
        Some(path) => docrest::logger::init_path(path),
        None => docrest::logger::configure_from_env(),
    };
    if let Err(e) = logging {
        eprintln!("warning: logging disabled: {e}");
    }

    match run(cli).await {
        Ok(env) => {
            match serde_json::to_string_pretty(&env) {
                Ok(s) => println!("{s}"),
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
            if env.status_code.is_some_and(|c| c >= 400) {
                std::process::exit(2);
            }
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}
