//! actionkit: inspect destination definitions, build payloads from sample
//! events and deliver them.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use actionkit_core::config::LoggingConfig;
use actionkit_core::{AppConfig, RawEvent, RuntimeContext};
use actionkit_destinations::{catalog, find};
use actionkit_dispatch::{
    AdapterConfig, Destination, DestinationDefinition, Dispatcher, DynamicFieldContext,
    ElementOutcome, OAuth2TokenRefresher, ReqwestTransport, Transport,
};
use actionkit_mapping::MappingOverride;
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "actionkit")]
#[command(about = "Map events onto destination actions and deliver them")]
#[command(version)]
struct Cli {
    /// Application config file (http, runtime, logging sections)
    #[arg(long, global = true, env = "ACTIONKIT_CONFIG")]
    app_config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a destination's settings, actions, fields and default mappings.
    /// Lists every destination when no slug is given.
    Describe {
        /// Destination slug
        destination: Option<String>,
    },

    /// Build and send an event (or a JSON array of events as one batch)
    Perform(PerformArgs),

    /// List choices for a dynamic field
    Choices(ChoicesArgs),
}

#[derive(Args, Debug)]
struct PerformArgs {
    #[arg(long)]
    destination: String,

    #[arg(long)]
    action: String,

    /// Event JSON file; an array performs a batch
    #[arg(long)]
    event: PathBuf,

    /// Mapping JSON file (defaults to the action's default mapping)
    #[arg(long)]
    mapping: Option<PathBuf>,

    /// Adapter config: `{ "settings": {...}, "auth": {...} }`
    #[arg(long)]
    config: PathBuf,

    /// Print the built payload instead of sending it
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct ChoicesArgs {
    #[arg(long)]
    destination: String,

    #[arg(long)]
    action: String,

    #[arg(long)]
    field: String,

    /// Adapter config: `{ "settings": {...}, "auth": {...} }`
    #[arg(long)]
    config: PathBuf,

    /// Values already chosen for other fields
    #[arg(long)]
    payload: Option<PathBuf>,

    /// Page token from a previous response
    #[arg(long)]
    page: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, load_error) = match AppConfig::load(cli.app_config.as_deref()) {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    init_tracing(&config.logging);
    if let Some(e) = load_error {
        warn!(error = %e, "Failed to load config, using defaults");
    }

    info!(
        environment = %config.runtime.environment,
        timeout_ms = config.http.timeout_ms,
        "actionkit starting"
    );

    match cli.command {
        Commands::Describe { destination } => describe(destination.as_deref()),
        Commands::Perform(args) => perform(&config, args).await,
        Commands::Choices(args) => choices(&config, args).await,
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.filter.as_str().into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

// ─── Commands ──────────────────────────────────────────────────────────────

fn describe(slug: Option<&str>) -> anyhow::Result<()> {
    let Some(slug) = slug else {
        let listing: Vec<Value> = catalog()?
            .iter()
            .map(|d| json!({ "slug": d.slug, "name": d.name, "description": d.description }))
            .collect();
        return print_json(&listing);
    };

    let definition = find(slug)?;
    let actions: Vec<Value> = definition
        .actions()
        .iter()
        .map(|action| {
            json!({
                "key": action.key,
                "title": action.title,
                "description": action.description,
                "defaultSubscription": action.default_subscription,
                "batch": action.supports_batch(),
                "fields": action.schema().fields(),
                "dynamicFields": action.dynamic_field_keys().collect::<Vec<_>>(),
                "defaultMapping": action.schema().default_mapping().to_json(),
            })
        })
        .collect();

    print_json(&json!({
        "name": definition.name,
        "slug": definition.slug,
        "description": definition.description,
        "authentication": definition.auth_scheme.display_name(),
        "baseUrl": definition.base_url,
        "settings": definition.settings_schema().map(|s| s.fields()),
        "actions": actions,
    }))
}

async fn perform(config: &AppConfig, args: PerformArgs) -> anyhow::Result<()> {
    let definition = find(&args.destination)?;
    let adapter: AdapterConfig = read_json(&args.config)?;
    let destination = Destination::new(definition.clone(), dispatcher(config, &definition)?)?;

    let mapping = match &args.mapping {
        Some(path) => MappingOverride::from_value(&read_json::<Value>(path)?)?,
        None => definition
            .find_action(&args.action)?
            .schema()
            .default_mapping(),
    };

    let (events, batched) = match read_json::<Value>(&args.event)? {
        Value::Array(items) => (
            items
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<Vec<RawEvent>, _>>()
                .context("event array contains an invalid event")?,
            true,
        ),
        single => (
            vec![serde_json::from_value::<RawEvent>(single).context("invalid event")?],
            false,
        ),
    };

    if args.dry_run {
        let previews: Vec<Value> = events
            .iter()
            .map(|event| {
                match destination.preview(&args.action, event, &mapping, &adapter) {
                    Ok(payload) => json!({ "payload": payload }),
                    Err(e) => json!({ "error": { "code": e.code(), "message": e.to_string() } }),
                }
            })
            .collect();
        return if batched {
            print_json(&previews)
        } else {
            print_json(&previews[0])
        };
    }

    if !batched {
        let result = destination
            .perform(&args.action, &events[0], &mapping, &adapter)
            .await?;
        return print_json(&result);
    }

    let response = destination
        .perform_batch(&args.action, &events, &mapping, &adapter)
        .await?;
    let outcomes: Vec<Value> = response
        .outcomes
        .iter()
        .enumerate()
        .map(|(index, outcome)| match outcome {
            ElementOutcome::Delivered { dispatch } => {
                json!({ "index": index, "status": "delivered", "dispatch": dispatch })
            }
            ElementOutcome::Failed(e) => json!({
                "index": index,
                "status": "failed",
                "code": e.code(),
                "message": e.to_string(),
            }),
        })
        .collect();
    info!(
        destination = %args.destination,
        action = %args.action,
        delivered = response.delivered_count(),
        failed = response.failed_count(),
        "batch performed"
    );
    print_json(&json!({ "dispatches": response.dispatches, "outcomes": outcomes }))
}

async fn choices(config: &AppConfig, args: ChoicesArgs) -> anyhow::Result<()> {
    let definition = find(&args.destination)?;
    let adapter: AdapterConfig = read_json(&args.config)?;
    let payload: Map<String, Value> = match &args.payload {
        Some(path) => read_json(path)?,
        None => Map::new(),
    };
    let destination = Destination::new(definition.clone(), dispatcher(config, &definition)?)?;

    let ctx = DynamicFieldContext {
        settings: adapter.settings,
        payload,
        auth: adapter.auth,
        page: args.page,
    };
    let response = destination.list_choices(&args.action, &args.field, &ctx).await;
    print_json(&response)
}

// ─── Helpers ───────────────────────────────────────────────────────────────

fn dispatcher(config: &AppConfig, definition: &DestinationDefinition) -> anyhow::Result<Dispatcher> {
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(&config.http)?);
    let mut dispatcher = Dispatcher::new(transport.clone())
        .with_runtime(RuntimeContext::from_config(&config.runtime));
    if let Some(token_url) = &definition.token_url {
        dispatcher = dispatcher.with_refresher(Arc::new(OAuth2TokenRefresher::new(
            transport,
            token_url.clone(),
        )));
    }
    Ok(dispatcher)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
