//! hypermap CLI entrypoint
//! Loads a manifest and inspects, routes or describes the API it declares.

// Internal imports (std, crate)
use std::path::PathBuf;
use std::sync::Arc;

// External imports (alphabetized)
use anyhow::Context;
use clap::Parser;
use hypermap_core::{
    ApiModel, Bindings, Config, Identity, Manifest, RequestHandler, RequestInfo, ResponseInfo,
    ServiceContainer, Verb,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hypermap")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path or URL to the API manifest (YAML or JSON)
    ///
    /// Example: --manifest api.yaml
    /// Example: --manifest https://example.com/api.json
    #[arg(long, global = true)]
    manifest: Option<String>,

    /// Configuration file (YAML or TOML); defaults to the user config file when present
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Print the hypermedia description as JSON
    Describe,
    /// List every operation with its verb, URL template and matcher
    Routes,
    /// Dispatch one request against the manifest and print the response
    Route {
        /// Request verb
        #[arg(value_enum, ignore_case = true)]
        method: Verb,
        /// Relative request URL, e.g. /api/person/7?expand=true
        url: String,
        /// Request body
        #[arg(long)]
        body: Option<String>,
        /// Content type of the body
        #[arg(long, default_value = "application/json")]
        content_type: String,
        /// Accept header
        #[arg(long)]
        accept: Option<String>,
        /// Name of the calling identity; anonymous unless a name or role is given
        #[arg(long)]
        user: Option<String>,
        /// Role claims of the calling identity
        #[arg(long = "role")]
        roles: Vec<String>,
    },
    /// Compose the manifest strictly and report what it declares
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref()).await?;
    let location = cli
        .manifest
        .as_deref()
        .context("--manifest is required")?;
    let manifest = Manifest::from_file_or_url(location)
        .await
        .with_context(|| format!("Failed to load manifest from {location}"))?;

    match &cli.command {
        Commands::Check => {
            let model = compose(&manifest, &config, false)?;
            let operations = model.operations().count();
            println!(
                "ok: {} classes, {} controllers, {} operations",
                model.catalog().classes().count(),
                model.controllers().len(),
                operations
            );
        }
        Commands::Routes => {
            let model = compose(&manifest, &config, true)?;
            for (_, operation) in model.operations() {
                println!(
                    "{:<7} {:<40} {:<48} {}",
                    operation.verb(),
                    operation.url_template().unwrap_or(operation.url()),
                    operation.matcher().as_str(),
                    operation.id()
                );
            }
        }
        Commands::Describe => {
            let handler = handler(&manifest, &config)?;
            let description = handler.describe().context("Failed to describe the API")?;
            println!("{}", serde_json::to_string_pretty(description.as_ref())?);
        }
        Commands::Route {
            method,
            url,
            body,
            content_type,
            accept,
            user,
            roles,
        } => {
            let handler = handler(&manifest, &config)?;
            let mut request = RequestInfo::new(*method, url)
                .with_context(|| format!("Invalid request URL '{url}'"))?;
            if let Some(body) = body {
                request = request
                    .with_header("Content-Type", content_type.as_str())
                    .with_body(body.as_bytes());
            }
            if let Some(accept) = accept {
                request = request.with_header("Accept", accept.as_str());
            }
            if user.is_some() || !roles.is_empty() {
                let name = user.as_deref().unwrap_or("hypermap");
                let identity = roles
                    .iter()
                    .fold(Identity::named(name), |identity, role| identity.with_role(role.as_str()));
                request = request.with_identity(identity);
            }

            let response = handler.handle(&request);
            print_response(&response);
            if !response.is_success() {
                anyhow::bail!("{method} {url} answered {}", response.status);
            }
        }
    }
    Ok(())
}

/// Explicit path, then the user config file, then defaults
async fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let path = match path {
        Some(path) => path.clone(),
        None => match Config::default_path().filter(|p| p.exists()) {
            Some(path) => path,
            None => return Ok(Config::default()),
        },
    };
    debug!("loading configuration from {}", path.display());
    Config::from_file(&path)
        .await
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

fn compose(manifest: &Manifest, config: &Config, lenient: bool) -> anyhow::Result<ApiModel> {
    let mut manifest = manifest.clone();
    manifest.case_sensitive_paths |= config.case_sensitive_paths;
    let bindings = Bindings::new();
    let model = if lenient {
        manifest.compose_lenient(&bindings)
    } else {
        manifest.compose(&bindings)
    };
    model.context("Failed to compose the manifest")
}

fn handler(manifest: &Manifest, config: &Config) -> anyhow::Result<RequestHandler> {
    let model = compose(manifest, config, true)?;
    info!(
        "serving {} controllers, description at {}",
        model.controllers().len(),
        config.documentation_route()
    );
    let mut config = config.clone();
    config.case_sensitive_paths = model.case_sensitive();
    RequestHandler::new(Arc::new(model), &ServiceContainer::default(), config)
        .context("Failed to compose the request pipeline")
}

fn print_response(response: &ResponseInfo) {
    println!("{}", response.status);
    for (name, value) in response.headers.iter() {
        println!("{name}: {value}");
    }
    if !response.body.is_empty() {
        println!();
        println!("{}", response.body_text());
    }
}
