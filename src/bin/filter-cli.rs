use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "filter-cli")]
#[command(about = "Manage filter revisions on a running edge gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "GATEWAY_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// List filter ids, optionally of one type
    List {
        #[arg(short = 't', long = "type")]
        filter_type: Option<String>,
    },
    /// List every revision of a filter
    Revisions { id: String },
    /// Show one revision, or the latest when none is given
    Show { id: String, revision: Option<u64> },
    /// Show the active revision of a filter
    Active { id: String },
    /// List every active revision
    ActiveAll,
    /// List canary revisions
    Canaries,
    /// Upload a new revision from a source file
    Add {
        /// pre, route, post, custom or error
        #[arg(short = 't', long = "type")]
        filter_type: String,
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value_t = 0)]
        order: i32,
        #[arg(short, long)]
        disable_property: Option<String>,
        #[arg(short, long)]
        author: Option<String>,
        file: PathBuf,
    },
    /// Make a revision the active one
    Activate { id: String, revision: u64 },
    Deactivate { id: String, revision: u64 },
    /// Mark a revision for shadow execution
    Canary { id: String, revision: u64 },
    /// Show the registry snapshot the gateway is serving
    Registry,
    /// Show disabled toggle properties
    Toggles,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let client = reqwest::Client::builder().default_headers(headers).build()?;
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")).send().await?,
        Commands::List { filter_type } => {
            let mut req = client.get(format!("{base}/admin/filters"));
            if let Some(t) = filter_type {
                req = req.query(&[("type", t)]);
            }
            req.send().await?
        }
        Commands::Revisions { id } => client.get(format!("{base}/admin/filters/{id}/revisions")).send().await?,
        Commands::Show { id, revision: Some(rev) } => {
            client.get(format!("{base}/admin/filters/{id}/revisions/{rev}")).send().await?
        }
        Commands::Show { id, revision: None } => client.get(format!("{base}/admin/filters/{id}/latest")).send().await?,
        Commands::Active { id } => client.get(format!("{base}/admin/filters/{id}/active")).send().await?,
        Commands::ActiveAll => client.get(format!("{base}/admin/active")).send().await?,
        Commands::Canaries => client.get(format!("{base}/admin/canaries")).send().await?,
        Commands::Add {
            filter_type,
            name,
            order,
            disable_property,
            author,
            file,
        } => {
            let source = tokio::fs::read_to_string(&file).await?;
            let body = json!({
                "source_code": source,
                "filter_type": filter_type.to_ascii_lowercase(),
                "filter_name": name,
                "order": order,
                "disable_property": disable_property,
                "author": author,
            });
            client.post(format!("{base}/admin/filters")).json(&body).send().await?
        }
        Commands::Activate { id, revision } => {
            client.post(format!("{base}/admin/filters/{id}/revisions/{revision}/activate")).send().await?
        }
        Commands::Deactivate { id, revision } => {
            client.post(format!("{base}/admin/filters/{id}/revisions/{revision}/deactivate")).send().await?
        }
        Commands::Canary { id, revision } => {
            client.post(format!("{base}/admin/filters/{id}/revisions/{revision}/canary")).send().await?
        }
        Commands::Registry => client.get(format!("{base}/admin/registry")).send().await?,
        Commands::Toggles => client.get(format!("{base}/admin/toggles")).send().await?,
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
