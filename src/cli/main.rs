use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "crash-search-cli")]
#[command(about = "Crash Search CLI", long_about = None)]
struct Cli {
    #[arg(short, long, env = "CRASH_SEARCH_ENDPOINT", default_value = "http://localhost:8080")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search crash reports
    Search {
        /// Search parameter, repeatable: -p product=Firefox -p signature=~OOM
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Print the compiled backend query instead of running it
        #[arg(short = 'q', long)]
        return_query: bool,
    },

    /// List backend fields unknown to the field catalog
    MissingFields {
        /// Comma-separated indices to inspect; recent ones when omitted
        #[arg(short, long)]
        indices: Option<String>,
    },

    /// Render the index mapping implied by the field catalog
    Mapping {
        /// Field definition (JSON) to add or replace before rendering
        #[arg(short, long)]
        field_json: Option<String>,
    },

    /// List searchable fields
    Fields,

    /// Re-read the server's field definition set
    ReloadFields,

    /// Check server health
    Health,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got {:?}", raw)),
    }
}

async fn print_response(response: reqwest::Response) -> anyhow::Result<()> {
    let status = response.status();
    let body: Value = response.json().await.context("server returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&body)?);

    if !status.is_success() {
        bail!("request failed with HTTP {}", status);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::new();

    match cli.command {
        Commands::Search {
            mut params,
            return_query,
        } => {
            if return_query {
                params.push(("_return_query".to_string(), "true".to_string()));
            }

            let response = client
                .get(format!("{}/api/search", cli.endpoint))
                .query(&params)
                .send()
                .await?;
            print_response(response).await?;
        }

        Commands::MissingFields { indices } => {
            let mut request = client.get(format!("{}/api/search/missing_fields", cli.endpoint));
            if let Some(indices) = indices {
                request = request.query(&[("indices", indices)]);
            }
            print_response(request.send().await?).await?;
        }

        Commands::Mapping { field_json } => {
            let overwrite: Option<Value> = field_json
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .context("--field-json is not valid JSON")?;

            let response = client
                .post(format!("{}/api/search/mapping", cli.endpoint))
                .json(&json!({ "overwrite": overwrite }))
                .send()
                .await?;
            print_response(response).await?;
        }

        Commands::Fields => {
            let response = client
                .get(format!("{}/api/search/fields", cli.endpoint))
                .send()
                .await?;
            print_response(response).await?;
        }

        Commands::ReloadFields => {
            let response = client
                .post(format!("{}/api/search/fields/reload", cli.endpoint))
                .send()
                .await?;
            print_response(response).await?;
        }

        Commands::Health => {
            let response = client
                .get(format!("{}/health", cli.endpoint))
                .send()
                .await?;
            print_response(response).await?;
        }
    }

    Ok(())
}
