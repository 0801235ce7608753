use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the gateway registry", long_about = None)]
struct Cli {
    /// Admin API base URL.
    #[arg(short, long, default_value = "http://127.0.0.1:8081")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered servers
    List,
    /// Register or replace a server
    Register {
        /// Unique server name
        name: String,
        /// Base URL, e.g. http://127.0.0.1:4200
        base_url: String,
        /// Path prefixes routed to the server
        #[arg(required = true)]
        prefixes: Vec<String>,
    },
    /// Deregister a server
    Deregister {
        name: String,
    },
    /// Show health, breaker and cache status
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::List => client.get(format!("{base}/registry")).send().await?,
        Commands::Register {
            name,
            base_url,
            prefixes,
        } => {
            client
                .post(format!("{base}/registry"))
                .json(&json!({ "name": name, "base_url": base_url, "prefixes": prefixes }))
                .send()
                .await?
        }
        Commands::Deregister { name } => {
            client
                .delete(format!("{base}/registry/{name}"))
                .send()
                .await?
        }
        Commands::Status => client.get(format!("{base}/admin/status")).send().await?,
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

    let text = res.text().await?;
    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
