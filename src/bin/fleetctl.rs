use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "fleetctl")]
#[command(about = "Management CLI for the fleet balancer control plane", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Connection {
    Open,
    Close,
}

#[derive(Subcommand)]
enum Commands {
    /// Control plane status
    Status,
    /// List servers with health and load
    Servers,
    /// Register a server
    Add {
        id: String,
        host: String,
        port: u16,
        #[arg(short, long, default_value_t = 1)]
        weight: u32,
    },
    /// Drain and remove a server
    Remove { id: String },
    /// Change a server's weight
    Weight { id: String, weight: u32 },
    /// Record a connection opening or closing on a server
    Track {
        id: String,
        #[arg(value_enum)]
        event: Connection,
    },
    /// Fleet health report
    Health {
        /// Print raw JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Auto-scaler report
    Scaling {
        #[arg(long)]
        json: bool,
    },
    /// Ask the balancer which server it would pick
    Select {
        #[arg(long)]
        client_ip: Option<String>,
        #[arg(long)]
        session_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")).send().await?,
        Commands::Servers => client.get(format!("{base}/admin/servers")).send().await?,
        Commands::Add { id, host, port, weight } => {
            client
                .post(format!("{base}/admin/servers"))
                .json(&json!({ "id": id, "host": host, "port": port, "weight": weight }))
                .send()
                .await?
        }
        Commands::Remove { id } => client.delete(format!("{base}/admin/servers/{id}")).send().await?,
        Commands::Weight { id, weight } => {
            client
                .put(format!("{base}/admin/servers/{id}/weight"))
                .json(&json!({ "weight": weight }))
                .send()
                .await?
        }
        Commands::Track { id, event } => {
            let event = match event {
                Connection::Open => "open",
                Connection::Close => "close",
            };
            client
                .post(format!("{base}/admin/servers/{id}/connections"))
                .json(&json!({ "event": event }))
                .send()
                .await?
        }
        Commands::Health { json } => report(&client, &format!("{base}/admin/health"), json).await?,
        Commands::Scaling { json } => report(&client, &format!("{base}/admin/scaling"), json).await?,
        Commands::Select { client_ip, session_id } => {
            let mut query = Vec::new();
            if let Some(ip) = client_ip {
                query.push(("client_ip", ip));
            }
            if let Some(session) = session_id {
                query.push(("session_id", session));
            }
            client
                .get(format!("{base}/admin/select"))
                .query(&query)
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn report(
    client: &reqwest::Client,
    url: &str,
    json: bool,
) -> Result<reqwest::Response, reqwest::Error> {
    let mut request = client.get(url);
    if !json {
        request = request.query(&[("format", "text")]);
    }
    request.send().await
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

    let is_json = res
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    let body = res.text().await?;

    if is_json {
        let json: Value = serde_json::from_str(&body)?;
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else if !body.is_empty() {
        print!("{body}");
    } else {
        println!("{}", status);
    }
    Ok(())
}
