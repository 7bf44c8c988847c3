use clap::{Parser, Subcommand, ValueEnum};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "shield-cli")]
#[command(about = "Management CLI for the request-shield admin API", long_about = None)]
struct Cli {
    #[arg(short, long, env = "SHIELD_ADMIN_URL", default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "SHIELD_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Class {
    Whitelist,
    Blacklist,
    Monitor,
}

impl Class {
    fn as_str(self) -> &'static str {
        match self {
            Class::Whitelist => "whitelist",
            Class::Blacklist => "blacklist",
            Class::Monitor => "monitor",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Gateway status and table sizes
    Status,
    /// List reputation records
    ListIps,
    /// Whitelist, blacklist or monitor an IP
    Classify {
        ip: String,
        #[arg(value_enum)]
        classification: Class,
        #[arg(short, long)]
        reason: Option<String>,
        /// Expire the record after this many seconds
        #[arg(short, long)]
        ttl_secs: Option<u64>,
    },
    /// Delete an IP's reputation record
    Remove { ip: String },
    /// Clear an identifier from every rate limiter and the DDoS guard
    Reset { identifier: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let base = cli.url.trim_end_matches('/');
    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::ListIps => client.get(format!("{}/admin/ips", base)),
        Commands::Classify {
            ip,
            classification,
            reason,
            ttl_secs,
        } => client.post(format!("{}/admin/ips", base)).json(&json!({
            "ip": ip,
            "classification": classification.as_str(),
            "reason": reason,
            "ttl_secs": ttl_secs,
        })),
        Commands::Remove { ip } => client.delete(format!("{}/admin/ips/{}", base, ip)),
        Commands::Reset { identifier } => {
            client.post(format!("{}/admin/reset/{}", base, identifier))
        }
    };

    let res = request.headers(headers).send().await?;
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
