//! MontShop CLI - command-line access to the MontShop backend.
//!
//! Logs in, keeps the session token, and issues authenticated requests with
//! the same client the point-of-sale uses. Also exposes the scale barcode
//! decoder for checking labels printed by store scales.

use std::io;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use montshop_core::api::{ApiRequest, Method};
use montshop_core::barcode::{decode_scale_barcode, ScaleKind};
use montshop_core::device::ClientContext;
use montshop_core::{ApiClient, ApiError, Config};

#[derive(Parser)]
#[command(name = "montshop", version, about = "MontShop point-of-sale API client")]
struct Cli {
    /// Backend base URL (overrides config)
    #[arg(long, env = "MONTSHOP_API_URL", global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and store the access token
    Login {
        /// Login name (defaults to the last one used)
        #[arg(long)]
        user: Option<String>,
    },
    /// Forget the stored access token
    Logout,
    /// Show session and client context
    Status,
    /// Send an authenticated request and print the JSON response
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,
        /// Path relative to the API base URL, e.g. /products
        path: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
    },
    /// Decode an EAN-13 label printed by a scale
    DecodeBarcode {
        digits: String,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing();

    let mut config = Config::load()?;
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }

    match cli.command {
        Command::Login { user } => login(&mut config, user).await,
        Command::Logout => {
            ApiClient::from_config(&config)?.logout();
            eprintln!("Logged out");
            Ok(())
        }
        Command::Status => status(&config).await,
        Command::Request { method, path, body } => request(&config, &method, &path, body).await,
        Command::DecodeBarcode { digits } => decode_barcode(&digits),
    }
}

async fn login(config: &mut Config, user: Option<String>) -> Result<()> {
    let login = match user.or_else(|| config.last_login.clone()) {
        Some(login) => login,
        None => {
            eprint!("Login: ");
            let mut line = String::new();
            io::stdin().read_line(&mut line)?;
            line.trim().to_string()
        }
    };
    let password = rpassword::prompt_password("Password: ")?;

    let client = ApiClient::from_config(config)?;
    let auth = client.login(&login, &password).await.map_err(|e| {
        if matches!(e.downcast_ref::<ApiError>(), Some(ApiError::Unauthorized)) {
            anyhow::anyhow!("Invalid login or password")
        } else {
            e
        }
    })?;

    config.last_login = Some(login);
    config.save().context("Failed to save config")?;
    info!(api = %config.api_base_url, "Session stored");
    eprintln!("Logged in as {}", auth.user_display());
    Ok(())
}

async fn status(config: &Config) -> Result<()> {
    let client = ApiClient::from_config(config)?;
    let device_id = config.device_id_resolver().resolve().await;
    let context = ClientContext::capture(device_id);

    println!("API:        {}", client.base_url());
    println!("Storage:    {:?}", config.token_storage);
    println!(
        "Session:    {}",
        if client.is_authenticated() { "logged in" } else { "logged out" }
    );
    println!("Last login: {}", config.last_login.as_deref().unwrap_or("-"));
    println!("Device id:  {}", context.device_id.as_deref().unwrap_or("-"));
    println!("Timezone:   {}", context.timezone.as_deref().unwrap_or("-"));
    println!(
        "UTC offset: {}",
        context
            .utc_offset_minutes
            .map(|m| format!("{} min", m))
            .unwrap_or_else(|| "-".to_string())
    );
    println!("Locale:     {}", context.locale.as_deref().unwrap_or("-"));
    Ok(())
}

async fn request(config: &Config, method: &str, path: &str, body: Option<String>) -> Result<()> {
    let method = method
        .to_ascii_uppercase()
        .parse::<Method>()
        .with_context(|| format!("Invalid HTTP method: {}", method))?;

    let mut request = ApiRequest::new(method, path);
    if let Some(body) = body {
        let body: serde_json::Value =
            serde_json::from_str(&body).context("Request body is not valid JSON")?;
        request = request.json(&body)?;
    }

    let client = ApiClient::from_config(config)?;
    let response: serde_json::Value = match client.send_json(request).await {
        Ok(response) => response,
        Err(e) => {
            if e.downcast_ref::<ApiError>().is_some_and(ApiError::is_session_lost) {
                eprintln!("Session expired - run `montshop login` again");
            }
            return Err(e);
        }
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn decode_barcode(digits: &str) -> Result<()> {
    let label = decode_scale_barcode(digits)?;
    println!("Item code: {}", label.item_code);
    match label.kind {
        ScaleKind::Weight => println!("Weight:    {:.3} kg", label.value),
        ScaleKind::Price => println!("Price:     {:.2}", label.value),
    }
    Ok(())
}
