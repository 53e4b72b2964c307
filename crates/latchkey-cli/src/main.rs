//! Latchkey CLI - Command-line client
//!
//! Usage:
//!   latchkey register <username> <email> --password <pw>
//!   latchkey login <username> --password <pw> [--remember]
//!   latchkey whoami
//!   latchkey users
//!   latchkey forgot-password <email>
//!
//! With `--remember`, the access token is kept in `--token-file` and the
//! refresh cookie in `--cookie-file` (default: the token file with a
//! `.cookies` extension), so later invocations can refresh silently.

use anyhow::Context;
use clap::{Parser, Subcommand};
use latchkey_client::{ClientConfig, ProfileUpdate, SessionClient};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "latchkey")]
#[command(about = "Latchkey session API client")]
#[command(version)]
struct Cli {
    /// API root
    #[arg(long, env = "LATCHKEY_API_URL", default_value = "http://localhost:5000/api")]
    api_url: String,

    /// File holding a remembered access token
    #[arg(long, env = "LATCHKEY_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    /// File holding the refresh cookie of a remembered session
    #[arg(long, env = "LATCHKEY_COOKIE_FILE")]
    cookie_file: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account and open a session
    Register {
        username: String,
        email: String,
        #[arg(long, env = "LATCHKEY_PASSWORD")]
        password: String,
        /// Keep the access token across invocations
        #[arg(long)]
        remember: bool,
    },
    /// Log in with username and password
    Login {
        username: String,
        #[arg(long, env = "LATCHKEY_PASSWORD")]
        password: String,
        #[arg(long)]
        remember: bool,
    },
    /// Complete a Yandex ID login with an authorization code
    Yandex {
        code: String,
        #[arg(long)]
        redirect_uri: Option<String>,
        #[arg(long)]
        remember: bool,
    },
    /// End the session and forget the stored token
    Logout,
    /// Show the current user's profile
    Whoami,
    /// Change username, email, or password
    UpdateMe {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// Show public fields of a user
    User { username: String },
    /// List every user (admin only)
    Users,
    /// Request a password reset token
    ForgotPassword { email: String },
    /// Set a new password with a reset token
    ResetPassword {
        token: String,
        #[arg(long, env = "LATCHKEY_PASSWORD")]
        password: String,
    },
}

/// Explicit `--cookie-file`, else a sibling of the token file
fn cookie_file(cli: &Cli) -> Option<PathBuf> {
    cli.cookie_file
        .clone()
        .or_else(|| cli.token_file.as_ref().map(|p| p.with_extension("cookies")))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "latchkey_client=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cookie_file = cookie_file(&cli);

    let client = SessionClient::new(ClientConfig {
        base_url: cli.api_url,
        token_file: cli.token_file,
        cookie_file,
        timeout_secs: cli.timeout,
    })
    .context("creating session client")?;

    match cli.command {
        Commands::Register {
            username,
            email,
            password,
            remember,
        } => {
            let user = client
                .register(&username, &email, &password, remember)
                .await?;
            print_json(&user)?;
        }
        Commands::Login {
            username,
            password,
            remember,
        } => {
            let user = client.login(&username, &password, remember).await?;
            print_json(&user)?;
        }
        Commands::Yandex {
            code,
            redirect_uri,
            remember,
        } => {
            let user = client
                .login_with_yandex(&code, redirect_uri.as_deref(), remember)
                .await?;
            print_json(&user)?;
        }
        Commands::Logout => {
            client.logout().await?;
            println!("Logged out");
        }
        Commands::Whoami => {
            let profile = client.me().await?;
            print_json(&profile)?;
        }
        Commands::UpdateMe {
            username,
            email,
            password,
        } => {
            let update = ProfileUpdate {
                username,
                email,
                password,
            };
            let response = client.update_me(&update).await?;
            println!("{}", response.message);
            print_json(&response.user)?;
        }
        Commands::User { username } => {
            let user = client.user(&username).await?;
            print_json(&user)?;
        }
        Commands::Users => {
            let users = client.users().await?;
            print_json(&users)?;
        }
        Commands::ForgotPassword { email } => {
            let response = client.forgot_password(&email).await?;
            println!("{}", response.message);
            if let Some(token) = response.reset_token {
                println!("Reset token: {token}");
            }
        }
        Commands::ResetPassword { token, password } => {
            let response = client.reset_password(&token, &password).await?;
            println!("{}", response.message);
        }
    }

    Ok(())
}
