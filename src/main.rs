use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tokenstore::crypto::{self, PlainSecret};
use tokenstore::jobs;
use tokenstore::models::token::parse_permissions;
use tokenstore::models::{NewToken, Token, TokenStatus, TokenUpdate};
use tokenstore::{config, TokenService};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = cli::Cli::parse();
    let cfg = config::load().context("invalid configuration")?;
    let service = Arc::new(TokenService::from_config(&cfg).await);

    run(args.command, service).await
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tokenstore=info"));

    let json = std::env::var("TOKENSTORE_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // Logs go to stderr so command output on stdout stays scriptable.
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cmd: cli::Commands, service: Arc<TokenService>) -> anyhow::Result<()> {
    match cmd {
        cli::Commands::Create {
            id,
            name,
            secret,
            permissions,
            expires_in_days,
            aux,
        } => {
            let (secret, generated) = match secret {
                Some(s) => (PlainSecret::new(s), false),
                None => (crypto::generate_secret(), true),
            };
            let shown = generated.then(|| secret.clone());

            let new = NewToken {
                id,
                name,
                permissions: permissions
                    .into_iter()
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect(),
                expires_at: expires_in_days
                    .map(|d| cli::expiry_after_days(Utc::now(), d))
                    .transpose()?,
                auxiliary_data: aux,
            };

            let token = service
                .create_token(secret, new)
                .await
                .context("failed to create token")?;

            println!("Token created:");
            print_token(&token);
            if let Some(secret) = shown {
                println!("  Secret:  {}", secret.expose());
                println!("  (store it now; it cannot be shown again)");
            }
        }
        cli::Commands::Validate {
            secret,
            require,
            fresh,
        } => {
            let found = if fresh {
                service.validate_token_fresh(&secret).await?
            } else {
                service.validate_token(&secret).await?
            };
            let token = found.ok_or_else(|| anyhow::anyhow!("invalid token"))?;
            if let Some(permission) = require {
                if !service.has_permission(&token, &permission) {
                    anyhow::bail!("token {} lacks permission '{}'", token.id, permission);
                }
            }
            println!("Valid token:");
            print_token(&token);
        }
        cli::Commands::Revoke { id } => {
            let token = service.revoke(&id).await?;
            println!("Token {} revoked.", token.id);
        }
        cli::Commands::Update {
            id,
            name,
            permissions,
            status,
            aux,
            clear_aux,
        } => {
            let status = status
                .map(|s| s.parse::<TokenStatus>())
                .transpose()
                .map_err(|e| anyhow::anyhow!(e))?;
            let update = TokenUpdate {
                name,
                permissions: permissions.map(|p| parse_permissions(&p.join(","))),
                status,
                auxiliary_data: if clear_aux { Some(None) } else { aux.map(Some) },
            };
            let token = service.update(&id, update).await?;
            println!("Token updated:");
            print_token(&token);
        }
        cli::Commands::Delete { id } => {
            service.delete(&id).await?;
            println!("Token {} deleted.", id);
        }
        cli::Commands::List { all } => {
            let tokens = if all {
                service.list_all().await?
            } else {
                service.list_active().await?
            };
            if tokens.is_empty() {
                println!("No tokens found.");
            } else {
                println!(
                    "{:<38} {:<20} {:<10} {:<26} {}",
                    "ID", "NAME", "STATUS", "EXPIRES", "PERMISSIONS"
                );
                for t in tokens {
                    println!(
                        "{:<38} {:<20} {:<10} {:<26} {}",
                        t.id,
                        t.name,
                        t.status.to_string(),
                        t.expires_at
                            .map(|e| e.to_rfc3339())
                            .unwrap_or_else(|| "never".into()),
                        format_permissions(&t),
                    );
                }
            }
        }
        cli::Commands::Cleanup { every } => match every {
            Some(secs) => {
                let handle = jobs::cleanup::spawn(service.clone(), Duration::from_secs(secs.max(1)));
                tracing::info!(every_secs = secs, "cleanup job running; Ctrl-C to stop");
                tokio::signal::ctrl_c().await?;
                handle.abort();
            }
            None => {
                let removed = service.cleanup_expired().await?;
                println!("Removed {} expired token(s).", removed);
            }
        },
        cli::Commands::Info => {
            let info = service.storage_info().await;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
    }
    Ok(())
}

fn print_token(t: &Token) {
    println!("  ID:          {}", t.id);
    println!("  Name:        {}", t.name);
    println!("  Status:      {}", t.status);
    println!("  Permissions: {}", format_permissions(t));
    println!("  Created:     {}", t.created_at.to_rfc3339());
    if let Some(exp) = t.expires_at {
        println!("  Expires:     {}", exp.to_rfc3339());
    }
}

fn format_permissions(t: &Token) -> String {
    if t.permissions.is_empty() {
        "(unscoped)".to_string()
    } else {
        t.permissions.iter().cloned().collect::<Vec<_>>().join(",")
    }
}
