use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

/// tokenstore: encrypted API token store
#[derive(Parser)]
#[command(name = "tokenstore", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Issue a new token
    Create {
        /// Token id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
        /// Human label (defaults to the id)
        #[arg(long)]
        name: Option<String>,
        /// Secret to register. A random one is generated and printed once
        /// when omitted.
        #[arg(long, env = "TOKENSTORE_NEW_SECRET", hide_env_values = true)]
        secret: Option<String>,
        /// Comma-separated permissions; empty grants everything unless
        /// TOKENSTORE_EMPTY_PERMISSIONS=deny
        #[arg(long, value_delimiter = ',')]
        permissions: Vec<String>,
        /// Expire after this many days
        #[arg(long)]
        expires_in_days: Option<i64>,
        /// Opaque auxiliary data stored with the token
        #[arg(long)]
        aux: Option<String>,
    },

    /// Check a secret and print the matching token
    Validate {
        secret: String,
        /// Also require this permission
        #[arg(long)]
        require: Option<String>,
        /// Bypass the read cache
        #[arg(long)]
        fresh: bool,
    },

    /// Mark a token inactive
    Revoke { id: String },

    /// Change a token's mutable fields
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_delimiter = ',')]
        permissions: Option<Vec<String>>,
        /// active | inactive
        #[arg(long)]
        status: Option<String>,
        #[arg(long, conflicts_with = "clear_aux")]
        aux: Option<String>,
        #[arg(long)]
        clear_aux: bool,
    },

    /// Permanently remove a token
    Delete { id: String },

    /// List tokens
    List {
        /// Include revoked and expired tokens
        #[arg(long)]
        all: bool,
    },

    /// Remove expired tokens
    Cleanup {
        /// Keep running and sweep every N seconds
        #[arg(long)]
        every: Option<u64>,
    },

    /// Show where tokens are stored (JSON)
    Info,
}

/// Expiry timestamp `days` after `now`, or an error if it does not fit.
pub fn expiry_after_days(now: DateTime<Utc>, days: i64) -> anyhow::Result<DateTime<Utc>> {
    chrono::Duration::try_days(days)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| anyhow::anyhow!("expiry out of range: {} days", days))
}
