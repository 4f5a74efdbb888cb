use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
mod prompt;
use reelkeys::{
    Config, CredentialCodec, CredentialInput, CredentialVault, FileStore, Provider,
    StaticIdentity, UserId, default_store_path,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn resolve_store(path: Option<PathBuf>) -> Result<FileStore> {
    match path {
        Some(p) => Ok(FileStore::new(p)),
        None => Ok(FileStore::new(default_store_path()?)),
    }
}

fn resolve_identity(user: Option<String>) -> Result<StaticIdentity> {
    match user {
        Some(id) => Ok(StaticIdentity::signed_in(UserId::new(id)?)),
        None => Ok(StaticIdentity::anonymous()),
    }
}

#[derive(Debug, Parser)]
#[command(name = "reelkeys")]
#[command(version, about = "Encrypted storage for per-user OpenAI and Gemini API keys.")]
struct Cli {
    /// Path to the credential table
    #[arg(long, global = true, value_name = "PATH", env = "REELKEYS_STORE")]
    store: Option<PathBuf>,

    /// Id of the signed-in user
    #[arg(long, global = true, value_name = "ID", env = "REELKEYS_USER")]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Saves API keys for the user ("-" reads from stdin, "" clears)
    #[command(arg_required_else_help = true)]
    Set {
        /// OpenAI API key
        #[arg(long, value_name = "KEY")]
        openai: Option<String>,

        /// Gemini API key
        #[arg(long, value_name = "KEY")]
        gemini: Option<String>,
    },

    /// Shows the user's API keys
    Get {
        /// Print the decrypted keys instead of their state
        #[arg(short, long, default_value_t = false)]
        reveal: bool,
    },

    /// Deletes all API keys of the user
    Delete,

    /// Shows which providers are configured, without decrypting
    Status,

    /// Encrypts a value into an envelope ("-" or nothing reads from stdin)
    Encrypt { plaintext: Option<String> },

    /// Decrypts an envelope
    #[command(arg_required_else_help = true)]
    Decrypt { envelope: String },
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let config = Config::from_env()?;

    match args.command {
        Commands::Set { openai, gemini } => {
            let mut input = CredentialInput::new();
            if let Some(value) = openai {
                input.openai_key = Some(prompt::resolve_secret(value, "OpenAI API key")?);
            }
            if let Some(value) = gemini {
                input.gemini_key = Some(prompt::resolve_secret(value, "Gemini API key")?);
            }
            if input.is_empty() {
                bail!("nothing to save; pass --openai and/or --gemini");
            }

            let identity = resolve_identity(args.user)?;
            let vault = CredentialVault::from_config(&config, resolve_store(args.store)?)?;
            vault
                .save_for(&identity, &input)
                .context("failed to store API keys")?;
            println!("API keys saved");
        }
        Commands::Get { reveal } => {
            let identity = resolve_identity(args.user)?;
            let vault = CredentialVault::from_config(&config, resolve_store(args.store)?)?;
            let credentials = vault
                .load_for(&identity)
                .context("failed to fetch API keys")?;

            for provider in Provider::ALL {
                match credentials.get(provider) {
                    Some(key) if reveal => println!("{provider}: {key}"),
                    Some(_) => println!("{provider}: configured"),
                    None => println!("{provider}: not set"),
                }
            }
        }
        Commands::Delete => {
            let identity = resolve_identity(args.user)?;
            let vault = CredentialVault::from_config(&config, resolve_store(args.store)?)?;
            vault
                .delete_for(&identity)
                .context("failed to delete API keys")?;
            println!("API keys deleted");
        }
        Commands::Status => {
            let identity = resolve_identity(args.user)?;
            let vault = CredentialVault::from_config(&config, resolve_store(args.store)?)?;

            match vault.status_for(&identity)? {
                None => println!("No API keys stored."),
                Some(status) => {
                    for provider in Provider::ALL {
                        let state = if status.configured.contains(&provider) {
                            "configured"
                        } else {
                            "not set"
                        };
                        println!("{provider}: {state}");
                    }
                    println!("created: {}", status.created_at.to_rfc3339());
                    println!("updated: {}", status.updated_at.to_rfc3339());
                }
            }
        }
        Commands::Encrypt { plaintext } => {
            let codec = CredentialCodec::new(&config)?;
            let plaintext = match plaintext {
                Some(value) => prompt::resolve_secret(value, "Value")?,
                None => prompt::read_secret("Value")?,
            };
            println!("{}", codec.encrypt(&plaintext)?);
        }
        Commands::Decrypt { envelope } => {
            let codec = CredentialCodec::new(&config)?;
            let plaintext = codec.decrypt(envelope.trim())?;
            println!("{}", plaintext.as_str());
        }
    }

    Ok(())
}
