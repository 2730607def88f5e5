// Command line of the `keystone` binary.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use keystone_core::config::{self, Config};
use keystone_core::{Database, LogMailer, UserService};
use tracing::info;

use crate::logging::init_tracing;
use crate::server;

#[derive(Debug, Parser)]
#[command(name = "keystone")]
#[command(about = "Account service: JWT auth, registration and user management")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Create or upgrade the database schema, then exit
    Migrate,
    /// Load and validate the configuration and open the database
    Check,
    /// Create an administrator account
    CreateSuperuser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        /// Read from KEYSTONE_SUPERUSER_PASSWORD when omitted
        #[arg(long, env = "KEYSTONE_SUPERUSER_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = config::load_config().context("failed to load configuration")?;
    init_tracing(&config.logging)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            info!(
                "Keystone {} starting on {}:{}",
                env!("CARGO_PKG_VERSION"),
                config.server.host,
                config.server.port
            );
            server::serve(config).await
        }
        Command::Migrate => migrate(&config),
        Command::Check => check(&config),
        Command::CreateSuperuser {
            username,
            email,
            password,
        } => create_superuser(&config, &username, &email, password),
    }
}

fn open_database(config: &Config) -> Result<Database> {
    Database::open(&config.database.path)
        .with_context(|| format!("failed to open database {}", config.database.path))
}

fn migrate(config: &Config) -> Result<()> {
    let db = open_database(config)?;
    let version = db.schema_version()?;
    info!(
        "Database {} at schema version {version}",
        config.database.path
    );
    println!(
        "database {} is at schema version {version}",
        config.database.path
    );
    Ok(())
}

fn check(config: &Config) -> Result<()> {
    let db = open_database(config)?;
    db.ping()?;
    let users = db.count_users()?;
    println!("configuration ok");
    println!("  listen:   {}:{}", config.server.host, config.server.port);
    println!("  database: {} ({users} users)", config.database.path);
    println!("  jwt:      {}", config.jwt.algorithm);
    if config.app.testing {
        println!("  testing mode is ON");
    }
    Ok(())
}

fn create_superuser(
    config: &Config,
    username: &str,
    email: &str,
    password: Option<String>,
) -> Result<()> {
    let Some(password) = password.filter(|p| !p.is_empty()) else {
        bail!("a password is required: pass --password or set KEYSTONE_SUPERUSER_PASSWORD");
    };
    let db = Arc::new(open_database(config)?);
    let users = UserService::new(db, Arc::new(LogMailer), config);
    let user = users.create_superuser(username, email, &password)?;
    println!("superuser {} created (id {})", user.username, user.id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["keystone"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn create_superuser_takes_flags() {
        let cli = Cli::try_parse_from([
            "keystone",
            "create-superuser",
            "--username",
            "root",
            "--email",
            "root@example.com",
            "--password",
            "s3cret-password",
        ])
        .unwrap();
        match cli.command {
            Some(Command::CreateSuperuser {
                username,
                email,
                password,
            }) => {
                assert_eq!(username, "root");
                assert_eq!(email, "root@example.com");
                assert_eq!(password.as_deref(), Some("s3cret-password"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn create_superuser_requires_username_and_email() {
        assert!(Cli::try_parse_from(["keystone", "create-superuser", "--username", "x"]).is_err());
    }
}
