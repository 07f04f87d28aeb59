//! CLI tool for managing local mail users
//!
//! # Usage
//!
//! ```bash
//! # Print a password hash
//! mta-user hash password123
//!
//! # Add a user, optionally redirecting its mail
//! mta-user --users users.toml add user@example.com password123
//! mta-user --users users.toml add list@example.com "" --redirect owner@elsewhere.net
//!
//! # List users
//! mta-user --users users.toml list
//! ```

use anyhow::bail;
use clap::{Parser, Subcommand};
use mta_rs::directory::{UserRecord, UsersFile};
use mta_rs::security::hash_password;
use mta_rs::utils::validate_email;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mta-user")]
#[command(about = "Manage local mail users", long_about = None)]
struct Cli {
    /// Users file
    #[arg(short, long, default_value = "users.toml")]
    users: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the Argon2 hash of a password
    Hash { password: String },
    /// Add a user
    Add {
        address: String,
        /// Empty for a user that never authenticates
        password: String,
        /// Forward this user's mail to another address
        #[arg(long)]
        redirect: Option<String>,
    },
    /// List all users
    List,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Hash { password } => {
            println!("{}", hash_password(&password)?);
        }
        Commands::Add {
            address,
            password,
            redirect,
        } => {
            validate_email(&address)?;
            if let Some(target) = &redirect {
                validate_email(target)?;
            }

            let mut file = if cli.users.exists() {
                UsersFile::from_file(&cli.users)?
            } else {
                UsersFile::default()
            };
            if file
                .users
                .iter()
                .any(|u| u.address.eq_ignore_ascii_case(&address))
            {
                bail!("User {} already exists", address);
            }

            let password_hash = if password.is_empty() {
                String::new()
            } else {
                hash_password(&password)?
            };
            file.users.push(UserRecord {
                address: address.clone(),
                password_hash,
                redirect,
            });
            file.save(&cli.users)?;
            println!("✓ User {} added to {}", address, cli.users.display());
        }
        Commands::List => {
            let file = UsersFile::from_file(&cli.users)?;
            if file.users.is_empty() {
                println!("No users found");
            }
            for user in &file.users {
                match &user.redirect {
                    Some(target) => println!("  {} -> {}", user.address, target),
                    None => println!("  {}", user.address),
                }
            }
        }
    }

    Ok(())
}
