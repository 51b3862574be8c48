mod app;
mod commands;
mod render;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Environment variable read when `--password` is not given
const PASSWORD_ENV: &str = "NOTELOCK_PASSWORD";

#[derive(Parser)]
#[command(name = "notelock-cli", about = "Lock, unlock and maintain password protected notes", version)]
struct Cli {
    /// Storage root (default: the platform data directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// List notes
    List,

    /// Create a new note
    New {
        /// Note title
        title: String,
        /// HTML content (use "-" to read from stdin)
        #[arg(long)]
        content: Option<String>,
        /// Files to attach
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
    },

    /// Turn on the lock of a note, or re-encrypt it with a new password
    Lock {
        /// Note title or id (case-insensitive prefix match)
        note: String,
        #[arg(long)]
        password: Option<String>,
        /// Password currently protecting the note, when changing it
        #[arg(long)]
        current_password: Option<String>,
    },

    /// Decrypt a locked note and print it
    Unlock {
        /// Note title or id (case-insensitive prefix match)
        note: String,
        #[arg(long)]
        password: Option<String>,
        /// Save the note without its lock afterwards
        #[arg(long)]
        remove_lock: bool,
    },

    /// Show the stored lock field of a note without decrypting it
    Inspect {
        /// Note title or id (case-insensitive prefix match)
        note: String,
    },

    /// Delete a note and all of its attachment files
    Delete {
        /// Note title or id (case-insensitive prefix match)
        note: String,
    },

    /// Purge staged plaintext and report orphaned encrypted files
    Sweep {
        /// Also delete the orphaned encrypted files
        #[arg(long)]
        remove: bool,
    },
}

/// Read content from stdin if "-" was given
fn resolve_content(content: Option<String>) -> Option<String> {
    match content.as_deref() {
        Some("-") => {
            let mut buf = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf).ok();
            Some(buf)
        }
        _ => content,
    }
}

/// Password from the flag, falling back to the environment
fn resolve_password(password: Option<String>) -> Option<String> {
    password
        .or_else(|| std::env::var(PASSWORD_ENV).ok())
        .filter(|p| !p.is_empty())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let use_color = !cli.no_color && atty_check();
    let app = app::App::new(cli.root)?;

    match cli.command {
        Command::List => {
            commands::list::run(&app, &cli.format, use_color)?;
        }
        Command::New { title, content, attachments } => {
            let content = resolve_content(content);
            commands::new::run(&app, &title, content, &attachments, &cli.format)?;
        }
        Command::Lock { note, password, current_password } => {
            let password = resolve_password(password);
            commands::lock::run(&app, &note, password, current_password, use_color).await?;
        }
        Command::Unlock { note, password, remove_lock } => {
            let password = resolve_password(password);
            commands::unlock::run(&app, &note, password, remove_lock, &cli.format, use_color).await?;
        }
        Command::Inspect { note } => {
            commands::inspect::run(&app, &note, &cli.format)?;
        }
        Command::Delete { note } => {
            commands::delete::run(&app, &note)?;
        }
        Command::Sweep { remove } => {
            commands::sweep::run(&app, remove, &cli.format)?;
        }
    }

    Ok(())
}

/// Check if stdout is a terminal (for color support)
fn atty_check() -> bool {
    unsafe { libc_isatty(1) != 0 }
}

extern "C" {
    #[link_name = "isatty"]
    fn libc_isatty(fd: i32) -> i32;
}
