use anyhow::Result;
use clap::{Parser, Subcommand};

use keepsake::cli::{handle_backup_command, BackupCommands};
use keepsake::config::{paths::KeepsakePaths, settings::Settings};
use keepsake::logging::init_tracing;

#[derive(Parser)]
#[command(
    name = "keepsake",
    version,
    about = "Backup and restore for an application's database, files and config",
    long_about = "keepsake produces timestamped backups of a SQLite database, an \
                  application storage tree and a set of configuration files, lists \
                  and manages them in one backup directory, and restores them into \
                  the live deployment while preserving the audit trail."
)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress log output
    #[arg(short, long)]
    quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Backup(BackupCommands),

    /// Create the base directory and a default config.json
    Init,

    /// Show current configuration and paths
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet, cli.log_json);

    // Initialize paths and settings
    let paths = KeepsakePaths::new()?;
    let settings = Settings::load_or_create(&paths)?;

    match cli.command {
        Some(Commands::Backup(cmd)) => {
            handle_backup_command(&paths, &settings, cmd)?;
        }
        Some(Commands::Init) => {
            println!("Initializing keepsake at: {}", paths.base_dir().display());
            paths.ensure_directories()?;
            settings.save(&paths)?;
            println!("Initialization complete!");
            println!();
            println!("Settings written to {}", paths.settings_file().display());
            println!("Backups will be stored in {}", settings.backup_dir(&paths).display());
            println!();
            println!("Run 'keepsake run --dry-run' to see what would be backed up.");
        }
        Some(Commands::Config) => {
            println!("keepsake Configuration");
            println!("======================");
            println!("Base directory:   {}", paths.base_dir().display());
            println!("Settings file:    {}", paths.settings_file().display());
            println!("Backup directory: {}", settings.backup_dir(&paths).display());
            println!("Database:         {}", settings.database_path(&paths).display());
            println!("Storage:          {}", settings.storage_dir(&paths).display());
            println!("Project root:     {}", settings.project_root(&paths).display());
            println!();
            println!("Settings:");
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        None => {
            println!("keepsake - backup and restore for application deployments");
            println!();
            println!("Run 'keepsake --help' for usage information.");
        }
    }

    Ok(())
}
