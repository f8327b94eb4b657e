use clap::{Parser, Subcommand};
use sea_orm::Database;
use sea_orm_migration::MigratorTrait;

#[derive(Parser, Debug)]
#[command(name = "migration")]
#[command(about = "Applies or rolls back the SpendSync schema (budgets, markers, queue)")]
struct Cli {
    /// Database connection string (also read from `DATABASE_URL`).
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite:./spendsync.db?mode=rwc"
    )]
    database_url: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Applies pending migrations (all of them by default).
    Up {
        #[arg(long)]
        steps: Option<u32>,
    },
    /// Rolls back applied migrations (all of them by default).
    Down {
        #[arg(long)]
        steps: Option<u32>,
    },
    /// Drops every table and applies all migrations again.
    Fresh,
    /// Lists applied and pending migrations.
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    let db = Database::connect(&cli.database_url)
        .await
        .map_err(|err| format!("cannot open SpendSync database {}: {err}", cli.database_url))?;

    match cli.command.unwrap_or(Command::Up { steps: None }) {
        Command::Up { steps } => {
            migration::Migrator::up(&db, steps).await?;
            println!("spendsync schema is up to date");
        }
        Command::Down { steps } => {
            migration::Migrator::down(&db, steps).await?;
            println!("spendsync schema rolled back");
        }
        Command::Fresh => {
            migration::Migrator::fresh(&db).await?;
            println!("spendsync schema recreated; budgets, markers and queued messages were dropped");
        }
        Command::Status => migration::Migrator::status(&db).await?,
    }

    Ok(())
}
