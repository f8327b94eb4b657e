use std::{error::Error, sync::Arc, time::Duration};

use api_types::event::TransactionRecorded;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use engine::{
    BackgroundPublisher, Budget, BudgetPeriod, BudgetStore, Currency, DbBudgetStore, DbQueue,
    MoneyCents, QueuePublisher,
};
use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "spendsync_admin")]
#[command(about = "Admin utilities for SpendSync (budgets, events, queue)")]
struct Cli {
    /// Database connection string (also read from `DATABASE_URL`).
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite:./spendsync.db?mode=rwc"
    )]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Budget(BudgetCmd),
    Event(EventCmd),
    Queue(QueueCmd),
}

#[derive(Args, Debug)]
struct BudgetCmd {
    #[command(subcommand)]
    command: BudgetCommand,
}

#[derive(Subcommand, Debug)]
enum BudgetCommand {
    Create(BudgetCreateArgs),
    List(BudgetListArgs),
    Update(BudgetUpdateArgs),
    /// Overwrites the spent total, e.g. after a manual correction.
    SetSpent(BudgetSetSpentArgs),
}

#[derive(Args, Debug)]
struct BudgetCreateArgs {
    #[arg(long)]
    user: String,
    #[arg(long)]
    category: String,
    /// Limit in major units, e.g. `200.00`.
    #[arg(long)]
    limit: MoneyCents,
    #[arg(long, default_value = "EUR", value_parser = parse_currency)]
    currency: Currency,
    #[arg(long, default_value = "monthly", value_parser = parse_period)]
    period: BudgetPeriod,
    /// RFC 3339 start of the window.
    #[arg(long)]
    start: DateTime<Utc>,
    /// RFC 3339 inclusive end; defaults to the end of the period.
    #[arg(long)]
    end: Option<DateTime<Utc>>,
    #[arg(long, default_value_t = 80)]
    alert_percent: u8,
}

#[derive(Args, Debug)]
struct BudgetListArgs {
    #[arg(long)]
    user: String,
    #[arg(long, default_value_t = 50)]
    limit: u64,
    #[arg(long, default_value_t = 0)]
    offset: u64,
}

#[derive(Args, Debug)]
struct BudgetUpdateArgs {
    #[arg(long)]
    id: Uuid,
    #[arg(long)]
    user: String,
    #[arg(long)]
    limit: Option<MoneyCents>,
    #[arg(long)]
    alert_percent: Option<u8>,
}

#[derive(Args, Debug)]
struct BudgetSetSpentArgs {
    #[arg(long)]
    id: Uuid,
    #[arg(long)]
    user: String,
    #[arg(long)]
    spent: MoneyCents,
}

#[derive(Args, Debug)]
struct EventCmd {
    #[command(subcommand)]
    command: EventCommand,
}

#[derive(Subcommand, Debug)]
enum EventCommand {
    /// Enqueues a transaction-recorded event for the worker.
    Publish(EventPublishArgs),
}

#[derive(Args, Debug)]
struct EventPublishArgs {
    #[arg(long, default_value = "transactions")]
    queue: String,
    /// Defaults to a fresh id; reuse one to simulate a redelivery.
    #[arg(long)]
    transaction_id: Option<String>,
    #[arg(long)]
    user: String,
    #[arg(long, default_value = "default")]
    account: String,
    #[arg(long)]
    category: String,
    #[arg(long, allow_hyphen_values = true)]
    amount: f64,
    #[arg(long, default_value = "EUR")]
    currency: String,
    /// `expense`, `income` or any other type.
    #[arg(long = "type", default_value = "expense")]
    kind: String,
    /// RFC 3339; defaults to now.
    #[arg(long)]
    occurred_at: Option<DateTime<Utc>>,
}

#[derive(Args, Debug)]
struct QueueCmd {
    #[command(subcommand)]
    command: QueueCommand,
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
    /// Prints the number of messages waiting or in flight.
    Depth {
        #[arg(long, default_value = "transactions")]
        queue: String,
    },
}

fn parse_currency(raw: &str) -> Result<Currency, String> {
    Currency::try_from(raw).map_err(|err| err.to_string())
}

fn parse_period(raw: &str) -> Result<BudgetPeriod, String> {
    BudgetPeriod::try_from(raw).map_err(|err| err.to_string())
}

async fn connect_db(
    database_url: &str,
) -> Result<DatabaseConnection, Box<dyn Error + Send + Sync>> {
    let db = Database::connect(database_url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

fn print_budget(budget: &Budget) {
    println!(
        "{}  {:<16} {:>10} / {:<10} {} {:<9} {} .. {}",
        budget.id,
        budget.category_id,
        budget.spent,
        budget.limit,
        budget.currency,
        budget.period.as_str(),
        budget.period_start.to_rfc3339(),
        budget.period_end.to_rfc3339(),
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter("engine=info")
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db = connect_db(&cli.database_url).await?;
    let budgets = DbBudgetStore::new(db.clone());

    match cli.command {
        Command::Budget(BudgetCmd {
            command: BudgetCommand::Create(args),
        }) => {
            let end = match args.end {
                Some(end) => end,
                None => args.period.window_starting(args.start)?,
            };
            let budget = Budget::new(
                args.user,
                args.category,
                args.limit,
                args.currency,
                args.period,
                args.start,
                end,
                args.alert_percent,
            )?;
            budgets.create(&budget).await?;
            println!("created budget: {}", budget.id);
        }
        Command::Budget(BudgetCmd {
            command: BudgetCommand::List(args),
        }) => {
            for budget in budgets.list(&args.user, args.limit, args.offset).await? {
                print_budget(&budget);
            }
        }
        Command::Budget(BudgetCmd {
            command: BudgetCommand::Update(args),
        }) => {
            let Some(mut budget) = budgets.get_by_id(args.id, &args.user).await? else {
                eprintln!("budget not found: {}", args.id);
                std::process::exit(1);
            };
            if let Some(limit) = args.limit {
                budget.limit = limit;
            }
            if let Some(alert_percent) = args.alert_percent {
                budget.alert_percent = alert_percent;
            }
            budgets.update(&budget).await?;
            print_budget(&budget);
        }
        Command::Budget(BudgetCmd {
            command: BudgetCommand::SetSpent(args),
        }) => {
            budgets.update_spent(args.id, &args.user, args.spent).await?;
            println!("budget {}: spent set to {}", args.id, args.spent);
        }
        Command::Event(EventCmd {
            command: EventCommand::Publish(args),
        }) => {
            let queue = DbQueue::open(db.clone(), args.queue, Duration::from_secs(30))?;
            let (publisher, mut failures) =
                BackgroundPublisher::spawn(Arc::new(QueuePublisher::new(Arc::new(queue))), 1);

            let event = TransactionRecorded {
                transaction_id: args
                    .transaction_id
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                user_id: args.user,
                account_id: args.account,
                category_id: args.category,
                amount: args.amount,
                currency: args.currency,
                occurred_at: args.occurred_at.unwrap_or_else(Utc::now),
                kind: args.kind,
            };
            let transaction_id = event.transaction_id.clone();
            publisher.publish(event);
            publisher.shutdown().await;

            if let Ok(failure) = failures.try_recv() {
                eprintln!(
                    "failed to publish {}: {}",
                    failure.transaction_id, failure.error
                );
                std::process::exit(1);
            }
            println!("published transaction: {transaction_id}");
        }
        Command::Queue(QueueCmd {
            command: QueueCommand::Depth { queue },
        }) => {
            let queue = DbQueue::open(db.clone(), queue, Duration::from_secs(30))?;
            println!("{}: {}", queue.name(), queue.depth().await?);
        }
    }

    Ok(())
}
