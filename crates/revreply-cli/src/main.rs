use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use revreply_sync::{AccountOutcome, AccountRow, CycleSummary, SyncConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "revreply")]
#[command(about = "Answers marketplace reviews with AI-generated replies")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Poll forever, pausing between cycles
    Run,
    /// Run a single cycle and print its summary
    Once {
        #[arg(long)]
        json: bool,
    },
    /// Load the account configuration and show how each row resolves
    CheckConfig,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "revreply=info,warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = SyncConfig::from_env();
    let runner = config.build_runner().context("building fleet runner")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!(
                accounts = %config.accounts_file.display(),
                pause_secs = runner.pause().as_secs(),
                "starting poll loop"
            );
            runner
                .run_until(async {
                    if tokio::signal::ctrl_c().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                })
                .await;
        }
        Commands::Once { json } => {
            let summary = runner.run_cycle().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
        }
        Commands::CheckConfig => {
            let rows = runner.source().load().await?;
            for row in rows {
                match row {
                    AccountRow::Known(account) => match account.skip_reason() {
                        None => println!(
                            "{} [{}]: runnable, threshold {}, template '{}'",
                            account.account,
                            account.marketplace,
                            account.rating_threshold,
                            account.prompt_template_key
                        ),
                        Some(reason) => println!(
                            "{} [{}]: skipped, {reason}",
                            account.account, account.marketplace
                        ),
                    },
                    AccountRow::UnknownMarketplace {
                        account,
                        marketplace,
                    } => println!("{account} [{marketplace}]: unknown marketplace"),
                }
            }
        }
    }

    Ok(())
}

fn print_summary(summary: &CycleSummary) {
    println!(
        "cycle {} finished: accounts={} sent={} failed_accounts={}",
        summary.cycle_id,
        summary.accounts.len(),
        summary.sent(),
        summary.failed_accounts()
    );
    for report in &summary.accounts {
        let state = match &report.outcome {
            AccountOutcome::Done => "done".to_string(),
            AccountOutcome::Skipped { reason } => format!("skipped ({reason})"),
            AccountOutcome::Failed { error } => format!("failed ({error})"),
        };
        println!(
            "  {} [{}]: {state}; fetched={} sent={} failed={} skipped={}",
            report.account,
            report.marketplace,
            report.fetched,
            report.sent,
            report.failed,
            report.skipped
        );
    }
    for unknown in &summary.unknown_marketplaces {
        println!("  {unknown}: unknown marketplace");
    }
}
