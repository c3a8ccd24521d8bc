use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use befa::api::StaticToken;
use befa::app::App;
use befa::commands::{self, Command};
use befa::config::Config;
use befa::event::Notifier;
use befa::logging;

#[derive(Parser, Debug)]
#[command(name = "befa")]
#[command(about = "Browse the BEFA academy feed, players, schedule and store")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/befa/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _logs = logging::init();

  let config = Config::load(args.config.as_deref())?;
  let tokens = Arc::new(StaticToken::new(Config::get_access_token()));

  let (notifier, mut notices) = Notifier::channel();
  let printer = tokio::spawn(async move {
    while let Some(notice) = notices.next().await {
      eprintln!("{}", notice);
    }
  });

  let app = App::new(config, tokens, notifier)?;
  tracing::info!(command = ?args.command, "running");
  let result = commands::run(&app, args.command).await;

  // Dropping the stores closes the notice channel
  drop(app);
  let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;

  result
}
