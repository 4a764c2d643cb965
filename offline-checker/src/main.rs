use std::path::PathBuf;

use clap::Parser;
use offline_checker::{checker, config::Config, Result};

#[derive(Parser, Debug)]
#[clap(
    name = "offline-checker",
    version,
    author,
    about = "Reports DCS IDCs and Modbus devices which have gone offline or come back"
)]
struct Cli {
    #[clap(
        env = "OFFLINE_CHECKER_CONFIG",
        default_value = "offline-checker.toml",
        value_hint = clap::ValueHint::FilePath
    )]
    config: PathBuf,

    /// Report without sending email or updating the state file
    #[clap(long)]
    dry_run: bool,

    /// Never send the report email
    #[clap(long)]
    no_email: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Cli::parse();

    let config = Config::load(&args.config)?;
    let options = checker::Options {
        save_state: !args.dry_run,
        send_email: !args.dry_run && !args.no_email,
    };

    checker::run(&config, &options).await
}
