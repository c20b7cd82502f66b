use std::path::PathBuf;

use clap::Parser;

/// Automatic weather station: polls sensors and records time series.
#[derive(Parser, Debug)]
#[command(name = "skylog", version, about)]
struct Cli {
    /// Config file to use
    #[arg(short, long, value_name = "PATH", default_value = "skylog.json")]
    config: PathBuf,

    /// Enable debug output
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = skylog_lib::run(&cli.config, cli.debug).await {
        log::error!("{err:#}");
        std::process::exit(1);
    }
}
