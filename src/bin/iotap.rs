use anyhow::Result;
use clap::Parser;
use iotap::cli::{Verbosity, iotap::IotapCliOpts};

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::parse();

    iotap::init_logger(Some(opts.verbosity.log_level_filter()), None);

    match iotap::iotap::iotap_cli_run(&opts.cli_opts).await {
        Ok(_) => std::process::exit(0),
        Err(e) => {
            iotap::utils::report_error(&e);
            std::process::exit(1);
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[clap(about = "iotap command line utility")]
#[clap(version)]
#[clap(disable_help_subcommand = true)]
struct Opts {
    #[command(flatten)]
    cli_opts: IotapCliOpts,

    #[command(flatten)]
    pub verbosity: Verbosity,
}
