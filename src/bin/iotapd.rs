use anyhow::Result;
use clap::Parser;
use iotap::cli::{Verbosity, iotapd::IotapDaemonOpts};

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::parse();
    let log_level = Some(opts.verbosity.log_level_filter());

    let result = match iotap::iotapd::load_config(&opts.daemon_opts) {
        Ok((config, daemon_config)) => {
            iotap::init_logger(log_level, daemon_config.log_file.as_ref());
            iotap::iotapd::iotap_daemon_run(config, daemon_config).await
        }
        Err(e) => {
            iotap::init_logger(log_level, None);
            Err(e)
        }
    };

    match result {
        Ok(_) => std::process::exit(0),
        Err(e) => {
            iotap::utils::report_error(&e);
            std::process::exit(1);
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[clap(about = "iotap daemon: traces read and write syscalls")]
#[clap(version)]
#[clap(disable_help_subcommand = true)]
struct Opts {
    #[command(flatten)]
    pub daemon_opts: IotapDaemonOpts,

    #[command(flatten)]
    pub verbosity: Verbosity,
}
