use clap::Parser;

pub const NAME: &str = "iotapd";

#[derive(Parser, Debug, Clone)]
#[clap(name = NAME)]
#[clap(about = "iotap daemon")]
pub struct IotapDaemonOpts {
    /// Configuration file, must exist. Defaults to /var/lib/iotap/iotap.ini
    #[clap(long)]
    pub config_file: Option<String>,
}
