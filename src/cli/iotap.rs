use clap::{Parser, Subcommand, ValueEnum};

pub const NAME: &str = "iotap";

#[derive(Parser, Debug, Clone)]
#[clap(name = NAME)]
#[clap(about = "iotap command line utility")]
pub struct IotapCliOpts {
    /// Unix socket of the daemon API
    #[clap(long, global = true)]
    pub api_server: Option<String>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Filters and counters of the daemon
    Status,
    /// List target pids
    Targets,
    /// Report the given pids. Disables broadcast mode
    Add {
        #[clap(required = true)]
        pids: Vec<u32>,
    },
    /// Stop reporting a target pid
    Remove { pid: u32 },
    /// Remove every target pid. Disables broadcast mode
    Clear,
    /// Report every pid which isn't excluded
    Broadcast {
        #[clap(value_enum)]
        state: Switch,
    },
    /// Never report the given pids
    Exclude {
        #[clap(required = true)]
        pids: Vec<u32>,
    },
    /// Remove an exclusion
    Include { pid: u32 },
    /// List excluded pids
    Exclusions,
    /// Print events as they're received by the daemon
    Monitor,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}

impl From<Switch> for bool {
    fn from(switch: Switch) -> Self {
        switch == Switch::On
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<IotapCliOpts, clap::Error> {
        IotapCliOpts::try_parse_from(std::iter::once(NAME).chain(args.iter().copied()))
    }

    #[test]
    fn commands() {
        assert_eq!(parse(&["status"]).unwrap().command, Commands::Status);
        assert_eq!(
            parse(&["add", "10", "20"]).unwrap().command,
            Commands::Add { pids: vec![10, 20] }
        );
        assert_eq!(
            parse(&["remove", "10"]).unwrap().command,
            Commands::Remove { pid: 10 }
        );
        assert_eq!(
            parse(&["broadcast", "off"]).unwrap().command,
            Commands::Broadcast { state: Switch::Off }
        );
        assert_eq!(
            parse(&["include", "3"]).unwrap().command,
            Commands::Include { pid: 3 }
        );
    }

    #[test]
    fn api_server_anywhere() {
        let opts = parse(&["--api-server", "/tmp/iotap.sock", "targets"]).unwrap();
        assert_eq!(opts.api_server.as_deref(), Some("/tmp/iotap.sock"));
        let opts = parse(&["exclusions", "--api-server", "/tmp/iotap.sock"]).unwrap();
        assert_eq!(opts.api_server.as_deref(), Some("/tmp/iotap.sock"));
        assert_eq!(parse(&["monitor"]).unwrap().api_server, None);
    }

    #[test]
    fn invalid_arguments() {
        assert!(parse(&["add"]).is_err());
        assert!(parse(&["exclude"]).is_err());
        assert!(parse(&["add", "-1"]).is_err());
        assert!(parse(&["remove", "abc"]).is_err());
        assert!(parse(&["broadcast", "maybe"]).is_err());
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn switch() {
        assert!(bool::from(Switch::On));
        assert!(!bool::from(Switch::Off));
    }
}
