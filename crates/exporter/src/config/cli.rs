use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::config::serve::OnceArgs;
use crate::config::serve::ServeArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve disk counters over HTTP
    Serve(Box<ServeArgs>),
    /// Collect once and print the result
    Once(OnceArgs),
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_serve_subcommand() {
        let cli = Cli::try_parse_from(["pdh-exporter", "serve", "--listen-addr", "127.0.0.1:9999"])
            .expect("should parse");
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.listen_addr, "127.0.0.1:9999");
    }

    #[test]
    fn parses_once_subcommand() {
        let cli = Cli::try_parse_from(["pdh-exporter", "once", "--metrics-format", "json"])
            .expect("should parse");
        assert!(matches!(cli.command, Commands::Once(_)));
    }
}
