use clap::{Parser, Subcommand};
use inflight::logging::TracingFormat;
use std::path::PathBuf;

/// Exercise request deduplication against a live HTTP API
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML file to read settings from; `INFLIGHT_*` variables override it
    #[arg(long, short, env = "INFLIGHT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fire identical concurrent GETs and report how many were shared
    Fetch {
        /// Endpoint path, resolved against `base_url`
        endpoint: String,
        /// Requests launched together in each round
        #[arg(long, short, default_value_t = 8)]
        concurrency: usize,
        /// Number of rounds
        #[arg(long, short, default_value_t = 1)]
        rounds: usize,
        /// Query parameter as `name=value`; may repeat
        #[arg(long = "param", short = 'p', value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Print the effective configuration
    Stats,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))
}

/// Pretty in debug builds, JSON in release builds.
const fn default_tracing_format() -> TracingFormat {
    if cfg!(debug_assertions) {
        TracingFormat::Pretty
    } else {
        TracingFormat::Json
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_split_on_first_equals() {
        assert_eq!(
            parse_param("filter=a=b").unwrap(),
            ("filter".to_string(), "a=b".to_string())
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn parses_fetch_command() {
        let args = Args::try_parse_from([
            "inflight",
            "fetch",
            "/courses",
            "--concurrency",
            "4",
            "--param",
            "term=202510",
        ])
        .unwrap();
        match args.command {
            Command::Fetch {
                endpoint,
                concurrency,
                rounds,
                params,
            } => {
                assert_eq!(endpoint, "/courses");
                assert_eq!(concurrency, 4);
                assert_eq!(rounds, 1);
                assert_eq!(params, vec![("term".to_string(), "202510".to_string())]);
            }
            Command::Stats => panic!("expected fetch"),
        }
    }
}
