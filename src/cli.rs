//! Command-line interface definitions for Feed Harvest.
//!
//! All three paths are required; clap prints usage and exits non-zero when
//! one is missing.

use clap::Parser;

/// Command-line arguments for a harvest run.
///
/// # Examples
///
/// ```sh
/// # Incremental feed crawl
/// feed_harvest -l harvest.log -c config.yaml -s state.yaml
///
/// # Crawl the configured archive listings instead
/// feed_harvest -l harvest.log -c config.yaml -s state.yaml --archive
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Log file, appended to alongside stdout
    #[arg(short, long)]
    pub log: String,

    /// YAML configuration with vendors, rules and the sink
    #[arg(short, long)]
    pub config: String,

    /// YAML crawl state holding each source's watermark
    #[arg(short, long)]
    pub state: String,

    /// Crawl archive listing pages instead of feeds; state is left untouched
    #[arg(long, default_value_t = false)]
    pub archive: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(&[
            "feed_harvest",
            "--log",
            "./harvest.log",
            "--config",
            "./config.yaml",
            "--state",
            "./state.yaml",
        ]);

        assert_eq!(cli.log, "./harvest.log");
        assert_eq!(cli.config, "./config.yaml");
        assert_eq!(cli.state, "./state.yaml");
        assert!(!cli.archive);
    }

    #[test]
    fn test_cli_short_flags_and_archive() {
        let cli = Cli::parse_from(&[
            "feed_harvest",
            "-l",
            "/tmp/h.log",
            "-c",
            "/tmp/c.yaml",
            "-s",
            "/tmp/s.yaml",
            "--archive",
        ]);

        assert_eq!(cli.log, "/tmp/h.log");
        assert_eq!(cli.config, "/tmp/c.yaml");
        assert_eq!(cli.state, "/tmp/s.yaml");
        assert!(cli.archive);
    }

    #[test]
    fn test_cli_missing_required_is_an_error() {
        let err = Cli::try_parse_from(&["feed_harvest", "-l", "x.log", "-c", "c.yaml"]);
        assert!(err.is_err());
    }
}
