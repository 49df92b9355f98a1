//! Command-line interface definitions for flow_harvest.
//!
//! Every flag can also be supplied through an environment variable. Flags
//! override the YAML config file, which overrides the built-in defaults.

use crate::config::CrawlConfig;
use crate::models::Category;
use chrono::NaiveDate;
use clap::Parser;

/// Command-line arguments for one crawl run.
///
/// # Examples
///
/// ```sh
/// # Yesterday's top articles for every flow
/// flow_harvest -o ./out
///
/// # A week of two flows, with a config file
/// flow_harvest -o ./out --from 2023-01-01 --to 2023-01-07 \
///     --category develop --category admin -c crawl.yaml
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Directory that receives one sub-directory per run
    #[arg(short, long, env = "FLOW_HARVEST_OUTPUT_DIR")]
    pub output_dir: String,

    /// First day to crawl (YYYY-MM-DD, site-local); defaults to yesterday
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// Last day to crawl, inclusive; defaults to yesterday
    #[arg(long)]
    pub to: Option<NaiveDate>,

    /// Flow to crawl, by slug or name; repeat for several. Defaults to all six
    #[arg(long = "category", value_name = "CATEGORY")]
    pub categories: Vec<Category>,

    /// Optional path to a YAML crawl config
    #[arg(short, long, env = "FLOW_HARVEST_CONFIG")]
    pub config: Option<String>,

    /// Number of concurrent workers (at least 2)
    #[arg(long, env = "FLOW_HARVEST_WORKERS")]
    pub workers: Option<usize>,

    /// Maximum number of article jobs queued or in flight
    #[arg(long)]
    pub queue_depth: Option<usize>,

    /// Total attempts per job before a transient failure is given up on
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Length of the most-active-authors and most-common-tags lists
    #[arg(long, default_value_t = 10)]
    pub top: usize,
}

impl Cli {
    /// Apply flags given on the command line over `config`.
    pub fn apply_overrides(&self, config: &mut CrawlConfig) {
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(depth) = self.queue_depth {
            config.queue_depth = depth;
        }
        if let Some(attempts) = self.max_attempts {
            config.max_attempts = attempts;
        }
        if let Some(secs) = self.timeout_secs {
            config.request_timeout_secs = secs;
        }
    }

    /// Requested categories, or all of them when none were named.
    pub fn categories(&self) -> Vec<Category> {
        if self.categories.is_empty() {
            Category::ALL.to_vec()
        } else {
            let mut categories = self.categories.clone();
            categories.sort();
            categories.dedup();
            categories
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "flow_harvest",
            "--output-dir",
            "./out",
            "--from",
            "2023-01-01",
            "--to",
            "2023-01-03",
        ]);

        assert_eq!(cli.output_dir, "./out");
        assert_eq!(cli.from, NaiveDate::from_ymd_opt(2023, 1, 1));
        assert_eq!(cli.to, NaiveDate::from_ymd_opt(2023, 1, 3));
        assert_eq!(cli.categories(), Category::ALL.to_vec());
        assert_eq!(cli.top, 10);
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from(["flow_harvest", "-o", "/tmp/out", "-c", "/tmp/crawl.yaml"]);

        assert_eq!(cli.output_dir, "/tmp/out");
        assert_eq!(cli.config.as_deref(), Some("/tmp/crawl.yaml"));
    }

    #[test]
    fn test_repeated_categories_by_slug_or_name() {
        let cli = Cli::parse_from([
            "flow_harvest",
            "-o",
            "out",
            "--category",
            "admin",
            "--category",
            "Development",
            "--category",
            "ADMIN",
        ]);

        assert_eq!(cli.categories(), vec![Category::Develop, Category::Admin]);
    }

    #[test]
    fn test_unknown_category_is_rejected() {
        let result = Cli::try_parse_from(["flow_harvest", "-o", "out", "--category", "gaming"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "flow_harvest",
            "-o",
            "out",
            "--workers",
            "3",
            "--timeout-secs",
            "5",
        ]);
        let mut config = CrawlConfig {
            workers: 12,
            queue_depth: 7,
            ..CrawlConfig::default()
        };
        cli.apply_overrides(&mut config);

        assert_eq!(config.workers, 3);
        assert_eq!(config.request_timeout_secs, 5);
        assert_eq!(config.queue_depth, 7);
    }
}
