//! Command-line interface definitions for the knowledge-base scraper.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Targets are given either as positional URLs or as a named target set that
//! ships with its own schema and URLs.

use clap::Parser;

/// Command-line arguments for the scraper.
///
/// # Examples
///
/// ```sh
/// # Scrape explicit URLs with the static fetch path
/// travian_kb_scraper -o costs.json https://example.com/buildings/woodcutter
///
/// # Scrape a JavaScript-rendered page through a local geckodriver
/// travian_kb_scraper -o costs.json --rendered --webdriver-url http://localhost:4444 \
///     https://knowledgebase.legends.travian.com/en-US/buildings
///
/// # Use the built-in target set
/// travian_kb_scraper -o costs.json --target-set travian-buildings
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Target page URLs to scrape
    pub urls: Vec<String>,

    /// Named target set with a built-in schema and URL list
    #[arg(short, long, conflicts_with = "urls")]
    pub target_set: Option<String>,

    /// Output JSON file for the scraped cost table
    #[arg(short, long)]
    pub out: String,

    /// Fetch the positional URLs through a browser session instead of plain HTTP
    #[arg(long)]
    pub rendered: bool,

    /// Run the browser headless (pass --headless=false to watch it)
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub headless: bool,

    /// Per-request timeout for static HTTP fetches, in seconds
    #[arg(long, default_value_t = 30)]
    pub fetch_timeout_seconds: u64,

    /// How long to wait for the rendered page's table to appear, in seconds
    #[arg(long, default_value_t = 15)]
    pub render_wait_timeout_seconds: u64,

    /// Fetch retries for network/timeout failures (attempts = retries + 1)
    #[arg(long, default_value_t = 3)]
    pub max_fetch_retries: usize,

    /// WebDriver server for the rendered fetch path
    #[arg(long, env = "WEBDRIVER_URL", default_value = "http://localhost:4444")]
    pub webdriver_url: String,

    /// How many targets to process in parallel
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,

    /// Maximum concurrent browser sessions
    #[arg(long, default_value_t = 1)]
    pub browser_sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing_urls() {
        let cli = Cli::parse_from(&[
            "travian_kb_scraper",
            "--out",
            "costs.json",
            "https://example.com/a",
            "https://example.com/b",
        ]);

        assert_eq!(cli.out, "costs.json");
        assert_eq!(cli.urls.len(), 2);
        assert!(!cli.rendered);
        assert!(cli.headless);
        assert_eq!(cli.max_fetch_retries, 3);
    }

    #[test]
    fn test_cli_target_set() {
        let cli = Cli::parse_from(&[
            "travian_kb_scraper",
            "-o",
            "costs.json",
            "--target-set",
            "travian-buildings",
            "--headless",
            "false",
        ]);

        assert_eq!(cli.target_set.as_deref(), Some("travian-buildings"));
        assert!(cli.urls.is_empty());
        assert!(!cli.headless);
    }

    #[test]
    fn test_cli_urls_conflict_with_target_set() {
        let result = Cli::try_parse_from(&[
            "travian_kb_scraper",
            "-o",
            "costs.json",
            "--target-set",
            "travian-buildings",
            "https://example.com/a",
        ]);
        assert!(result.is_err());
    }
}
