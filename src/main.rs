mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reposcope_core::Config;

#[derive(Parser)]
#[command(name = "reposcope")]
#[command(about = "Index source repositories and search them in natural language")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone (or open) a repository and build its semantic index
    Index {
        /// Repository URL; also the identity the index is stored under
        url: String,
        /// Index this directory instead of cloning the URL
        #[arg(long)]
        local: Option<PathBuf>,
    },
    /// Search an indexed repository
    Search {
        /// Repository URL used at index time
        url: String,
        /// Natural-language query
        query: String,
        /// Maximum number of results
        #[arg(long, short)]
        limit: Option<usize>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show what is stored for a repository
    Status {
        url: String,
    },
    /// List indexed repositories
    List,
    /// Delete a repository and all of its chunks
    Forget {
        url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config);
    let config = Config::load(&config_path)?;
    config.validate()?;

    match cli.command {
        Commands::Index { url, local } => commands::index(config, &url, local).await,
        Commands::Search {
            url,
            query,
            limit,
            json,
        } => commands::search(config, &url, &query, limit, json).await,
        Commands::Status { url } => commands::status(&config, &url).await,
        Commands::List => commands::list(&config).await,
        Commands::Forget { url } => commands::forget(&config, &url).await,
    }
}

fn resolve_config_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Ok(path) = std::env::var("REPOSCOPE_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use serial_test::serial;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_search_with_options() {
        let cli = Cli::try_parse_from([
            "reposcope",
            "--config",
            "alt.toml",
            "search",
            "https://github.com/acme/widgets",
            "where are tokens refreshed",
            "--limit",
            "3",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("alt.toml")));
        match cli.command {
            Commands::Search {
                url,
                query,
                limit,
                json,
            } => {
                assert_eq!(url, "https://github.com/acme/widgets");
                assert_eq!(query, "where are tokens refreshed");
                assert_eq!(limit, Some(3));
                assert!(json);
            }
            _ => panic!("expected search"),
        }
    }

    #[test]
    fn parses_index_with_local_dir() {
        let cli =
            Cli::try_parse_from(["reposcope", "index", "https://x.test/a/b", "--local", "."])
                .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Index { local: Some(_), .. }
        ));
    }

    #[test]
    fn search_requires_query() {
        assert!(Cli::try_parse_from(["reposcope", "search", "https://x.test/a/b"]).is_err());
    }

    #[test]
    #[serial]
    fn config_path_prefers_flag_then_env() {
        unsafe { std::env::set_var("REPOSCOPE_CONFIG", "/etc/reposcope.toml") };
        assert_eq!(
            resolve_config_path(Some(PathBuf::from("cli.toml"))),
            PathBuf::from("cli.toml")
        );
        assert_eq!(
            resolve_config_path(None),
            PathBuf::from("/etc/reposcope.toml")
        );
        unsafe { std::env::remove_var("REPOSCOPE_CONFIG") };
        assert_eq!(
            resolve_config_path(None),
            PathBuf::from("config/default.toml")
        );
    }
}
