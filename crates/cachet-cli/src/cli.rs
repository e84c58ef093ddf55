use cachet_cache::Directives;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "cachet")]
#[command(about = "Cachet cache maintenance: clear tiers and sweep expired entries")]
#[command(version)]
pub struct Cli {
    /// Remove every entry from every configured tier
    #[arg(long = "clear_all")]
    pub clear_all: bool,

    /// Remove expired entries from tiers without native expiry
    #[arg(long)]
    pub cleanup: bool,

    /// Remove every entry from one tier (remote or file)
    #[arg(long = "clear_tier", value_name = "TIER")]
    pub clear_tier: Option<String>,

    /// Configuration file (defaults to ./cachet.toml when present)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Log level or filter, overriding the configured one
    #[arg(long = "log-level")]
    pub log_level: Option<String>,

    /// Show configured and reachable tiers
    #[arg(long)]
    pub tiers: bool,
}

impl Cli {
    pub fn directives(&self) -> Directives {
        Directives {
            clear_all: self.clear_all,
            cleanup: self.cleanup,
            clear_tier: self.clear_tier.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_underscore_flags() {
        let cli = Cli::try_parse_from(["cachet", "--clear_all", "--cleanup", "--clear_tier=file"])
            .unwrap();
        assert_eq!(
            cli.directives(),
            Directives {
                clear_all: true,
                cleanup: true,
                clear_tier: Some("file".into()),
            }
        );
    }

    #[test]
    fn no_flags_means_no_directives() {
        let cli = Cli::try_parse_from(["cachet", "--log-level", "debug"]).unwrap();
        assert!(cli.directives().is_empty());
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }
}
