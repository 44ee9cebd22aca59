//! Drift CLI
//!
//! A command-line tool for triggering drift ticks, reviewing waste
//! recommendations and managing execution mode and resource policies.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use commands::{
    recommendations::{self, parse_when, Review},
    settings, tick,
};

/// Drift CLI
#[derive(Parser)]
#[command(name = "drift")]
#[command(author, version, about = "CLI for the Drift waste remediation agent", long_about = None)]
pub struct Cli {
    /// Agent URL (can also be set via DRIFT_API_URL env var) [default: http://localhost:8080]
    #[arg(long, env = "DRIFT_API_URL")]
    pub api_url: Option<String>,

    /// Output format [default: table]
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Mode {
    Manual,
    Automated,
}

impl Mode {
    fn as_str(&self) -> &'static str {
        match self {
            Mode::Manual => "manual",
            Mode::Automated => "automated",
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Policy {
    AutoSafe,
    RecommendOnly,
    Ignore,
}

impl Policy {
    fn as_str(&self) -> &'static str {
        match self {
            Policy::AutoSafe => "auto_safe",
            Policy::RecommendOnly => "recommend_only",
            Policy::Ignore => "ignore",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one detect, gate and remediate pass now
    Tick {
        /// Override the stored execution mode for this tick only
        #[arg(long, value_enum)]
        mode: Option<Mode>,
    },

    /// Show the current execution mode
    Status,

    /// Show agent component health
    Health,

    /// Manage the global execution mode
    #[command(subcommand)]
    Mode(ModeCommands),

    /// List enabled waste scenarios
    Scenarios,

    /// Review waste recommendations
    #[command(subcommand)]
    Recommendations(RecommendationCommands),

    /// Approve a recommendation for execution
    Approve {
        /// Recommendation ID
        id: String,
    },

    /// Reject a recommendation; it will not be raised again
    Reject {
        /// Recommendation ID
        id: String,
    },

    /// Hide a recommendation until a later time
    Snooze {
        /// Recommendation ID
        id: String,

        /// RFC 3339 timestamp or offset (e.g. 12h, 7d)
        #[arg(long)]
        until: String,
    },

    /// Schedule a recommendation for automatic execution
    Schedule {
        /// Recommendation ID
        id: String,

        /// RFC 3339 timestamp or offset (e.g. 30m, 1d)
        #[arg(long)]
        at: String,
    },

    /// Execute an approved recommendation now
    Execute {
        /// Recommendation ID
        id: String,
    },

    /// Manage per-resource optimization policies
    #[command(subcommand)]
    Policy(PolicyCommands),

    /// Manage local CLI configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum ModeCommands {
    /// Persist a new execution mode
    Set {
        #[arg(value_enum)]
        mode: Mode,
    },
}

#[derive(Subcommand)]
pub enum RecommendationCommands {
    /// List recommendations
    List {
        /// Filter by status (pending, approved, rejected, snoozed, scheduled, executed, expired)
        #[arg(long)]
        status: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// Set the optimization policy of one resource
    Set {
        /// Resource type (e.g. ec2_instance, ebs_volume)
        kind: String,

        /// Resource ID
        id: String,

        #[arg(value_enum)]
        policy: Policy,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Store the agent URL used when --api-url is not given
    SetUrl { url: String },

    /// Store the default output format
    SetFormat {
        #[arg(value_enum)]
        format: output::OutputFormat,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = config::Config::load()?;
    let format = config.resolve_format(cli.format);

    // Local configuration needs no agent
    if let Commands::Config(config_cmd) = &cli.command {
        match config_cmd {
            ConfigCommands::Show => {
                println!("API URL: {}", config.resolve_api_url(cli.api_url.clone()));
                println!("Format: {:?}", format);
                println!("Config file: {}", config::Config::config_path()?.display());
            }
            ConfigCommands::SetUrl { url } => {
                url::Url::parse(url)?;
                config.api_url = Some(url.clone());
                let path = config.save()?;
                output::print_success(&format!("Saved API URL to {}", path.display()));
            }
            ConfigCommands::SetFormat { format } => {
                config.default_format = Some(*format);
                let path = config.save()?;
                output::print_success(&format!("Saved default format to {}", path.display()));
            }
        }
        return Ok(());
    }

    // Initialize client
    let client = client::ApiClient::new(&config.resolve_api_url(cli.api_url))?;

    // Execute command
    match cli.command {
        Commands::Tick { mode } => {
            tick::run_tick(&client, mode.map(|m| m.as_str().to_string()), format).await?;
        }
        Commands::Status => settings::show_status(&client, format).await?,
        Commands::Health => settings::show_health(&client, format).await?,
        Commands::Mode(ModeCommands::Set { mode }) => {
            settings::set_mode(&client, mode.as_str(), format).await?;
        }
        Commands::Scenarios => settings::list_scenarios(&client, format).await?,
        Commands::Recommendations(RecommendationCommands::List { status }) => {
            recommendations::list_recommendations(&client, status, format).await?;
        }
        Commands::Approve { id } => {
            recommendations::review_recommendation(&client, &id, Review::Approve, format).await?;
        }
        Commands::Reject { id } => {
            recommendations::review_recommendation(&client, &id, Review::Reject, format).await?;
        }
        Commands::Snooze { id, until } => {
            let until = parse_when(&until, Utc::now())?;
            recommendations::review_recommendation(&client, &id, Review::Snooze { until }, format)
                .await?;
        }
        Commands::Schedule { id, at } => {
            let at = parse_when(&at, Utc::now())?;
            recommendations::review_recommendation(&client, &id, Review::Schedule { at }, format)
                .await?;
        }
        Commands::Execute { id } => {
            recommendations::review_recommendation(&client, &id, Review::Execute, format).await?;
        }
        Commands::Policy(PolicyCommands::Set { kind, id, policy }) => {
            settings::set_policy(&client, &kind, &id, policy.as_str(), format).await?;
        }
        Commands::Config(_) => {}
    }

    Ok(())
}
