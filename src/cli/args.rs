//! Command line argument parsing
//!
//! Subcommands:
//! - `plan`: fetch the collection and print the mutation plan for a desired-state file
//! - `apply`: plan, then apply the plan (optionally verifying convergence)
//! - `fetch`: print the current remote tree
//! - `show-config`: show configuration discovery information

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Debug, PartialEq)]
pub enum ExecutionMode {
    Plan(PlanConfig),
    Apply(ApplyConfig),
    Fetch(FetchConfig),
    ShowConfig,
}

/// Options shared by every command that talks to the API
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionConfig {
    pub config_override: Option<PathBuf>,
    pub collection_override: Option<String>,
    pub verbose: bool,
}

#[derive(Debug, PartialEq)]
pub struct PlanConfig {
    pub desired_file: PathBuf,
    pub connection: ConnectionConfig,
    pub dump_plan: Option<PathBuf>,
}

#[derive(Debug, PartialEq)]
pub struct ApplyConfig {
    pub desired_file: PathBuf,
    pub connection: ConnectionConfig,
    pub dry_run: bool,
    pub verify: bool,
    pub dump_plan: Option<PathBuf>,
    pub report_json: bool,
}

#[derive(Debug, PartialEq)]
pub struct FetchConfig {
    pub connection: ConnectionConfig,
    pub json: bool,
}

#[derive(Debug, Parser)]
#[command(name = "backlog-sync")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Reconcile a declared epic/story backlog against a remote task list, under the API's rate limits"
)]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Compute and print the mutation plan without applying it
    Plan {
        /// Desired-state file (.toml or .json)
        file: PathBuf,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        /// Target collection id (overrides configuration)
        #[arg(short = 'l', long = "collection")]
        collection: Option<String>,
        /// Enable verbose output
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
        /// Write the plan to FILE (.json or .toml)
        #[arg(long = "dump-plan", value_name = "FILE")]
        dump_plan: Option<PathBuf>,
    },
    /// Apply the mutation plan for a desired-state file
    Apply {
        /// Desired-state file (.toml or .json)
        file: PathBuf,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        /// Target collection id (overrides configuration)
        #[arg(short = 'l', long = "collection")]
        collection: Option<String>,
        /// Enable verbose output
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
        /// Plan only, send no mutation
        #[arg(short = 'n', long = "dry-run")]
        dry_run: bool,
        /// Re-fetch afterwards and fail unless the remote converged
        #[arg(long = "verify")]
        verify: bool,
        /// Write the plan to FILE (.json or .toml) before applying
        #[arg(long = "dump-plan", value_name = "FILE")]
        dump_plan: Option<PathBuf>,
        /// Print the run report as JSON
        #[arg(long = "json")]
        json: bool,
    },
    /// Fetch the collection and print its tree
    Fetch {
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        /// Target collection id (overrides configuration)
        #[arg(short = 'l', long = "collection")]
        collection: Option<String>,
        /// Enable verbose output
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
        /// Dump fetched items as JSON
        #[arg(long = "json")]
        json: bool,
    },
    /// Show configuration discovery information
    ShowConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Plan {
                file,
                config,
                collection,
                verbose,
                dump_plan,
            }) => {
                Self::check_desired_file(file)?;
                if let Some(dump) = dump_plan {
                    Self::check_dump_file(dump)?;
                }
                Ok(ExecutionMode::Plan(PlanConfig {
                    desired_file: file.clone(),
                    connection: ConnectionConfig {
                        config_override: config.clone(),
                        collection_override: collection.clone(),
                        verbose: *verbose,
                    },
                    dump_plan: dump_plan.clone(),
                }))
            }
            Some(Commands::Apply {
                file,
                config,
                collection,
                verbose,
                dry_run,
                verify,
                dump_plan,
                json,
            }) => {
                Self::check_desired_file(file)?;
                if let Some(dump) = dump_plan {
                    Self::check_dump_file(dump)?;
                }
                Ok(ExecutionMode::Apply(ApplyConfig {
                    desired_file: file.clone(),
                    connection: ConnectionConfig {
                        config_override: config.clone(),
                        collection_override: collection.clone(),
                        verbose: *verbose,
                    },
                    dry_run: *dry_run,
                    verify: *verify,
                    dump_plan: dump_plan.clone(),
                    report_json: *json,
                }))
            }
            Some(Commands::Fetch {
                config,
                collection,
                verbose,
                json,
            }) => Ok(ExecutionMode::Fetch(FetchConfig {
                connection: ConnectionConfig {
                    config_override: config.clone(),
                    collection_override: collection.clone(),
                    verbose: *verbose,
                },
                json: *json,
            })),
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            None => Err(
                "No command specified. Use 'backlog-sync --help' to see available commands."
                    .to_string(),
            ),
        }
    }

    fn extension(path: &Path) -> String {
        path.extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase()
    }

    fn check_desired_file(path: &Path) -> Result<(), String> {
        match Self::extension(path).as_str() {
            "toml" | "json" => Ok(()),
            _ => Err(format!(
                "Desired-state file {} must be .toml or .json",
                path.display()
            )),
        }
    }

    fn check_dump_file(path: &Path) -> Result<(), String> {
        match Self::extension(path).as_str() {
            "toml" | "json" => Ok(()),
            _ => Err(format!(
                "Plan dump file {} must be .toml or .json",
                path.display()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_command() {
        let args = Args::try_parse_from([
            "backlog-sync",
            "plan",
            "roadmap.toml",
            "--collection",
            "901",
            "--dump-plan",
            "plan.json",
        ])
        .unwrap();

        match args.mode().unwrap() {
            ExecutionMode::Plan(config) => {
                assert_eq!(config.desired_file, PathBuf::from("roadmap.toml"));
                assert_eq!(config.connection.collection_override.as_deref(), Some("901"));
                assert_eq!(config.dump_plan, Some(PathBuf::from("plan.json")));
                assert!(!config.connection.verbose);
            }
            other => panic!("Expected Plan mode, got {:?}", other),
        }
    }

    #[test]
    fn test_apply_command_flags() {
        let args = Args::try_parse_from([
            "backlog-sync",
            "apply",
            "roadmap.json",
            "-c",
            "custom.toml",
            "-v",
            "--verify",
            "--dry-run",
        ])
        .unwrap();

        match args.mode().unwrap() {
            ExecutionMode::Apply(config) => {
                assert!(config.verify);
                assert!(config.dry_run);
                assert!(!config.report_json);
                assert!(config.connection.verbose);
                assert_eq!(
                    config.connection.config_override,
                    Some(PathBuf::from("custom.toml"))
                );
            }
            other => panic!("Expected Apply mode, got {:?}", other),
        }
    }

    #[test]
    fn test_fetch_and_show_config() {
        let args = Args::try_parse_from(["backlog-sync", "fetch", "--json"]).unwrap();
        assert!(matches!(
            args.mode().unwrap(),
            ExecutionMode::Fetch(FetchConfig { json: true, .. })
        ));

        let args = Args::try_parse_from(["backlog-sync", "show-config"]).unwrap();
        assert_eq!(args.mode().unwrap(), ExecutionMode::ShowConfig);
    }

    #[test]
    fn test_rejects_unknown_extensions() {
        let args = Args::try_parse_from(["backlog-sync", "plan", "roadmap.md"]).unwrap();
        assert!(args.mode().unwrap_err().contains(".toml or .json"));

        let args =
            Args::try_parse_from(["backlog-sync", "apply", "roadmap.toml", "--dump-plan", "p.yaml"])
                .unwrap();
        assert!(args.mode().is_err());
    }

    #[test]
    fn test_no_command() {
        let args = Args { command: None };
        assert!(args.mode().is_err());
    }
}
