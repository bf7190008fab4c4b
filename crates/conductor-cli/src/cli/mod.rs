//! CLI command definitions for the `conductor` binary.
//!
//! Uses clap derive macros for argument parsing. Every command takes a
//! workflow file or directory; nothing is persisted between invocations.

pub mod run;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use serde_json::Value;

/// Validate, inspect and run declarative workflows.
#[derive(Parser)]
#[command(name = "conductor", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to $CONDUCTOR_CONFIG, then ~/.conductor/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a workflow file: schema, dependencies, cycles and lint.
    Validate {
        /// Path to the workflow YAML file.
        file: PathBuf,
    },

    /// Print a workflow file in canonical form.
    Fmt {
        /// Path to the workflow YAML file.
        file: PathBuf,

        /// Rewrite the file in place instead of printing it.
        #[arg(long)]
        write: bool,
    },

    /// Show the batched execution plan of a workflow.
    Plan {
        /// Path to the workflow YAML file.
        file: PathBuf,

        /// Print the dependency graph in Graphviz DOT format.
        #[arg(long)]
        dot: bool,
    },

    /// List the workflows in a directory.
    #[command(alias = "ls")]
    List {
        /// Directory to scan (defaults to `workflows_dir` from config, then `.`).
        dir: Option<PathBuf>,
    },

    /// Run a workflow with the built-in echo executor.
    Run {
        /// Path to the workflow YAML file.
        file: PathBuf,

        /// Set a variable (repeatable). Values parse as JSON, else as strings.
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
        vars: Vec<(String, Value)>,

        /// Variables as a JSON object, applied before any --var.
        #[arg(long, value_name = "JSON")]
        vars_json: Option<String>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Parse a `KEY=VALUE` pair.
fn parse_var(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_var_reads_json_values() {
        assert_eq!(parse_var("n=3").unwrap(), ("n".to_string(), json!(3)));
        assert_eq!(parse_var("on=true").unwrap(), ("on".to_string(), json!(true)));
        assert_eq!(parse_var("tags=[\"a\"]").unwrap(), ("tags".to_string(), json!(["a"])));
    }

    #[test]
    fn test_parse_var_falls_back_to_string() {
        assert_eq!(parse_var("name=alice").unwrap(), ("name".to_string(), json!("alice")));
        assert_eq!(parse_var("url=a=b").unwrap(), ("url".to_string(), json!("a=b")));
        assert_eq!(parse_var("empty=").unwrap(), ("empty".to_string(), json!("")));
    }

    #[test]
    fn test_parse_var_rejects_malformed_pairs() {
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=1").is_err());
    }

    #[test]
    fn test_cli_parses_run_with_vars() {
        let cli = Cli::try_parse_from([
            "conductor", "run", "wf.yaml", "--var", "n=2", "--var", "who=bob", "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Run { file, vars, vars_json } => {
                assert_eq!(file, PathBuf::from("wf.yaml"));
                assert_eq!(vars.len(), 2);
                assert!(vars_json.is_none());
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
