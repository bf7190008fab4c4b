//! `conductor run`: execute a workflow with the built-in echo executor.
//!
//! Lifecycle events are printed as they happen; Ctrl+C requests
//! cancellation, which takes effect before the next batch.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::{Map, Value};
use uuid::Uuid;

use conductor_core::workflow::executor::{WorkflowEngine, WorkflowExecutor};
use conductor_types::config::EngineConfig;
use conductor_types::event::WorkflowEvent;
use conductor_types::execution::{StepStatus, WorkflowExecutionResult};

use crate::cli::workflow::load;
use crate::echo::EchoExecutor;

/// Output switches for `run`.
#[derive(Debug, Clone, Copy)]
pub struct RunOutput {
    pub json: bool,
    pub quiet: bool,
}

pub async fn handle_run(
    file: &Path,
    vars: Vec<(String, Value)>,
    vars_json: Option<&str>,
    engine_config: EngineConfig,
    output: RunOutput,
) -> Result<()> {
    let workflow = load(file)?.workflow;
    let variables = merge_variables(vars_json, vars)?;

    let engine = Arc::new(WorkflowEngine::with_config(EchoExecutor, engine_config));
    if !output.json && !output.quiet {
        engine.events().on_any(print_event);
        println!();
        println!(
            "  {} Running '{}'",
            style("▶").cyan().bold(),
            style(&workflow.name).cyan()
        );
    }

    let execution_id = Uuid::now_v7();
    let mut task = {
        let engine = engine.clone();
        let workflow = workflow.clone();
        tokio::spawn(async move {
            engine
                .execute_with_id(&workflow, variables, execution_id)
                .await
        })
    };

    let result = tokio::select! {
        joined = &mut task => joined?,
        _ = tokio::signal::ctrl_c() => {
            if let Err(e) = engine.cancel(execution_id) {
                tracing::debug!(error = %e, "execution finished before cancellation");
            }
            if !output.quiet {
                eprintln!("  {} cancelling after the current batch...", style("!").yellow());
            }
            task.await?
        }
    };

    if output.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if !output.quiet {
        print_summary(&result)?;
    }

    if !result.success {
        bail!(
            "workflow '{}' {}: {}",
            result.workflow_id,
            result.state,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// `--vars-json` first, then each `--var` on top.
fn merge_variables(vars_json: Option<&str>, vars: Vec<(String, Value)>) -> Result<Map<String, Value>> {
    let mut variables = match vars_json {
        Some(raw) => match serde_json::from_str::<Value>(raw).context("Invalid --vars-json")? {
            Value::Object(map) => map,
            other => bail!("--vars-json must be a JSON object, got {other}"),
        },
        None => Map::new(),
    };
    variables.extend(vars);
    Ok(variables)
}

fn print_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::StepStarted { step_id, step_type, .. } => {
            println!("    {} {} ({step_type})", style("→").dim(), step_id);
        }
        WorkflowEvent::StepCompleted {
            step_id,
            duration_ms,
            ..
        } => {
            println!("    {} {step_id} {}", style("✓").green(), style(format!("{duration_ms}ms")).dim());
        }
        WorkflowEvent::StepSkipped { step_id, .. } => {
            println!("    {} {step_id} skipped", style("-").dim());
        }
        WorkflowEvent::StepRetrying {
            step_id,
            attempt,
            max_attempts,
            delay_ms,
            ..
        } => {
            println!(
                "    {} {step_id} attempt {attempt}/{max_attempts} failed, retrying in {delay_ms}ms",
                style("↻").yellow()
            );
        }
        WorkflowEvent::StepFailed {
            step_id,
            error,
            continued,
            ..
        } => {
            let note = if *continued { " (continuing)" } else { "" };
            println!("    {} {step_id}: {error}{note}", style("✗").red());
        }
        WorkflowEvent::WorkflowStarted { .. }
        | WorkflowEvent::WorkflowCompleted { .. }
        | WorkflowEvent::WorkflowFailed { .. } => {}
    }
}

fn print_summary(result: &WorkflowExecutionResult) -> Result<()> {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Attempts"),
            Cell::new("Duration"),
            Cell::new("Error"),
        ]);

    for step in &result.step_results {
        let color = match step.status {
            StepStatus::Completed => Color::Green,
            StepStatus::Failed => Color::Red,
            StepStatus::Cancelled => Color::Yellow,
            _ => Color::Grey,
        };
        table.add_row(vec![
            Cell::new(&step.step_id),
            Cell::new(step.status).fg(color),
            Cell::new(step.attempts),
            Cell::new(format!("{}ms", step.duration_ms)),
            Cell::new(step.error.as_deref().unwrap_or("")),
        ]);
    }

    println!();
    println!("{table}");

    let marker = if result.success {
        style("✓").green().bold()
    } else {
        style("✗").red().bold()
    };
    println!(
        "  {marker} {} in {}ms (execution {})",
        result.state, result.duration_ms, result.execution_id
    );

    if !result.outputs.is_empty() {
        println!();
        println!("  Outputs:");
        println!("{}", serde_json::to_string_pretty(&result.outputs)?);
    }
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    const GREETING: &str = r#"
id: greeting
name: Greeting
variables:
  who: world
outputs:
  message: say.content
steps:
  - id: say
    name: Say
    type: agent
    content: "hello ${variables.who}"
"#;

    const QUIET: RunOutput = RunOutput {
        json: false,
        quiet: true,
    };

    #[test]
    fn test_vars_override_vars_json() {
        let merged = merge_variables(
            Some(r#"{"a": 1, "b": 2}"#),
            vec![("b".to_string(), json!(3))],
        )
        .unwrap();
        assert_eq!(merged.get("a"), Some(&json!(1)));
        assert_eq!(merged.get("b"), Some(&json!(3)));
    }

    #[test]
    fn test_vars_json_must_be_an_object() {
        assert!(merge_variables(Some("[1, 2]"), vec![]).is_err());
        assert!(merge_variables(Some("{oops"), vec![]).is_err());
    }

    #[tokio::test]
    async fn test_run_succeeds_with_echo_executor() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("greeting.yaml");
        fs::write(&path, GREETING).unwrap();

        handle_run(&path, vec![("who".to_string(), json!("bob"))], None, EngineConfig::default(), QUIET)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_fails_on_invalid_workflow() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.yaml");
        fs::write(&path, "id: broken\nname: Broken\nsteps: []\n").unwrap();

        let err = handle_run(&path, vec![], None, EngineConfig::default(), QUIET)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Workflow validation failed"), "got: {err}");
    }
}
