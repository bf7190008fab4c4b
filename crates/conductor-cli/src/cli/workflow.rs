//! CLI workflow inspection subcommands.
//!
//! Provides validate, fmt, plan and list over workflow YAML files.

use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use conductor_core::workflow::dag::{Batch, build_plan, to_dot};
use conductor_core::workflow::parser::{
    self, ParseError, ValidatedWorkflow, WorkflowError, load_directory, parse_and_validate_file,
};

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub fn handle_validate(file: &Path, json: bool, quiet: bool) -> Result<()> {
    let validated = match parse_and_validate_file(file) {
        Ok(validated) => validated,
        Err(err) => {
            let problems = problems(&err);
            if json {
                let out = serde_json::json!({
                    "valid": false,
                    "file": file.display().to_string(),
                    "errors": problems,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                eprintln!();
                eprintln!(
                    "  {} {} is invalid",
                    style("✗").red().bold(),
                    style(file.display()).cyan()
                );
                for problem in &problems {
                    eprintln!("    - {problem}");
                }
                eprintln!();
            }
            bail!("validation failed with {} problem(s)", problems.len());
        }
    };

    let def = &validated.workflow;
    let warnings: Vec<String> = validated.warnings.iter().map(ToString::to_string).collect();

    if json {
        let out = serde_json::json!({
            "valid": true,
            "file": file.display().to_string(),
            "id": def.id,
            "name": def.name,
            "version": def.version,
            "steps": def.all_steps().count(),
            "warnings": warnings,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if quiet {
        return Ok(());
    }

    println!();
    println!(
        "  {} Workflow '{}' is valid",
        style("✓").green().bold(),
        style(&def.name).cyan()
    );
    println!("  ID: {}", def.id);
    println!("  Version: {}", def.version);
    println!("  Steps: {}", def.all_steps().count());
    for warning in &warnings {
        println!("  {} {warning}", style("warning:").yellow());
    }
    println!();

    Ok(())
}

/// Flatten a validation error into one line per problem.
fn problems(err: &WorkflowError) -> Vec<String> {
    match err {
        WorkflowError::Parse(ParseError::Schema { source, .. }) => {
            source.issues.iter().map(ToString::to_string).collect()
        }
        WorkflowError::Dependencies { errors, .. } => errors.clone(),
        other => vec![other.to_string()],
    }
}

// ---------------------------------------------------------------------------
// Fmt
// ---------------------------------------------------------------------------

pub fn handle_fmt(file: &Path, write: bool, json: bool, quiet: bool) -> Result<()> {
    let ValidatedWorkflow { workflow, .. } = load(file)?;

    if !write {
        print!("{}", parser::serialize(&workflow)?);
        return Ok(());
    }

    parser::save_file(file, &workflow)
        .with_context(|| format!("Failed to write {}", file.display()))?;

    if json {
        let out = serde_json::json!({
            "file": file.display().to_string(),
            "formatted": true,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if !quiet {
        println!(
            "  {} Formatted {}",
            style("*").green().bold(),
            style(file.display()).cyan()
        );
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

pub fn handle_plan(file: &Path, dot: bool, default_concurrency: usize, json: bool) -> Result<()> {
    let ValidatedWorkflow { workflow, .. } = load(file)?;

    if dot {
        println!("{}", to_dot(&workflow));
        return Ok(());
    }

    let plan = build_plan(&workflow)?;

    if json {
        let out: Vec<_> = plan
            .iter()
            .enumerate()
            .map(|(index, batch)| {
                serde_json::json!({
                    "batch": index,
                    "sequential": batch.is_sequential(),
                    "concurrency": concurrency(batch, default_concurrency),
                    "wait_for_all": batch.wait_for_all(),
                    "steps": batch.step_ids(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Batch").fg(Color::Cyan),
            Cell::new("Mode"),
            Cell::new("Steps"),
        ]);

    for (index, batch) in plan.iter().enumerate() {
        let mode = if batch.is_sequential() {
            "sequential".to_string()
        } else {
            let mut mode = format!("pool (max {})", concurrency(batch, default_concurrency));
            if !batch.wait_for_all() {
                mode.push_str(", fail fast");
            }
            mode
        };
        table.add_row(vec![
            Cell::new(index),
            Cell::new(mode),
            Cell::new(batch.step_ids().join(", ")),
        ]);
    }

    println!();
    println!(
        "  {} ({} batch(es))",
        style(&workflow.name).cyan().bold(),
        plan.len()
    );
    println!("{table}");
    println!();

    Ok(())
}

fn concurrency(batch: &Batch<'_>, default: usize) -> usize {
    if batch.is_sequential() {
        1
    } else {
        batch.concurrency_limit(default)
    }
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub fn handle_list(dir: &Path, json: bool) -> Result<()> {
    let defs = load_directory(dir)
        .with_context(|| format!("Failed to scan {}", dir.display()))?;

    if json {
        let out: Vec<_> = defs
            .values()
            .map(|d| {
                serde_json::json!({
                    "id": d.id,
                    "name": d.name,
                    "version": d.version,
                    "steps": d.all_steps().count(),
                    "triggers": d.triggers.len(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if defs.is_empty() {
        println!();
        println!("  No workflows found in {}.", dir.display());
        println!(
            "  Check one with: {}",
            style("conductor validate <file.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Version"),
            Cell::new("Steps"),
            Cell::new("Triggers"),
        ]);

    for d in defs.values() {
        table.add_row(vec![
            Cell::new(&d.id),
            Cell::new(&d.name),
            Cell::new(&d.version),
            Cell::new(d.all_steps().count()),
            Cell::new(d.triggers.len()),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Load and fully validate a workflow file.
pub fn load(file: &Path) -> Result<ValidatedWorkflow> {
    parse_and_validate_file(file).map_err(|e| match e {
        WorkflowError::Parse(ParseError::Syntax { .. }) => {
            anyhow::anyhow!("Failed to parse workflow YAML: {e}")
        }
        WorkflowError::Parse(ParseError::Schema { .. }) | WorkflowError::Dependencies { .. } => {
            anyhow::anyhow!("Workflow validation failed: {e}")
        }
        other => anyhow::anyhow!("Failed to load workflow: {other}"),
    })
}
