//! YAML parsing, serialization, and filesystem operations for workflows.
//!
//! Converts between YAML text and `WorkflowDefinition`, attaches file paths
//! and line/column information to errors, runs the dependency checks, and
//! reports advisory lint warnings that never fail a parse.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use conductor_types::workflow::{StepInput, WorkflowDefinition};
use serde_json::Value;
use thiserror::Error;

use super::context::placeholders;
use super::definition::{self, SchemaError};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised while reading or converting a workflow document.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("workflow file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("expected object at root{}", in_file(.path))]
    NotAnObject { path: Option<PathBuf> },

    #[error("YAML syntax error{}{}: {message}", at_location(.line, .column), in_file(.path))]
    Syntax {
        message: String,
        line: Option<usize>,
        column: Option<usize>,
        path: Option<PathBuf>,
    },

    #[error("{source}{}", in_file(.path))]
    Schema {
        #[source]
        source: SchemaError,
        path: Option<PathBuf>,
    },

    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize workflow: {0}")]
    Serialize(String),
}

impl ParseError {
    /// Attach `path` to errors that do not carry one yet.
    pub fn with_path(self, path: &Path) -> Self {
        match self {
            ParseError::NotAnObject { path: None } => ParseError::NotAnObject {
                path: Some(path.to_path_buf()),
            },
            ParseError::Syntax {
                message,
                line,
                column,
                path: None,
            } => ParseError::Syntax {
                message,
                line,
                column,
                path: Some(path.to_path_buf()),
            },
            ParseError::Schema { source, path: None } => ParseError::Schema {
                source,
                path: Some(path.to_path_buf()),
            },
            other => other,
        }
    }

    /// The file this error refers to, if known.
    pub fn path(&self) -> Option<&Path> {
        match self {
            ParseError::NotFound { path } | ParseError::Io { path, .. } => Some(path),
            ParseError::NotAnObject { path }
            | ParseError::Syntax { path, .. }
            | ParseError::Schema { path, .. } => path.as_deref(),
            ParseError::Serialize(_) => None,
        }
    }
}

fn in_file(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" in {}", p.display()))
        .unwrap_or_default()
}

fn at_location(line: &Option<usize>, column: &Option<usize>) -> String {
    match (*line, *column) {
        (Some(line), Some(column)) => format!(" at line {line}, column {column}"),
        (Some(line), None) => format!(" at line {line}"),
        _ => String::new(),
    }
}

/// Errors from `parse_and_validate`: parse failures, or every dependency
/// problem found in an otherwise well-formed definition.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("workflow '{workflow_id}' has invalid dependencies: {}", .errors.join("; "))]
    Dependencies {
        workflow_id: String,
        errors: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Lint
// ---------------------------------------------------------------------------

/// Advisory finding reported by `parse_and_validate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LintWarning {
    /// A step with no dependencies that nothing depends on.
    UnreachableStep { step_id: String },
    /// A declared step output nothing references.
    UnusedOutput { step_id: String, output: String },
}

impl fmt::Display for LintWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LintWarning::UnreachableStep { step_id } => write!(
                f,
                "step '{step_id}' has no dependencies and no dependents"
            ),
            LintWarning::UnusedOutput { step_id, output } => {
                write!(f, "output '{step_id}.{output}' is never referenced")
            }
        }
    }
}

/// A definition that passed schema, dependency and cycle checks.
#[derive(Debug, Clone)]
pub struct ValidatedWorkflow {
    pub workflow: WorkflowDefinition,
    pub warnings: Vec<LintWarning>,
}

/// Run both advisory passes over a definition.
pub fn lint(def: &WorkflowDefinition) -> Vec<LintWarning> {
    let mut warnings = unreachable_steps(def);
    warnings.extend(unused_outputs(def));
    warnings
}

fn unreachable_steps(def: &WorkflowDefinition) -> Vec<LintWarning> {
    let depended_on: HashSet<&str> = def
        .all_steps()
        .flat_map(|s| s.depends_on.iter().map(String::as_str))
        .collect();

    def.all_steps()
        .skip(1)
        .filter(|s| s.depends_on.is_empty() && !depended_on.contains(s.id.as_str()))
        .map(|s| LintWarning::UnreachableStep {
            step_id: s.id.clone(),
        })
        .collect()
}

fn unused_outputs(def: &WorkflowDefinition) -> Vec<LintWarning> {
    let mut warnings = Vec::new();

    for producer in def.all_steps() {
        for output in &producer.outputs {
            let reference = format!("{}.{}", producer.id, output);
            let mentions = |path: &str| {
                path == reference || path.starts_with(&format!("{reference}."))
            };

            let used_by_step = def
                .all_steps()
                .filter(|s| s.id != producer.id)
                .flat_map(|s| s.inputs.values())
                .any(|input| match input {
                    StepInput::Reference { from_step, field } => {
                        from_step == &producer.id
                            && (field == output || field.starts_with(&format!("{output}.")))
                    }
                    StepInput::Template { template } => placeholders(template).any(mentions),
                    StepInput::Literal { .. } => false,
                });

            let used_by_workflow = def.outputs.values().any(|expr| {
                if expr.contains("${") {
                    placeholders(expr).any(mentions)
                } else {
                    mentions(expr.trim())
                }
            });

            if !used_by_step && !used_by_workflow {
                warnings.push(LintWarning::UnusedOutput {
                    step_id: producer.id.clone(),
                    output: output.clone(),
                });
            }
        }
    }

    warnings
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse YAML text into a schema-valid `WorkflowDefinition`.
pub fn parse_yaml(text: &str) -> Result<WorkflowDefinition, ParseError> {
    let raw: Value = serde_yaml_ng::from_str(text).map_err(|e| {
        let location = e.location();
        ParseError::Syntax {
            message: e.to_string(),
            line: location.as_ref().map(|l| l.line()),
            column: location.as_ref().map(|l| l.column()),
            path: None,
        }
    })?;

    if !raw.is_object() {
        return Err(ParseError::NotAnObject { path: None });
    }

    definition::validate(&raw).map_err(|source| ParseError::Schema { source, path: None })
}

/// Read and parse a workflow file.
pub fn parse_file(path: &Path) -> Result<WorkflowDefinition, ParseError> {
    if !path.exists() {
        return Err(ParseError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let text = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_yaml(&text).map_err(|e| e.with_path(path))
}

/// Parse YAML text, then run dependency and cycle checks and lint.
///
/// All dependency problems are reported together.
pub fn parse_and_validate(text: &str) -> Result<ValidatedWorkflow, WorkflowError> {
    check_workflow(parse_yaml(text)?)
}

/// File variant of `parse_and_validate`.
pub fn parse_and_validate_file(path: &Path) -> Result<ValidatedWorkflow, WorkflowError> {
    check_workflow(parse_file(path)?)
}

fn check_workflow(workflow: WorkflowDefinition) -> Result<ValidatedWorkflow, WorkflowError> {
    let mut errors = definition::validate_dependencies(&workflow);
    errors.extend(definition::detect_circular_dependencies(&workflow));
    if !errors.is_empty() {
        return Err(WorkflowError::Dependencies {
            workflow_id: workflow.id,
            errors,
        });
    }

    let warnings = lint(&workflow);
    for warning in &warnings {
        tracing::warn!(workflow_id = %workflow.id, "{warning}");
    }

    Ok(ValidatedWorkflow { workflow, warnings })
}

// ---------------------------------------------------------------------------
// Serialization and filesystem operations
// ---------------------------------------------------------------------------

/// Serialize a definition to YAML in field declaration order.
///
/// Scalars are never folded, so lines may run past 120 columns.
pub fn serialize(def: &WorkflowDefinition) -> Result<String, ParseError> {
    serde_yaml_ng::to_string(def).map_err(|e| ParseError::Serialize(e.to_string()))
}

/// Save a definition to a YAML file, creating parent directories.
pub fn save_file(path: &Path, def: &WorkflowDefinition) -> Result<(), ParseError> {
    let io_error = |source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    let yaml = serialize(def)?;
    std::fs::write(path, yaml).map_err(io_error)
}

/// Load every `*.yaml` / `*.yml` file directly inside `dir`, keyed by id.
///
/// Files are read in name order. A file that fails to parse is logged and
/// skipped. When two files share an id the later one wins. A missing
/// directory yields an empty map.
pub fn load_directory(dir: &Path) -> Result<BTreeMap<String, WorkflowDefinition>, ParseError> {
    let mut workflows = BTreeMap::new();
    if !dir.exists() {
        return Ok(workflows);
    }

    let io_error = |source| ParseError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        let is_yaml = path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if is_yaml && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    for path in paths {
        match parse_file(&path) {
            Ok(def) => {
                if workflows.contains_key(&def.id) {
                    tracing::warn!(
                        path = %path.display(),
                        workflow_id = %def.id,
                        "duplicate workflow id, replacing earlier definition"
                    );
                }
                workflows.insert(def.id.clone(), def);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping invalid workflow file");
            }
        }
    }

    Ok(workflows)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
