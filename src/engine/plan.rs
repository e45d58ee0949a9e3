// src/engine/plan.rs

//! Translate a job's `run` list into CumulusCI command lines.
//!
//! Steps that need a task definition (task classes, option overrides,
//! dependency installs) are registered in the checkout's cumulusci.yml so
//! that every step ends up as a plain `cci task run` / `cci flow run`.

use crate::engine::dependencies::DependencyStep;
use crate::engine::job::{Job, RunStep};

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use serde_yaml::{Mapping, Value as YamlValue};

/// One executable step of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    /// Position in the job, `1`, `2`, `2.1`...
    pub step_num: String,
    pub task_name: String,
    /// Arguments to `cci`.
    pub args: Vec<String>,
    pub options: Map<String, Value>,
}

impl PlannedStep {
    /// Summary record in the same shape the service stores in `Job.steps`.
    pub fn to_summary(&self) -> Value {
        serde_json::json!({
            "step_num": self.step_num,
            "task_name": self.task_name,
            "task_config": { "options": self.options },
        })
    }
}

/// Build the plan, registering synthetic tasks in `cumulusci`.
pub fn build_plan(
    job: &Job,
    cumulusci: &mut YamlValue,
    dependency_steps: &[DependencyStep],
    org_name: &str,
) -> Result<Vec<PlannedStep>> {
    if job.has_plan_version() {
        bail!("Running a job with a plan version is not supported");
    }

    let mut plan = Vec::new();
    for (i, step) in job.run.iter().enumerate() {
        let num = (i + 1).to_string();
        match step.step_type() {
            Some("cumulusci_task_class") => {
                plan.push(task_class_step(cumulusci, step, &num, org_name)?);
            }
            Some("cumulusci_flow") => {
                plan.extend(flow_steps(cumulusci, step, &num, dependency_steps, org_name)?);
            }
            Some("cumulusci_task") => {
                plan.push(task_step(cumulusci, step, &num, org_name)?);
            }
            Some("salesforce_cli") => {
                plan.push(salesforce_cli_step(step, &num, org_name)?);
            }
            other => bail!("Step type {} is not supported", other.unwrap_or("<none>")),
        }
    }
    Ok(plan)
}

fn config_str<'a>(step: &'a RunStep, key: &str) -> Option<&'a str> {
    step.config.get(key).and_then(|v| v.as_str())
}

fn config_options(step: &RunStep) -> Map<String, Value> {
    step.config
        .get("options")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default()
}

fn task_run_args(task: &str, org_name: &str) -> Vec<String> {
    vec![
        "task".into(),
        "run".into(),
        task.to_string(),
        "--org".into(),
        org_name.to_string(),
    ]
}

fn task_class_step(
    cumulusci: &mut YamlValue,
    step: &RunStep,
    num: &str,
    org_name: &str,
) -> Result<PlannedStep> {
    let class_path = config_str(step, "task_path")
        .or_else(|| config_str(step, "task_class"))
        .with_context(|| format!("Step {} has no task_path", num))?;
    let options = config_options(step);
    let task = format!("d2x_step_{}", num.replace('.', "_"));

    register_task(cumulusci, &task, Some(class_path), None, &options)?;

    Ok(PlannedStep {
        step_num: num.to_string(),
        task_name: step.name.clone().unwrap_or_else(|| task.clone()),
        args: task_run_args(&task, org_name),
        options,
    })
}

fn flow_steps(
    cumulusci: &mut YamlValue,
    step: &RunStep,
    num: &str,
    dependency_steps: &[DependencyStep],
    org_name: &str,
) -> Result<Vec<PlannedStep>> {
    let flow = config_str(step, "flow").with_context(|| format!("Step {} has no flow", num))?;
    let mut out = Vec::new();

    for (j, dep) in dependency_steps.iter().enumerate() {
        register_task(
            cumulusci,
            &dep.key,
            Some(&dep.class_path),
            Some(&dep.description),
            &dep.options,
        )?;
        out.push(PlannedStep {
            step_num: format!("{}.{}", num, j + 1),
            task_name: dep.name.clone(),
            args: task_run_args(&dep.key, org_name),
            options: dep.options.clone(),
        });
    }

    let mut args = vec![
        "flow".to_string(),
        "run".into(),
        flow.to_string(),
        "--org".into(),
        org_name.to_string(),
    ];
    if !dependency_steps.is_empty() {
        args.push("--skip".into());
        args.push("update_dependencies".into());
    }

    out.push(PlannedStep {
        step_num: num.to_string(),
        task_name: flow.to_string(),
        args,
        options: Map::new(),
    });
    Ok(out)
}

fn task_step(
    cumulusci: &mut YamlValue,
    step: &RunStep,
    num: &str,
    org_name: &str,
) -> Result<PlannedStep> {
    let task = config_str(step, "task").with_context(|| format!("Step {} has no task", num))?;
    let options = config_options(step);
    let class_path = config_str(step, "task_class");

    if class_path.is_some() || !options.is_empty() {
        register_task(cumulusci, task, class_path, None, &options)?;
    }

    Ok(PlannedStep {
        step_num: num.to_string(),
        task_name: task.to_string(),
        args: task_run_args(task, org_name),
        options,
    })
}

fn salesforce_cli_step(step: &RunStep, num: &str, org_name: &str) -> Result<PlannedStep> {
    let mut command = config_str(step, "command")
        .with_context(|| format!("Step {} has no command", num))?
        .to_string();

    for (name, value) in config_options(step) {
        let flag = if name.chars().count() == 1 {
            format!("-{}", name)
        } else {
            format!("--{}", name.replace('_', "-"))
        };
        let value = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        command.push_str(&format!(" {} \"{}\"", flag, value));
    }

    let mut options = Map::new();
    options.insert("command".into(), Value::String(command.clone()));
    if let Some(desc) = config_str(step, "description").or(step.description.as_deref()) {
        options.insert("description".into(), Value::String(desc.to_string()));
    }

    let mut args = task_run_args("dx", org_name);
    args.extend(["-o".to_string(), "command".to_string(), command]);

    Ok(PlannedStep {
        step_num: num.to_string(),
        task_name: "dx".to_string(),
        args,
        options,
    })
}

/// Add or overlay `tasks.<name>` in cumulusci.yml.
pub fn register_task(
    cumulusci: &mut YamlValue,
    name: &str,
    class_path: Option<&str>,
    description: Option<&str>,
    options: &Map<String, Value>,
) -> Result<()> {
    let tasks = child_mapping(cumulusci, "tasks")?;
    let entry = tasks
        .entry(YamlValue::String(name.to_string()))
        .or_insert(YamlValue::Null);
    let task = as_mapping(entry, name)?;

    if let Some(class_path) = class_path {
        task.insert("class_path".into(), YamlValue::String(class_path.to_string()));
    }
    if let Some(description) = description.filter(|d| !d.is_empty()) {
        task.insert("description".into(), YamlValue::String(description.to_string()));
    }

    if !options.is_empty() {
        let existing = task
            .entry(YamlValue::String("options".into()))
            .or_insert(YamlValue::Null);
        let merged = as_mapping(existing, "options")?;
        for (k, v) in options {
            let v = serde_yaml::to_value(v).context("Failed to convert task option")?;
            merged.insert(YamlValue::String(k.clone()), v);
        }
    }
    Ok(())
}

fn child_mapping<'a>(parent: &'a mut YamlValue, key: &str) -> Result<&'a mut Mapping> {
    let map = as_mapping(parent, "cumulusci.yml")?;
    let child = map
        .entry(YamlValue::String(key.to_string()))
        .or_insert(YamlValue::Null);
    as_mapping(child, key)
}

fn as_mapping<'a>(value: &'a mut YamlValue, what: &str) -> Result<&'a mut Mapping> {
    if value.is_null() {
        *value = YamlValue::Mapping(Mapping::new());
    }
    value
        .as_mapping_mut()
        .with_context(|| format!("`{}` in cumulusci.yml is not a mapping", what))
}
