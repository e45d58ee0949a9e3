// src/commands/doc.rs

use crate::cli::DocCommand;
use crate::commands::GlobalOpts;
use crate::project::ProjectConfig;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_yaml::Value as YamlValue;
use std::collections::BTreeMap;

const NO_GROUP: &str = "No Group";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskOptionInfo {
    pub name: String,
    pub usage: String,
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskInfo {
    pub task_name: String,
    pub description: Option<String>,
    pub class_path: Option<String>,
    pub command_syntax: String,
    pub options: Vec<TaskOptionInfo>,
}

pub fn handle(command: DocCommand, opts: GlobalOpts) -> Result<()> {
    match command {
        DocCommand::Tasks { groups } => {
            let cwd = std::env::current_dir().context("Failed to read the current directory")?;
            let project = ProjectConfig::discover(&cwd)?;
            let docs = document_tasks(&project.tasks(), &groups);

            if opts.json {
                println!("{}", serde_json::to_string_pretty(&docs)?);
            } else {
                print!("{}", render_tasks(&docs));
            }
            Ok(())
        }
    }
}

/// Group task docs by `group`, keeping only `only_groups` when non-empty.
pub fn document_tasks(
    tasks: &BTreeMap<String, YamlValue>,
    only_groups: &[String],
) -> BTreeMap<String, Vec<TaskInfo>> {
    let mut grouped: BTreeMap<String, Vec<TaskInfo>> = BTreeMap::new();

    for (name, config) in tasks {
        let group = yaml_str(config, "group").unwrap_or_else(|| NO_GROUP.to_string());
        if !only_groups.is_empty() && !only_groups.contains(&group) {
            continue;
        }
        grouped.entry(group).or_default().push(task_info(name, config));
    }
    grouped
}

fn task_info(name: &str, config: &YamlValue) -> TaskInfo {
    let options = match config.get("options") {
        Some(YamlValue::Mapping(map)) => map
            .iter()
            .filter_map(|(k, v)| {
                let option = k.as_str()?;
                Some(TaskOptionInfo {
                    name: option.to_string(),
                    usage: format!("--{} {}", option, option.to_uppercase()),
                    default: yaml_text(v),
                })
            })
            .collect(),
        _ => Vec::new(),
    };

    TaskInfo {
        task_name: name.to_string(),
        description: yaml_str(config, "description"),
        class_path: yaml_str(config, "class_path"),
        command_syntax: format!("cci task run {}", name),
        options,
    }
}

fn yaml_str(config: &YamlValue, key: &str) -> Option<String> {
    config.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn yaml_text(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::Null => None,
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Bool(b) => Some(b.to_string()),
        YamlValue::Number(n) => Some(n.to_string()),
        other => serde_yaml::to_string(other).ok().map(|s| s.trim_end().to_string()),
    }
}

pub fn render_tasks(docs: &BTreeMap<String, Vec<TaskInfo>>) -> String {
    let mut out = String::new();
    for (group, tasks) in docs {
        out.push_str(&format!("{}\n{}\n\n", group, "=".repeat(group.chars().count())));

        for task in tasks {
            out.push_str(&format!("**{}**\n\n", task.task_name));
            if let Some(description) = &task.description {
                out.push_str(&format!("{}\n\n", description));
            }
            if let Some(class_path) = &task.class_path {
                out.push_str(&format!("Class: {}\n", class_path));
            }
            out.push_str(&format!("Command: {}\n", task.command_syntax));

            if !task.options.is_empty() {
                out.push_str("Options:\n");
                for option in &task.options {
                    match &option.default {
                        Some(default) => {
                            out.push_str(&format!("  {}  (default: {})\n", option.usage, default))
                        }
                        None => out.push_str(&format!("  {}\n", option.usage)),
                    }
                }
            }
            out.push('\n');
        }
    }
    out
}
