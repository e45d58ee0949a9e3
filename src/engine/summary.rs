// src/engine/summary.rs

//! "Job Summary" table: one row per step with its options.

use crate::output::{cell_text, Table};
use crate::util::crop;

use serde_json::Value;

pub const MAX_OPTION_LENGTH: usize = 30;

/// Render step records (`step_num`, `task_name`, `task_config.options`).
pub fn job_summary_table(steps: &[Value]) -> Table {
    let mut table = Table::new(vec!["Step".into(), "Task Name".into(), "Options".into()])
        .with_title("Job Summary");

    for step in steps {
        let step_num = step
            .get("step_num")
            .or_else(|| step.get("key"))
            .map(cell_text)
            .unwrap_or_default();
        let task_name = step
            .get("task_name")
            .or_else(|| step.get("name"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let options = step
            .get("task_config")
            .and_then(|c| c.get("options"))
            .and_then(|o| o.as_object())
            .map(|opts| {
                opts.iter()
                    .map(|(k, v)| format!("{}: {}", k, crop(&option_text(v), MAX_OPTION_LENGTH)))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();

        table.add_row(vec![step_num, task_name, options]);
    }
    table
}

fn option_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn options_are_cropped() {
        let steps = vec![json!({
            "step_num": "1",
            "task_name": "deploy",
            "task_config": {"options": {"path": "force-app/main/default/classes/really/long", "check_only": true}}
        })];

        let table = job_summary_table(&steps);
        assert_eq!(table.title.as_deref(), Some("Job Summary"));
        let options = &table.rows[0][2];
        assert!(options.starts_with("check_only: true, path: "));
        let path = options.split("path: ").nth(1).unwrap();
        assert_eq!(path.chars().count(), MAX_OPTION_LENGTH);
    }

    #[test]
    fn numeric_step_numbers_render() {
        let table = job_summary_table(&[json!({"step_num": 2, "task_name": "x"})]);
        assert_eq!(table.rows[0], vec!["2", "x", ""]);
    }
}
