// src/engine/dependencies.rs

//! Turn a dependency resolution result into CumulusCI steps.
//!
//! Zip dependencies are unpacked under the checkout and deployed one by one;
//! consecutive ordinary dependencies share a single UpdateDependencies step.

use crate::archive::extract_zip;

use anyhow::{Context, Result};
use base64::Engine as _;
use serde_json::{json, Map, Value};
use std::path::Path;

pub const DEPLOY_CLASS: &str = "cumulusci.tasks.salesforce.Deploy";
pub const UPDATE_DEPENDENCIES_CLASS: &str = "cumulusci.tasks.salesforce.UpdateDependencies";

/// A step installing dependencies, run as a CumulusCI task.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyStep {
    pub key: String,
    pub name: String,
    pub description: String,
    pub class_path: String,
    pub options: Map<String, Value>,
}

pub fn prepare_dependencies(
    job_id: &str,
    dependencies: &[Value],
    checkout_root: &Path,
) -> Result<Vec<DependencyStep>> {
    let zip_dir = checkout_root
        .join(".d2x")
        .join("jobs")
        .join(job_id)
        .join("dependencies")
        .join("zip_files");

    let mut steps = Vec::new();
    let mut group: Vec<Value> = Vec::new();
    let mut group_number = 1;

    for dependency in dependencies {
        let Some(encoded) = dependency.get("zip_file").and_then(|v| v.as_str()) else {
            group.push(dependency.clone());
            continue;
        };

        let id = uuid::Uuid::new_v4().to_string();
        let target = zip_dir.join(&id);
        if let Err(err) = unpack(encoded, &target) {
            tracing::warn!(job_id, error = %err, "skipping invalid zip dependency");
            continue;
        }

        flush_group(&mut steps, &mut group, &mut group_number);

        let mut options = Map::new();
        options.insert("path".into(), json!(target.to_string_lossy()));
        for flag in ["unmanaged", "namespace_inject", "namespace_strip"] {
            if let Some(v) = dependency.get(flag) {
                options.insert(flag.into(), v.clone());
            }
        }

        steps.push(DependencyStep {
            key: format!("d2x_dependency_{}", id),
            name: format!("D2X Unmanaged ZipFile Dependency: {}", id),
            description: format!(
                "Unmanaged ZIP file dependency for job {} from D2X resolution.",
                job_id
            ),
            class_path: DEPLOY_CLASS.to_string(),
            options,
        });
    }
    flush_group(&mut steps, &mut group, &mut group_number);

    Ok(steps)
}

fn unpack(encoded: &str, target: &Path) -> Result<()> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .context("zip_file is not valid base64")?;
    extract_zip(&bytes, target)?;
    Ok(())
}

fn flush_group(steps: &mut Vec<DependencyStep>, group: &mut Vec<Value>, number: &mut usize) {
    if group.is_empty() {
        return;
    }

    let mut options = Map::new();
    options.insert("dependencies".into(), Value::Array(std::mem::take(group)));

    steps.push(DependencyStep {
        key: format!("d2x_update_dependencies_{}", number),
        name: "Update Dependencies from D2X Resolution".to_string(),
        description: format!(
            "Update dependencies from D2X resolution for resolution group {}",
            number
        ),
        class_path: UPDATE_DEPENDENCIES_CLASS.to_string(),
        options,
    });
    *number += 1;
}
