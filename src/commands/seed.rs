// src/commands/seed.rs

//! `d2x test seed-data`: Snowfakery output posted to D2X Cloud.

use crate::api::{fk_field_to_model, get_d2x_api_client, ApiObject, D2xApiClient, Parents};
use crate::toolchain::{Invocation, SystemToolchain, Toolchain};
use crate::util::read_to_string;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;

const REPO_PLACEHOLDER: &str = "GITHUB_REPO_ID";

pub async fn seed_data(recipe: &Path, repo: &str, output: &Path) -> Result<()> {
    let client = get_d2x_api_client().await?;
    let records = generate(&SystemToolchain, recipe, output).await?;

    for (table, id) in post_records(&client, &records, repo).await? {
        println!("Created {} with ID {}", table, id);
    }
    Ok(())
}

/// Run Snowfakery and read back the generated records.
pub async fn generate(tools: &dyn Toolchain, recipe: &Path, output: &Path) -> Result<Vec<Value>> {
    let inv = Invocation::new(
        "snowfakery",
        [
            recipe.display().to_string(),
            "--output-format".to_string(),
            "json".to_string(),
            "--output-file".to_string(),
            output.display().to_string(),
        ],
    );
    tools
        .run_checked(&inv, false)
        .await
        .context("Snowfakery failed to generate data")?;

    let raw = read_to_string(output)?;
    match serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {:?}", output))? {
        Value::Array(records) => Ok(records),
        _ => bail!("Expected a list of records in {:?}", output),
    }
}

/// Create each record in order, rewriting local integer ids to the UUIDs
/// returned for earlier records. Returns `(table, id)` per created record.
pub async fn post_records(
    client: &D2xApiClient,
    records: &[Value],
    repo: &str,
) -> Result<Vec<(String, String)>> {
    let mut id_map: HashMap<String, HashMap<i64, String>> = HashMap::new();
    let mut created = Vec::new();

    for record in records {
        let table = record
            .get("_table")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Record without a _table: {}", record))?;
        let obj = ApiObject::from_model_name(table)
            .ok_or_else(|| anyhow!("Unknown D2X Cloud object '{}'", table))?;

        let data = prepare_record(record, repo, &id_map)?;

        let mut parents = Parents::new();
        if obj == ApiObject::PlanVersion {
            let plan_id = data
                .get("plan_id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!("PlanVersion record has no plan_id"))?;
            parents.insert("plan_id".to_string(), plan_id.to_string());
        }

        let response = client
            .create(obj, &Value::Object(data), Some(&parents), None)
            .await
            .with_context(|| format!("Failed to create {}", table))?;
        let id = response
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("D2X Cloud returned no id for {}", table))?
            .to_string();

        if let Some(local_id) = record.get("id").and_then(|v| v.as_i64()) {
            id_map
                .entry(table.to_string())
                .or_default()
                .insert(local_id, id.clone());
        }
        created.push((table.to_string(), id));
    }
    Ok(created)
}

fn prepare_record(
    record: &Value,
    repo: &str,
    id_map: &HashMap<String, HashMap<i64, String>>,
) -> Result<Map<String, Value>> {
    let mut data = Map::new();
    let Some(fields) = record.as_object() else {
        bail!("Record is not an object: {}", record);
    };

    for (field, value) in fields {
        if field == "id" || field == "_table" {
            continue;
        }
        if field == "repo_id" && value.as_str() == Some(REPO_PLACEHOLDER) {
            data.insert(field.clone(), Value::String(repo.to_string()));
            continue;
        }

        let mut value = value.clone();
        if let (true, Some(local)) = (field.ends_with("_id"), value.as_i64()) {
            let model = fk_field_to_model(field);
            if let Some(ids) = id_map.get(&model) {
                let uuid = ids.get(&local).ok_or_else(|| {
                    anyhow!("{} {} was not created before it was referenced", model, local)
                })?;
                value = Value::String(uuid.clone());
            }
        }
        data.insert(field.clone(), value);
    }
    Ok(data)
}
