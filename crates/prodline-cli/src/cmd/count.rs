use crate::output::{print_fields, print_json};
use anyhow::Context;
use prodline_core::config::Config;
use prodline_core::model;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let model = model::load_project_model(root, Some(&config.model))
        .context("failed to load feature model")?;
    let formula = model.formula()?;
    let count = formula.count();

    if json {
        print_json(&serde_json::json!({
            "model": model.name,
            "features": model.features.len(),
            "valid_configurations": count,
        }))?;
    } else {
        print_fields(&[
            ("model", model.name.clone()),
            ("features", model.features.len().to_string()),
            ("valid configurations", count.to_string()),
        ]);
    }
    Ok(())
}
