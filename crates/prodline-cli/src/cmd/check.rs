use crate::output::print_json;
use anyhow::Context;
use prodline_core::config::Config;
use prodline_core::configuration::Configuration;
use prodline_core::model::{self, Formula};
use std::path::Path;

pub fn run(root: &Path, file: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let model = model::load_project_model(root, Some(&config.model))
        .context("failed to load feature model")?;
    let formula = model.formula()?;

    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let configuration = Configuration::parse_config_text(formula.variables(), &text)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    let valid = formula.is_valid(&configuration);
    let selected = configuration.selected_names(formula.variables());

    if json {
        print_json(&serde_json::json!({
            "file": file,
            "valid": valid,
            "selected": selected,
        }))?;
    } else {
        let verdict = if valid { "valid" } else { "invalid" };
        println!("{}: {verdict}", file.display());
        println!("  selected: {}", selected.join(", "));
    }

    if !valid {
        anyhow::bail!("{} violates the feature model", file.display());
    }
    Ok(())
}
