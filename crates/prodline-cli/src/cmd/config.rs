use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use prodline_core::config::{Config, WarnLevel};
use prodline_core::{model, ProdlineError};
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Validate the config and feature model for common mistakes
    Validate,
}

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Validate => validate(root, json),
    }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let mut warnings = config.validate();

    // A build cannot start without a loadable model, so it is checked too.
    let model_error = model::load_project_model(root, Some(&config.model))
        .and_then(|m| match &config.build.feature {
            Some(feature) if !m.variables().contains(feature) => {
                Err(ProdlineError::UnknownFeature(feature.clone()))
            }
            _ => Ok(()),
        })
        .err();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
            "model_error": model_error.as_ref().map(|e| e.to_string()),
        });
        print_json(&value)?;
    } else {
        if let Some(e) = &model_error {
            println!("[error] model: {e}");
        }
        if warnings.is_empty() && model_error.is_none() {
            println!("Config is valid. No warnings.");
        }
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    warnings.retain(|w| w.level == WarnLevel::Error);
    if !warnings.is_empty() || model_error.is_some() {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
