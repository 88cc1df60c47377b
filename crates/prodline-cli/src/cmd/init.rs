use anyhow::Context;
use prodline_core::{config::Config, io, model::FeatureModel, paths};
use std::path::Path;

pub fn run(root: &Path, name: Option<&str>) -> anyhow::Result<()> {
    let project_name = match name {
        Some(name) => {
            paths::validate_name(name)?;
            name.to_string()
        }
        None => default_project_name(root),
    };

    println!("Initializing prodline in: {}", root.display());

    for dir in [paths::PRODLINE_DIR, paths::CONFIGS_DIR] {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    let config_path = paths::config_path(root);
    if config_path.exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
    } else {
        Config::new(&project_name)
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    }

    let model_path = paths::model_path(root);
    if model_path.exists() {
        println!("  exists:  {}", paths::MODEL_FILE);
    } else {
        FeatureModel::example(&project_name)
            .save(&model_path)
            .context("failed to write model.yaml")?;
        println!("  created: {}", paths::MODEL_FILE);
    }

    let products = format!("{}/", paths::PRODUCTS_DIR);
    io::ensure_gitignore_entry(root, &products).context("failed to update .gitignore")?;

    println!("\nEdit {} and run `prodline build`.", paths::MODEL_FILE);
    Ok(())
}

/// Folder name reduced to the characters project names allow.
fn default_project_name(root: &Path) -> String {
    let raw = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches(['.', '-']).replace("..", ".");
    if paths::validate_name(&cleaned).is_ok() {
        cleaned
    } else {
        "product-line".to_string()
    }
}
