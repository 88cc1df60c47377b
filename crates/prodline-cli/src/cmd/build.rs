use crate::output::{print_fields, print_json, print_table};
use anyhow::Context;
use clap::Args;
use prodline_core::composer::{Composer, ShellComposer};
use prodline_core::config::Config;
use prodline_core::job::{BuildJob, BuildSummary};
use prodline_core::model;
use prodline_core::progress::{format_duration, CancelToken};
use prodline_core::types::{BuildKind, BuildOrder};
use prodline_core::workspace::FsWorkspace;
use prodline_core::worker::BuildRecord;
use std::io::{IsTerminal, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

// ---------------------------------------------------------------------------
// BuildExit: typed non-zero exit codes
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum BuildExit {
    BuildsFailed { failed: usize, attempted: usize },
    Cancelled { built: usize },
}

impl BuildExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildExit::BuildsFailed { .. } => 2,
            BuildExit::Cancelled { .. } => 130,
        }
    }
}

impl std::fmt::Display for BuildExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildExit::BuildsFailed { failed, attempted } => {
                write!(f, "{failed} of {attempted} configuration(s) failed to build")
            }
            BuildExit::Cancelled { built } => {
                write!(f, "build cancelled after {built} configuration(s)")
            }
        }
    }
}

impl std::error::Error for BuildExit {}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Flags override the `build` section of config.yaml.
#[derive(Args)]
pub struct BuildArgs {
    /// all_valid, all_current, t_wise, random or integration
    #[arg(long)]
    kind: Option<BuildKind>,

    /// default, dissimilarity or interaction
    #[arg(long)]
    order: Option<BuildOrder>,

    /// Interaction strength for t-wise sampling
    #[arg(long)]
    t: Option<usize>,

    /// Interaction strength for the interaction ordering
    #[arg(long)]
    t_order: Option<usize>,

    /// T-wise algorithm: chvatal (alias icpl) or incling
    #[arg(long)]
    algorithm: Option<String>,

    /// Upper bound on configurations; zero or less builds nothing
    #[arg(long, allow_hyphen_values = true)]
    max: Option<i64>,

    /// Feature under test for integration builds
    #[arg(long)]
    feature: Option<String>,

    /// Seed for random and IncLing sampling
    #[arg(long)]
    seed: Option<u64>,

    /// Build every variant as a sibling project instead of products/
    #[arg(long)]
    new_projects: bool,

    /// Ask the composer to run each variant's tests
    #[arg(long)]
    run_tests: bool,

    /// Build with this shell command instead of the configured composer
    #[arg(long)]
    command: Option<String>,
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub fn run(root: &Path, args: BuildArgs, json: bool) -> anyhow::Result<()> {
    let mut config = Config::load(root).context("failed to load config")?;
    apply_overrides(&mut config, &args);

    let model = model::load_project_model(root, Some(&config.model))
        .context("failed to load feature model")?;
    let formula = Arc::new(model.formula()?);

    let composer: Arc<dyn Composer> = match &args.command {
        Some(command) => Arc::new(ShellComposer::new(command.clone())),
        None => config.composer.build(),
    };
    let workspace = Arc::new(
        FsWorkspace::new(root, config.classpath.clone()).context("failed to open workspace")?,
    );

    let params = config.build.job_params(model.defaults());
    let mut job = BuildJob::new(params, formula, composer, workspace)
        .context("failed to prepare build")?;
    let records = job.subscribe();
    watch_ctrl_c(job.cancel_token());

    let mut progress = ProgressLine::new(json);
    let summary = job.run(|line| progress.update(line))?;
    progress.finish();

    let mut records: Vec<BuildRecord> = records.try_iter().collect();
    records.sort_by_key(|r| r.index);

    if json {
        print_json(&serde_json::json!({
            "summary": summary,
            "records": records,
        }))?;
    } else {
        print_summary(&summary, &records);
    }

    if summary.cancelled {
        return Err(BuildExit::Cancelled {
            built: summary.built,
        }
        .into());
    }
    if summary.failed > 0 {
        return Err(BuildExit::BuildsFailed {
            failed: summary.failed,
            attempted: summary.built + summary.failed + summary.skipped,
        }
        .into());
    }
    Ok(())
}

fn apply_overrides(config: &mut Config, args: &BuildArgs) {
    let build = &mut config.build;
    if let Some(kind) = args.kind {
        build.kind = kind;
    }
    if let Some(order) = args.order {
        build.order = order;
    }
    if let Some(t) = args.t {
        build.t = t;
    }
    if let Some(t_order) = args.t_order {
        build.t_order = t_order;
    }
    if let Some(algorithm) = &args.algorithm {
        build.algorithm = algorithm.clone();
    }
    if let Some(max) = args.max {
        build.max = Some(max);
    }
    if let Some(feature) = &args.feature {
        build.feature = Some(feature.clone());
    }
    if let Some(seed) = args.seed {
        build.seed = Some(seed);
    }
    build.create_new_projects |= args.new_projects;
    build.run_tests |= args.run_tests;
}

/// Cancel the job on the first Ctrl-C. Builds in flight still finish.
fn watch_ctrl_c(cancel: CancelToken) {
    let spawned = std::thread::Builder::new()
        .name("prodline-signal".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    warn!(error = %e, "cannot listen for Ctrl-C");
                    return;
                }
            };
            if rt.block_on(tokio::signal::ctrl_c()).is_ok() {
                eprintln!("\ncancelling: waiting for builds in flight");
                cancel.cancel();
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "cannot listen for Ctrl-C");
    }
}

// ---------------------------------------------------------------------------
// Progress and summary
// ---------------------------------------------------------------------------

/// Progress on stderr: rewritten in place on a terminal, one line per
/// change of counts otherwise, silent with `--json`.
struct ProgressLine {
    enabled: bool,
    terminal: bool,
    last: String,
}

impl ProgressLine {
    fn new(json: bool) -> Self {
        Self {
            enabled: !json,
            terminal: std::io::stderr().is_terminal(),
            last: String::new(),
        }
    }

    fn update(&mut self, line: &str) {
        if !self.enabled {
            return;
        }
        let mut stderr = std::io::stderr().lock();
        if self.terminal {
            let _ = write!(stderr, "\r\x1b[2K{line}");
            let _ = stderr.flush();
        } else {
            let counts = line.split(" Expected time").next().unwrap_or(line);
            if counts != self.last {
                let _ = writeln!(stderr, "{line}");
                self.last = counts.to_string();
            }
        }
    }

    fn finish(&self) {
        if self.enabled && self.terminal {
            eprintln!();
        }
    }
}

fn print_summary(summary: &BuildSummary, records: &[BuildRecord]) {
    let target = summary
        .target
        .map_or_else(|| "unknown".to_string(), |t| t.to_string());
    print_fields(&[
        ("job", summary.job_id.clone()),
        ("project", summary.project.clone()),
        ("kind", summary.kind.to_string()),
        ("target", target),
        ("built", summary.built.to_string()),
        ("failed", summary.failed.to_string()),
        ("skipped", summary.skipped.to_string()),
        ("elapsed", format_duration(Duration::from_millis(summary.elapsed_ms))),
        ("cancelled", summary.cancelled.to_string()),
    ]);

    let problems: Vec<Vec<String>> = records
        .iter()
        .filter(|r| !r.outcome.is_success())
        .map(|r| {
            vec![
                r.index.to_string(),
                r.worker.to_string(),
                r.outcome.to_string().lines().next().unwrap_or_default().to_string(),
            ]
        })
        .collect();
    if !problems.is_empty() {
        println!();
        print_table(&["VARIANT", "WORKER", "OUTCOME"], &problems);
    }
}
