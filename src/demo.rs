use crate::bosh::{Bosh, BoshError};
use crate::cf::{Cf, CfError};
use crate::exec::{ExecError, Executor, Invocation};
use crate::monitor::{Capacity, sample_capacity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error(transparent)]
    Cf(#[from] CfError),
    #[error(transparent)]
    Bosh(#[from] BoshError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid state file {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("No '{0}' capture in the state file (run isoseg demo capture --phase {0})")]
    MissingPhase(&'static str),
}

pub const DEFAULT_STATE_FILE: &str = "/tmp/isoseg-demo-state.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Phase {
    Before,
    After,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CfLayer {
    pub org: String,
    pub space: String,
    pub space_segment: Option<String>,
    pub app: String,
    pub app_segments: Vec<Option<String>>,
    pub app_hosts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellInfo {
    pub name: String,
    pub process_state: String,
    pub az: String,
    pub ips: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoshLayer {
    pub deployment: String,
    pub cells: Vec<CellInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppEnvLayer {
    pub route: Option<String>,
    pub values: BTreeMap<String, String>,
}

/// Everything captured at one point of the walkthrough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    pub captured_at: String,
    pub segment: String,
    pub cf_cli: CfLayer,
    pub bosh: BoshLayer,
    pub capacity: Option<Capacity>,
    pub app_env: AppEnvLayer,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DemoState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<PhaseState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<PhaseState>,
}

impl DemoState {
    /// Load the state file; a missing file is an empty state.
    pub fn load(path: &Path) -> Result<Self, DemoError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(DemoState::default()),
            Err(source) => {
                return Err(DemoError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&content).map_err(|source| DemoError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write atomically: temporary file in the same directory, then rename.
    pub fn save(&self, path: &Path) -> Result<(), DemoError> {
        let io = |source| DemoError::Io {
            path: path.to_path_buf(),
            source,
        };
        let content = serde_json::to_string_pretty(self).map_err(|source| DemoError::Json {
            path: path.to_path_buf(),
            source,
        })?;

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut temp_file = tempfile::NamedTempFile::new_in(parent).map_err(io)?;
        temp_file.write_all(content.as_bytes()).map_err(io)?;
        temp_file.write_all(b"\n").map_err(io)?;
        temp_file.as_file().sync_all().map_err(io)?;
        temp_file.persist(path).map_err(|e| io(e.error))?;
        Ok(())
    }

    pub fn set(&mut self, phase: Phase, state: PhaseState) {
        match phase {
            Phase::Before => self.before = Some(state),
            Phase::After => self.after = Some(state),
        }
    }
}

/// Scrape `KEY:   value` lines from the cf-env app's root page.
pub fn parse_cf_env(body: &str) -> BTreeMap<String, String> {
    body.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let key = key.trim();
            let is_env_name = !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
            is_env_name.then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

pub struct CaptureTarget {
    pub org: String,
    pub space: String,
    pub app: String,
    pub segment: String,
    pub deployment: String,
    pub cell_group: String,
}

/// Record the four observation layers: what cf reports, what BOSH runs,
/// cell capacity, and what the app itself sees.
///
/// Capacity and the app's environment are best effort; the cf and BOSH
/// layers are required.
pub fn capture(
    cf: &Cf,
    bosh: &Bosh,
    exec: &Executor,
    curl: &str,
    target: &CaptureTarget,
) -> Result<PhaseState, DemoError> {
    cf.ensure_logged_in()?;
    cf.target(&target.org, &target.space)?;

    let instances = cf.app_instances(&target.app)?;
    let cf_cli = CfLayer {
        org: target.org.clone(),
        space: target.space.clone(),
        space_segment: cf.space_isolation_segment(&target.space)?,
        app: target.app.clone(),
        app_segments: instances
            .iter()
            .map(|i| i.isolation_segment.clone())
            .collect(),
        app_hosts: instances.iter().filter_map(|i| i.host.clone()).collect(),
    };

    let bosh_layer = BoshLayer {
        deployment: target.deployment.clone(),
        cells: bosh
            .cells(&target.deployment, &target.cell_group)?
            .into_iter()
            .map(|i| CellInfo {
                name: i.name,
                process_state: i.process_state,
                az: i.az,
                ips: i.ips,
            })
            .collect(),
    };

    let capacity = match sample_capacity(bosh, &target.deployment, &target.cell_group) {
        Ok((_, capacity)) => Some(capacity),
        Err(e) => {
            warn!("Capacity layer unavailable: {e}");
            None
        }
    };

    let route = cf.app_route(&target.app)?;
    let values = match &route {
        Some(route) => match exec.read(Invocation::read(
            curl,
            ["-s", "--max-time", "10", &format!("https://{route}/")],
        )) {
            Ok(output) => parse_cf_env(&output.stdout),
            Err(e) => {
                warn!("App environment layer unavailable: {e}");
                BTreeMap::new()
            }
        },
        None => {
            warn!("{} has no route, skipping the app environment layer", target.app);
            BTreeMap::new()
        }
    };

    Ok(PhaseState {
        captured_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        segment: target.segment.clone(),
        cf_cli,
        bosh: bosh_layer,
        capacity,
        app_env: AppEnvLayer { route, values },
    })
}

pub fn capture_into(path: &Path, phase: Phase, state: PhaseState) -> Result<(), DemoError> {
    let mut demo = DemoState::load(path)?;
    demo.set(phase, state);
    demo.save(path)?;
    info!("Saved {phase:?} capture to {}", path.display());
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDiff {
    pub layer: &'static str,
    pub changes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub layers: Vec<LayerDiff>,
    /// Whether the app's instance IP after the move belongs to a segment cell.
    pub placement_confirmed: Option<bool>,
}

fn segment_label(segment: &Option<String>) -> &str {
    segment.as_deref().unwrap_or("shared")
}

fn change<T: PartialEq + std::fmt::Display>(label: &str, before: T, after: T, out: &mut Vec<String>) {
    if before != after {
        out.push(format!("{label}: {before} -> {after}"));
    }
}

fn join_segments(segments: &[Option<String>]) -> String {
    if segments.is_empty() {
        return "none running".to_string();
    }
    segments
        .iter()
        .map(segment_label)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn compare(state: &DemoState) -> Result<Comparison, DemoError> {
    let before = state.before.as_ref().ok_or(DemoError::MissingPhase("before"))?;
    let after = state.after.as_ref().ok_or(DemoError::MissingPhase("after"))?;

    let mut cf_changes = Vec::new();
    change(
        "space isolation segment",
        segment_label(&before.cf_cli.space_segment),
        segment_label(&after.cf_cli.space_segment),
        &mut cf_changes,
    );
    change(
        "app instance segments",
        join_segments(&before.cf_cli.app_segments),
        join_segments(&after.cf_cli.app_segments),
        &mut cf_changes,
    );

    let mut bosh_changes = Vec::new();
    change(
        "cells",
        before.bosh.cells.len(),
        after.bosh.cells.len(),
        &mut bosh_changes,
    );
    let names = |layer: &BoshLayer| -> Vec<String> { layer.cells.iter().map(|c| c.name.clone()).collect() };
    let (before_names, after_names) = (names(&before.bosh), names(&after.bosh));
    for added in after_names.iter().filter(|n| !before_names.contains(n)) {
        bosh_changes.push(format!("added {added}"));
    }
    for removed in before_names.iter().filter(|n| !after_names.contains(n)) {
        bosh_changes.push(format!("removed {removed}"));
    }

    let mut capacity_changes = Vec::new();
    match (&before.capacity, &after.capacity) {
        (Some(b), Some(a)) => {
            change(
                "memory used (MB)",
                b.memory_mb.used,
                a.memory_mb.used,
                &mut capacity_changes,
            );
            change(
                "containers used",
                b.containers.used,
                a.containers.used,
                &mut capacity_changes,
            );
        }
        _ => capacity_changes.push("not captured in both phases".to_string()),
    }

    let mut env_changes = Vec::new();
    let keys: std::collections::BTreeSet<&String> = before
        .app_env
        .values
        .keys()
        .chain(after.app_env.values.keys())
        .collect();
    for key in keys {
        let value = |layer: &AppEnvLayer| layer.values.get(key).cloned().unwrap_or_default();
        change(key, value(&before.app_env), value(&after.app_env), &mut env_changes);
    }

    let instance_ip = after.app_env.values.get("CF_INSTANCE_IP");
    let placement_confirmed =
        instance_ip.map(|ip| after.bosh.cells.iter().any(|c| c.ips.contains(ip)));

    Ok(Comparison {
        layers: vec![
            LayerDiff {
                layer: "cf_cli",
                changes: cf_changes,
            },
            LayerDiff {
                layer: "bosh",
                changes: bosh_changes,
            },
            LayerDiff {
                layer: "capacity",
                changes: capacity_changes,
            },
            LayerDiff {
                layer: "app_env",
                changes: env_changes,
            },
        ],
        placement_confirmed,
    })
}

pub fn print_comparison(comparison: &Comparison) {
    for layer in &comparison.layers {
        println!("[{}]", layer.layer);
        if layer.changes.is_empty() {
            println!("  no change");
        }
        for change in &layer.changes {
            println!("  {change}");
        }
    }
    match comparison.placement_confirmed {
        Some(true) => println!("Placement: app instance runs on an isolation segment cell"),
        Some(false) => println!("Placement: app instance IP is not one of the segment's cells"),
        None => println!("Placement: unknown (no CF_INSTANCE_IP captured)"),
    }
}
