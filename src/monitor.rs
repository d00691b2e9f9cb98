use crate::bosh::{Bosh, BoshError, RepState};
use crate::cf::{Cf, CfError};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Cf(#[from] CfError),
    #[error(transparent)]
    Bosh(#[from] BoshError),
    #[error("Failed to encode snapshot: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub total: u64,
    pub available: u64,
    pub used: u64,
    pub utilization_pct: f64,
}

impl Usage {
    pub fn new(total: u64, available: u64) -> Self {
        let used = total.saturating_sub(available);
        let utilization_pct = if total == 0 {
            0.0
        } else {
            (used as f64 * 1000.0 / total as f64).round() / 10.0
        };
        Usage {
            total,
            available,
            used,
            utilization_pct,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Capacity {
    pub memory_mb: Usage,
    pub disk_mb: Usage,
    pub containers: Usage,
    /// Cells whose rep state contributed to the totals.
    pub cells_sampled: usize,
}

impl Capacity {
    /// Sum the rep state of every sampled cell.
    pub fn sum(states: &[RepState]) -> Self {
        let total = |f: fn(&RepState) -> u64| states.iter().map(f).sum::<u64>();
        Capacity {
            memory_mb: Usage::new(total(|s| s.total.memory_mb), total(|s| s.available.memory_mb)),
            disk_mb: Usage::new(total(|s| s.total.disk_mb), total(|s| s.available.disk_mb)),
            containers: Usage::new(
                total(|s| s.total.containers),
                total(|s| s.available.containers),
            ),
            cells_sampled: states.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppsSummary {
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellsSummary {
    pub count: usize,
    pub running: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub segment: String,
    pub deployment: String,
    pub timestamp: String,
    pub apps: AppsSummary,
    pub cells: CellsSummary,
    pub capacity: Capacity,
}

/// Sample capacity from every running cell of a deployment.
///
/// Cells whose state cannot be read are skipped; `cells_sampled` records how
/// many actually contributed.
pub fn sample_capacity(bosh: &Bosh, deployment: &str, group: &str) -> Result<(CellsSummary, Capacity), BoshError> {
    let cells = bosh.cells(deployment, group)?;
    let running: Vec<_> = cells.iter().filter(|c| c.is_running()).collect();

    let mut states = Vec::with_capacity(running.len());
    for cell in &running {
        match bosh.cell_state(deployment, &cell.name) {
            Ok(state) => states.push(state),
            Err(e) => warn!("Skipping capacity of {}: {e}", cell.name),
        }
    }

    Ok((
        CellsSummary {
            count: cells.len(),
            running: running.len(),
        },
        Capacity::sum(&states),
    ))
}

pub fn collect_snapshot(
    cf: &Cf,
    bosh: &Bosh,
    segment: &str,
    deployment: &str,
    group: &str,
) -> Result<Snapshot, MonitorError> {
    let segment_guid = cf.segment_guid(segment)?;
    let spaces = cf.segment_space_guids(&segment_guid)?;
    debug!("Segment {segment} is assigned to {} space(s)", spaces.len());
    let app_count = cf.count_apps_in_spaces(&spaces)?;

    let (cells, capacity) = sample_capacity(bosh, deployment, group)?;

    Ok(Snapshot {
        segment: segment.to_string(),
        deployment: deployment.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        apps: AppsSummary { count: app_count },
        cells,
        capacity,
    })
}

pub const CSV_HEADER: &str = "timestamp,segment,deployment,apps,cells,cells_running,\
memory_total_mb,memory_available_mb,memory_used_mb,memory_utilization_pct,\
disk_total_mb,disk_available_mb,disk_used_mb,disk_utilization_pct,\
containers_total,containers_available,containers_used,containers_utilization_pct";

fn csv_row(s: &Snapshot) -> String {
    let usage = |u: &Usage| format!("{},{},{},{:.1}", u.total, u.available, u.used, u.utilization_pct);
    format!(
        "{},{},{},{},{},{},{},{},{}",
        s.timestamp,
        csv_field(&s.segment),
        csv_field(&s.deployment),
        s.apps.count,
        s.cells.count,
        s.cells.running,
        usage(&s.capacity.memory_mb),
        usage(&s.capacity.disk_mb),
        usage(&s.capacity.containers),
    )
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn text_block(s: &Snapshot) -> String {
    let usage = |label: &str, u: &Usage| {
        format!(
            "{label:<19}{} used / {} total ({:.1}%), {} available\n",
            u.used, u.total, u.utilization_pct, u.available
        )
    };

    let mut out = String::new();
    out.push_str(&format!(
        "Isolation segment: {} (deployment {})\n",
        s.segment, s.deployment
    ));
    out.push_str(&format!("Timestamp:         {}\n", s.timestamp));
    out.push_str(&format!("Apps:              {}\n", s.apps.count));
    out.push_str(&format!(
        "Cells:             {} ({} running)\n",
        s.cells.count, s.cells.running
    ));
    out.push_str(&usage("Memory (MB):", &s.capacity.memory_mb));
    out.push_str(&usage("Disk (MB):", &s.capacity.disk_mb));
    out.push_str(&usage("Containers:", &s.capacity.containers));
    if s.capacity.cells_sampled < s.cells.count {
        out.push_str(&format!(
            "Capacity covers {} of {} cells\n",
            s.capacity.cells_sampled, s.cells.count
        ));
    }
    out
}

/// Format one snapshot. The CSV header is only written for the first one.
pub fn render(snapshot: &Snapshot, format: OutputFormat, first: bool) -> Result<String, MonitorError> {
    Ok(match format {
        OutputFormat::Text => text_block(snapshot),
        OutputFormat::Json => format!("{}\n", serde_json::to_string_pretty(snapshot)?),
        OutputFormat::Csv if first => format!("{CSV_HEADER}\n{}\n", csv_row(snapshot)),
        OutputFormat::Csv => format!("{}\n", csv_row(snapshot)),
    })
}

pub struct MonitorOptions {
    pub segment: String,
    pub deployment: String,
    pub cell_group: String,
    pub format: OutputFormat,
    /// Seconds between snapshots; `None` takes a single snapshot.
    pub watch: Option<u64>,
    /// Stop after this many snapshots when watching.
    pub iterations: Option<u64>,
}

pub fn run(cf: &Cf, bosh: &Bosh, options: &MonitorOptions, out: &mut impl Write) -> Result<(), MonitorError> {
    let limit = match options.watch {
        None => Some(1),
        Some(_) => options.iterations,
    };

    let mut taken = 0u64;
    loop {
        let snapshot = collect_snapshot(
            cf,
            bosh,
            &options.segment,
            &options.deployment,
            &options.cell_group,
        )?;
        out.write_all(render(&snapshot, options.format, taken == 0)?.as_bytes())?;
        out.flush()?;
        taken += 1;

        if limit.is_some_and(|limit| taken >= limit) {
            return Ok(());
        }
        if options.format == OutputFormat::Text {
            writeln!(out)?;
        }
        std::thread::sleep(Duration::from_secs(options.watch.unwrap_or(0)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bosh::Resources;
    use crate::exec::testing::ScriptedRunner;

    fn state(total_mem: u64, avail_mem: u64) -> RepState {
        RepState {
            available: Resources {
                memory_mb: avail_mem,
                disk_mb: 50_000,
                containers: 200,
            },
            total: Resources {
                memory_mb: total_mem,
                disk_mb: 100_000,
                containers: 250,
            },
        }
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            segment: "iso-one".to_string(),
            deployment: "isolation-segment-iso-one".to_string(),
            timestamp: "2026-10-19T12:00:00Z".to_string(),
            apps: AppsSummary { count: 4 },
            cells: CellsSummary {
                count: 2,
                running: 2,
            },
            capacity: Capacity::sum(&[state(16_000, 12_000), state(16_000, 8_000)]),
        }
    }

    #[test]
    fn test_usage_math() {
        let u = Usage::new(3000, 1000);
        assert_eq!(u.used, 2000);
        assert_eq!(u.utilization_pct, 66.7);
        assert_eq!(Usage::new(0, 0).utilization_pct, 0.0);
        assert_eq!(Usage::new(100, 150).used, 0);
    }

    #[test]
    fn test_capacity_sums_all_cells() {
        let c = snapshot().capacity;
        assert_eq!(c.memory_mb.total, 32_000);
        assert_eq!(c.memory_mb.available, 20_000);
        assert_eq!(c.memory_mb.used, 12_000);
        assert_eq!(c.memory_mb.utilization_pct, 37.5);
        assert_eq!(c.containers.used, 100);
        assert_eq!(c.cells_sampled, 2);
    }

    #[test]
    fn test_json_schema() {
        let json = render(&snapshot(), OutputFormat::Json, true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["segment"], "iso-one");
        assert!(value["timestamp"].is_string());
        assert_eq!(value["apps"]["count"], 4);
        assert_eq!(value["cells"]["count"], 2);
        let memory = &value["capacity"]["memory_mb"];
        for key in ["total", "available", "used", "utilization_pct"] {
            assert!(!memory[key].is_null(), "missing capacity.memory_mb.{key}");
        }
    }

    #[test]
    fn test_csv_header_only_first() {
        let first = render(&snapshot(), OutputFormat::Csv, true).unwrap();
        let next = render(&snapshot(), OutputFormat::Csv, false).unwrap();

        assert!(first.starts_with(CSV_HEADER));
        assert_eq!(first.lines().count(), 2);
        assert_eq!(next.lines().count(), 1);
        let columns = CSV_HEADER.split(',').count();
        assert_eq!(next.trim_end().split(',').count(), columns);
        assert!(next.starts_with("2026-10-19T12:00:00Z,iso-one,"));
    }

    #[test]
    fn test_text_notes_partial_sampling() {
        let mut s = snapshot();
        s.cells.count = 3;
        let text = render(&s, OutputFormat::Text, true).unwrap();
        assert!(text.contains("Cells:             3 (2 running)"));
        assert!(text.contains("Capacity covers 2 of 3 cells"));
    }

    #[test]
    fn test_collect_snapshot_skips_unreadable_cells() {
        let instances = r#"{"Tables":[{"Rows":[
            {"instance":"isolated_diego_cell/a","process_state":"running","az":"z1","ips":"10.0.8.4"},
            {"instance":"isolated_diego_cell/b","process_state":"running","az":"z1","ips":"10.0.8.5"},
            {"instance":"isolated_diego_cell/c","process_state":"stopped","az":"z2","ips":"10.0.9.4"}
        ]}]}"#;
        let rep = r#"{"Tables":[{"Rows":[{"stdout":"{\"AvailableResources\":{\"MemoryMB\":1000,\"DiskMB\":10,\"Containers\":5},\"TotalResources\":{\"MemoryMB\":4000,\"DiskMB\":20,\"Containers\":10}}"}]}]}"#;
        let (exec, _) = ScriptedRunner::new()
            .respond(
                "cf curl /v3/isolation_segments?names=iso-one",
                r#"{"pagination":{"total_results":1},"resources":[{"guid":"seg-guid","name":"iso-one"}]}"#,
            )
            .respond(
                "cf curl /v3/isolation_segments/seg-guid/relationships/spaces",
                r#"{"data":[{"guid":"s1"},{"guid":"s2"}]}"#,
            )
            .respond(
                "cf curl /v3/apps?space_guids=s1,s2&per_page=1",
                r#"{"pagination":{"total_results":7},"resources":[{}]}"#,
            )
            .respond("bosh -d iso instances", instances)
            .respond("bosh -d iso ssh isolated_diego_cell/a", rep)
            .fail("bosh -d iso ssh isolated_diego_cell/b", "ssh: connect refused")
            .into_executor(false);
        let cf = Cf::new(&exec, "cf");
        let bosh = Bosh::new(&exec, "bosh");

        let s = collect_snapshot(&cf, &bosh, "iso-one", "iso", "isolated_diego_cell").unwrap();

        assert_eq!(s.apps.count, 7);
        assert_eq!(s.cells.count, 3);
        assert_eq!(s.cells.running, 2);
        assert_eq!(s.capacity.cells_sampled, 1);
        assert_eq!(s.capacity.memory_mb.used, 3000);
        assert_eq!(s.capacity.memory_mb.utilization_pct, 75.0);
    }
}
