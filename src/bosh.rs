use crate::exec::{ExecError, Executor, Invocation};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum BoshError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("Unexpected JSON from 'bosh {command}': {source}")]
    Json {
        command: String,
        source: serde_json::Error,
    },
    #[error("Invalid manifest YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("'bosh {command}' returned no {what}")]
    Missing {
        command: String,
        what: &'static str,
    },
}

/// Port the rep serves its resource state on, reachable from the cell itself.
const REP_STATE_COMMAND: &str = "curl -s localhost:1800/state";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// `group/id`, for example `isolated_diego_cell/4f1c...`.
    pub name: String,
    pub process_state: String,
    pub az: String,
    pub ips: Vec<String>,
}

impl Instance {
    pub fn group(&self) -> &str {
        self.name.split('/').next().unwrap_or(&self.name)
    }

    pub fn is_running(&self) -> bool {
        self.process_state == "running"
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resources {
    #[serde(rename = "MemoryMB")]
    pub memory_mb: u64,
    #[serde(rename = "DiskMB")]
    pub disk_mb: u64,
    pub containers: u64,
}

/// Resource state a Diego cell's rep reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RepState {
    #[serde(rename = "AvailableResources")]
    pub available: Resources,
    #[serde(rename = "TotalResources")]
    pub total: Resources,
}

/// The `--json` envelope every bosh command prints.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Tables", default)]
    tables: Option<Vec<Table>>,
    #[serde(rename = "Blocks", default)]
    blocks: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct Table {
    #[serde(rename = "Rows", default)]
    rows: Option<Vec<BTreeMap<String, serde_json::Value>>>,
}

impl Envelope {
    fn rows(self) -> Vec<BTreeMap<String, serde_json::Value>> {
        self.tables
            .unwrap_or_default()
            .into_iter()
            .flat_map(|t| t.rows.unwrap_or_default())
            .collect()
    }
}

fn cell(row: &BTreeMap<String, serde_json::Value>, key: &str) -> String {
    match row.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Thin wrapper over the `bosh` CLI.
pub struct Bosh<'a> {
    exec: &'a Executor,
    program: &'a str,
}

impl<'a> Bosh<'a> {
    pub fn new(exec: &'a Executor, program: &'a str) -> Self {
        Bosh { exec, program }
    }

    fn read_json(&self, args: Vec<String>) -> Result<Envelope, BoshError> {
        let command = args.join(" ");
        let mut args = args;
        args.push("--json".to_string());
        let output = self.exec.read(Invocation::read(self.program, args))?;
        serde_json::from_str(&output.stdout).map_err(|source| BoshError::Json { command, source })
    }

    pub fn deployments(&self) -> Result<Vec<String>, BoshError> {
        let envelope = self.read_json(vec!["deployments".to_string()])?;
        Ok(envelope
            .rows()
            .iter()
            .map(|row| cell(row, "name"))
            .filter(|name| !name.is_empty())
            .collect())
    }

    pub fn deployment_exists(&self, deployment: &str) -> Result<bool, BoshError> {
        Ok(self.deployments()?.iter().any(|d| d == deployment))
    }

    pub fn instances(&self, deployment: &str) -> Result<Vec<Instance>, BoshError> {
        let envelope = self.read_json(vec![
            "-d".to_string(),
            deployment.to_string(),
            "instances".to_string(),
        ])?;
        Ok(parse_instances(envelope.rows()))
    }

    /// Instances belonging to the Diego cell instance group.
    pub fn cells(&self, deployment: &str, group: &str) -> Result<Vec<Instance>, BoshError> {
        Ok(self
            .instances(deployment)?
            .into_iter()
            .filter(|i| i.group() == group)
            .collect())
    }

    pub fn manifest(&self, deployment: &str) -> Result<String, BoshError> {
        let args = vec![
            "-d".to_string(),
            deployment.to_string(),
            "manifest".to_string(),
        ];
        let command = args.join(" ");
        let envelope = self.read_json(args)?;
        envelope
            .blocks
            .filter(|b| !b.is_empty())
            .map(|b| b.concat())
            .ok_or(BoshError::Missing {
                command,
                what: "manifest",
            })
    }

    pub fn deploy(&self, deployment: &str, manifest: &Path) -> Result<(), BoshError> {
        self.exec.mutate(Invocation::mutating(
            self.program,
            [
                "-n".to_string(),
                "-d".to_string(),
                deployment.to_string(),
                "deploy".to_string(),
                manifest.display().to_string(),
            ],
        ))?;
        Ok(())
    }

    /// Ask one cell's rep for its resource state over `bosh ssh`.
    pub fn cell_state(&self, deployment: &str, instance: &str) -> Result<RepState, BoshError> {
        let args = vec![
            "-d".to_string(),
            deployment.to_string(),
            "ssh".to_string(),
            instance.to_string(),
            "-c".to_string(),
            REP_STATE_COMMAND.to_string(),
            "--results".to_string(),
        ];
        let command = format!("-d {deployment} ssh {instance}");
        let envelope = self.read_json(args)?;
        let stdout = envelope
            .rows()
            .first()
            .map(|row| cell(row, "stdout"))
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| BoshError::Missing {
                command: command.clone(),
                what: "rep state",
            })?;
        debug!("Rep state of {instance}: {}", stdout.trim());
        parse_rep_state(&stdout).map_err(|source| BoshError::Json { command, source })
    }
}

fn parse_instances(rows: Vec<BTreeMap<String, serde_json::Value>>) -> Vec<Instance> {
    rows.iter()
        .map(|row| Instance {
            name: cell(row, "instance"),
            process_state: cell(row, "process_state"),
            az: cell(row, "az"),
            ips: cell(row, "ips")
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        })
        .filter(|i| !i.name.is_empty())
        .collect()
}

/// The rep's JSON may be preceded by ssh banner noise; decode from the first `{`.
fn parse_rep_state(stdout: &str) -> Result<RepState, serde_json::Error> {
    let start = stdout.find('{').unwrap_or(0);
    let end = stdout.rfind('}').map(|i| i + 1).unwrap_or(stdout.len());
    serde_json::from_str(&stdout[start..end.max(start)])
}

/// Placement tags configured on the rep job of an instance group, or `None`
/// when the group has no rep job.
pub fn placement_tags(manifest: &str, group: &str) -> Result<Option<Vec<String>>, BoshError> {
    let doc: serde_yaml::Value = serde_yaml::from_str(manifest)?;

    let Some(groups) = doc.get("instance_groups").and_then(|g| g.as_sequence()) else {
        return Ok(None);
    };

    let rep = groups
        .iter()
        .filter(|g| g.get("name").and_then(|n| n.as_str()) == Some(group))
        .filter_map(|g| g.get("jobs").and_then(|j| j.as_sequence()))
        .flatten()
        .find(|job| job.get("name").and_then(|n| n.as_str()) == Some("rep"));

    let Some(rep) = rep else {
        return Ok(None);
    };

    let tags = rep
        .get("properties")
        .and_then(|p| p.get("diego"))
        .and_then(|d| d.get("rep"))
        .and_then(|r| r.get("placement_tags"))
        .and_then(|t| t.as_sequence())
        .map(|seq| {
            seq.iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Ok(Some(tags))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::{ScriptedRunner, command_lines};

    const INSTANCES: &str = r#"{
  "Tables": [
    {
      "Content": "instances",
      "Header": {"instance": "Instance", "process_state": "Process State", "az": "AZ", "ips": "IPs"},
      "Rows": [
        {"instance": "isolated_diego_cell/4f1c0c0e", "process_state": "running", "az": "z1", "ips": "10.0.8.4"},
        {"instance": "isolated_diego_cell/9a2d7e11", "process_state": "failing", "az": "z2", "ips": "10.0.9.4"},
        {"instance": "route_emitter/0a1b", "process_state": "running", "az": "z1", "ips": "10.0.8.5"}
      ],
      "Notes": null
    }
  ],
  "Blocks": null,
  "Lines": ["Using environment '10.0.0.6' as client 'admin'", "Succeeded"]
}"#;

    const MANIFEST: &str = r#"
name: isolation-segment-iso-one
instance_groups:
- name: isolated_diego_cell
  jobs:
  - name: garden
    release: garden-runc
  - name: rep
    release: diego
    properties:
      diego:
        rep:
          placement_tags: [iso-one]
- name: other
  jobs: []
"#;

    #[test]
    fn test_cells_filters_by_group() {
        let (exec, calls) = ScriptedRunner::new()
            .respond("bosh -d iso instances --json", INSTANCES)
            .into_executor(false);
        let bosh = Bosh::new(&exec, "bosh");

        let cells = bosh.cells("iso", "isolated_diego_cell").unwrap();
        assert_eq!(cells.len(), 2);
        assert!(cells[0].is_running());
        assert!(!cells[1].is_running());
        assert_eq!(cells[1].ips, vec!["10.0.9.4"]);
        assert_eq!(command_lines(&calls), vec!["bosh -d iso instances --json"]);
    }

    #[test]
    fn test_deployments() {
        let json = r#"{"Tables":[{"Rows":[{"name":"cf-1234","team_s":""},{"name":"iso-one"}]}],"Blocks":null}"#;
        let (exec, _) = ScriptedRunner::new()
            .respond("bosh deployments", json)
            .into_executor(false);
        let bosh = Bosh::new(&exec, "bosh");

        assert!(bosh.deployment_exists("iso-one").unwrap());
        assert!(!bosh.deployment_exists("iso").unwrap());
    }

    #[test]
    fn test_manifest_is_read_from_blocks() {
        let json = r#"{"Tables":null,"Blocks":["---\nname: iso\n"],"Lines":[]}"#;
        let (exec, _) = ScriptedRunner::new()
            .respond("bosh -d iso manifest", json)
            .into_executor(false);
        let bosh = Bosh::new(&exec, "bosh");

        assert_eq!(bosh.manifest("iso").unwrap(), "---\nname: iso\n");
    }

    #[test]
    fn test_cell_state_parses_ssh_results() {
        let json = r#"{"Tables":[{"Rows":[{"instance":"isolated_diego_cell/4f1c","stdout":"{\"AvailableResources\":{\"MemoryMB\":12000,\"DiskMB\":80000,\"Containers\":240},\"TotalResources\":{\"MemoryMB\":16000,\"DiskMB\":100000,\"Containers\":250},\"CellID\":\"4f1c\"}\r\n","exit_code":"0"}]}]}"#;
        let (exec, _) = ScriptedRunner::new()
            .respond("bosh -d iso ssh isolated_diego_cell/4f1c", json)
            .into_executor(false);
        let bosh = Bosh::new(&exec, "bosh");

        let state = bosh.cell_state("iso", "isolated_diego_cell/4f1c").unwrap();
        assert_eq!(state.available.memory_mb, 12000);
        assert_eq!(state.total.containers, 250);
    }

    #[test]
    fn test_cell_state_without_output_is_an_error() {
        let json = r#"{"Tables":[{"Rows":[{"instance":"isolated_diego_cell/4f1c","stdout":"","exit_code":"7"}]}]}"#;
        let (exec, _) = ScriptedRunner::new()
            .respond("bosh -d iso ssh", json)
            .into_executor(false);
        let bosh = Bosh::new(&exec, "bosh");

        assert!(matches!(
            bosh.cell_state("iso", "isolated_diego_cell/4f1c"),
            Err(BoshError::Missing { .. })
        ));
    }

    #[test]
    fn test_placement_tags() {
        assert_eq!(
            placement_tags(MANIFEST, "isolated_diego_cell").unwrap(),
            Some(vec!["iso-one".to_string()])
        );
        assert_eq!(placement_tags(MANIFEST, "other").unwrap(), None);
        assert_eq!(placement_tags(MANIFEST, "missing").unwrap(), None);
    }

    #[test]
    fn test_deploy_is_skipped_in_dry_run() {
        let (exec, calls) = ScriptedRunner::new().into_executor(true);
        let bosh = Bosh::new(&exec, "bosh");

        bosh.deploy("iso", Path::new("/tmp/manifest.yml")).unwrap();
        assert!(calls.borrow().is_empty());
    }
}
