#![cfg(unix)]

mod common;

use common::{CF_CASES, FakeClis};
use predicates::prelude::*;

const CF_API_CASES: &str = r#"
  "curl /v3/isolation_segments?names=iso-one") printf '%s\n' '{"resources":[{"guid":"seg-1","name":"iso-one"}]}' ;;
  "curl /v3/isolation_segments/seg-1/relationships/organizations") printf '%s\n' '{"data":[{"guid":"org-1"}]}' ;;
  "curl /v3/isolation_segments/seg-1/relationships/spaces") printf '%s\n' '{"data":[]}' ;;
"#;

fn bosh_cases(placement_tag: &str, cell_state: &str) -> String {
    format!(
        r#"
  "deployments --json") printf '%s\n' '{{"Tables":[{{"Rows":[{{"name":"cf"}},{{"name":"isolation-segment-iso-one"}}]}}]}}' ;;
  "-d isolation-segment-iso-one instances --json") printf '%s\n' '{{"Tables":[{{"Rows":[{{"instance":"isolated_diego_cell/a1","process_state":"{cell_state}","az":"z1","ips":"10.0.8.4"}}]}}]}}' ;;
  "-d isolation-segment-iso-one manifest --json") printf '%s\n' '{{"Blocks":["name: isolation-segment-iso-one\ninstance_groups:\n- name: isolated_diego_cell\n  jobs:\n  - name: rep\n    properties:\n      diego:\n        rep:\n          placement_tags: [{placement_tag}]\n"]}}' ;;
"#
    )
}

fn fakes(placement_tag: &str, cell_state: &str) -> FakeClis {
    FakeClis::new()
        .tool("cf", &format!("{CF_API_CASES}{CF_CASES}"))
        .tool("bosh", &bosh_cases(placement_tag, cell_state))
}

#[test]
fn healthy_segment_passes() {
    let fakes = fakes("iso-one", "running");

    fakes
        .cmd()
        .args(["validate", "--segment", "iso-one"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[PASS] Segment registered"))
        .stdout(predicate::str::contains("[PASS] Placement tag"))
        .stdout(predicate::str::contains("[WARN] Space assignments"))
        .stdout(predicate::str::contains("[FAIL]").not());
}

#[test]
fn placement_tag_mismatch_fails() {
    let fakes = fakes("iso-two", "running");

    fakes
        .cmd()
        .args(["validate", "--segment", "iso-one"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("[FAIL] Placement tag"))
        .stderr(predicate::str::contains("Validation failed"));
}

#[test]
fn unregistered_segment_fails() {
    let fakes = fakes("iso-three", "running");

    fakes
        .cmd()
        .args([
            "validate",
            "--segment",
            "iso-three",
            "--deployment",
            "isolation-segment-iso-one",
        ])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("[FAIL] Segment registered"));
}

#[test]
fn stopped_cell_fails() {
    let fakes = fakes("iso-one", "stopped");

    fakes
        .cmd()
        .args(["validate", "--segment", "iso-one"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("[FAIL] Cells"))
        .stdout(predicate::str::contains("isolated_diego_cell/a1 (stopped)"));
}

#[test]
fn missing_cli_fails_without_running_anything() {
    let fakes = FakeClis::new().tool("cf", CF_CASES);
    let config = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(
        config.path(),
        "[binaries]\nbosh = \"/nonexistent/isoseg-test/bosh\"\n",
    )
    .unwrap();

    fakes
        .cmd()
        .arg("--config")
        .arg(config.path())
        .args(["validate", "--segment", "iso-one"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("[FAIL] CLIs"));

    assert!(fakes.calls().is_empty());
}
