use crate::bosh::{Bosh, placement_tags};
use crate::cf::Cf;
use crate::exec::ensure_available;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fail => "FAIL",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub checks: Vec<Check>,
}

impl ValidationReport {
    fn record(&mut self, name: &'static str, status: CheckStatus, detail: impl Into<String>) {
        self.checks.push(Check {
            name,
            status,
            detail: detail.into(),
        });
    }

    fn pass(&mut self, name: &'static str, detail: impl Into<String>) {
        self.record(name, CheckStatus::Pass, detail);
    }

    fn warn(&mut self, name: &'static str, detail: impl Into<String>) {
        self.record(name, CheckStatus::Warn, detail);
    }

    fn fail(&mut self, name: &'static str, detail: impl Into<String>) {
        self.record(name, CheckStatus::Fail, detail);
    }

    pub fn failures(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .count()
    }

    pub fn is_healthy(&self) -> bool {
        self.failures() == 0
    }

    pub fn print(&self) {
        for check in &self.checks {
            println!("[{}] {}: {}", check.status, check.name, check.detail);
        }
    }
}

pub struct ValidateTarget<'a> {
    pub segment: &'a str,
    pub deployment: &'a str,
    pub cell_group: &'a str,
}

/// Check that a segment is registered in Cloud Foundry and backed by
/// healthy, correctly tagged cells in BOSH.
///
/// Checks keep going after a failure where they can, so one run reports
/// every problem it is able to see.
pub fn validate(cf: &Cf, bosh: &Bosh, programs: &[&str], target: &ValidateTarget) -> ValidationReport {
    let mut report = ValidationReport::default();

    let missing: Vec<&str> = programs
        .iter()
        .copied()
        .filter(|p| ensure_available(p).is_err())
        .collect();
    if missing.is_empty() {
        report.pass("CLIs", format!("found {}", programs.join(", ")));
    } else {
        report.fail("CLIs", format!("not found: {}", missing.join(", ")));
        return report;
    }

    check_cloud_foundry(cf, target.segment, &mut report);
    check_bosh(bosh, target, &mut report);

    report
}

fn check_cloud_foundry(cf: &Cf, segment: &str, report: &mut ValidationReport) {
    if let Err(e) = cf.ensure_logged_in() {
        report.fail("CF login", e.to_string());
        return;
    }

    match cf.segment_exists(segment) {
        Ok(true) => report.pass("Segment registered", format!("{segment} exists in Cloud Foundry")),
        Ok(false) => {
            report.fail(
                "Segment registered",
                format!("{segment} is not registered (run isoseg register-segment --name {segment})"),
            );
            return;
        }
        Err(e) => {
            report.fail("Segment registered", e.to_string());
            return;
        }
    }

    let guid = match cf.segment_guid(segment) {
        Ok(guid) => guid,
        Err(e) => {
            report.warn("Entitlements", e.to_string());
            return;
        }
    };

    match cf.segment_org_guids(&guid) {
        Ok(orgs) if orgs.is_empty() => report.warn("Entitlements", "no orgs are entitled to the segment"),
        Ok(orgs) => report.pass("Entitlements", format!("{} org(s) entitled", orgs.len())),
        Err(e) => report.warn("Entitlements", e.to_string()),
    }

    match cf.segment_space_guids(&guid) {
        Ok(spaces) if spaces.is_empty() => report.warn("Space assignments", "no spaces assigned yet"),
        Ok(spaces) => report.pass("Space assignments", format!("{} space(s) assigned", spaces.len())),
        Err(e) => report.warn("Space assignments", e.to_string()),
    }
}

fn check_bosh(bosh: &Bosh, target: &ValidateTarget, report: &mut ValidationReport) {
    match bosh.deployment_exists(target.deployment) {
        Ok(true) => report.pass("Deployment", format!("{} exists in BOSH", target.deployment)),
        Ok(false) => {
            report.fail("Deployment", format!("{} not found in BOSH", target.deployment));
            return;
        }
        Err(e) => {
            report.fail("Deployment", e.to_string());
            return;
        }
    }

    match bosh.cells(target.deployment, target.cell_group) {
        Ok(cells) if cells.is_empty() => report.fail(
            "Cells",
            format!("no {} instances in {}", target.cell_group, target.deployment),
        ),
        Ok(cells) => {
            let unhealthy: Vec<String> = cells
                .iter()
                .filter(|c| !c.is_running())
                .map(|c| format!("{} ({})", c.name, c.process_state))
                .collect();
            if unhealthy.is_empty() {
                report.pass("Cells", format!("{} cell(s) running", cells.len()));
            } else {
                report.fail("Cells", format!("not running: {}", unhealthy.join(", ")));
            }
        }
        Err(e) => report.fail("Cells", e.to_string()),
    }

    let tags = bosh
        .manifest(target.deployment)
        .and_then(|manifest| placement_tags(&manifest, target.cell_group));
    match tags {
        Ok(None) => report.fail(
            "Placement tag",
            format!("no rep job found in instance group {}", target.cell_group),
        ),
        Ok(Some(tags)) if tags.iter().any(|t| t == target.segment) => {
            report.pass("Placement tag", format!("cells are tagged {}", target.segment))
        }
        Ok(Some(tags)) if tags.is_empty() => report.fail(
            "Placement tag",
            format!("cells have no placement tag, expected {}", target.segment),
        ),
        Ok(Some(tags)) => report.fail(
            "Placement tag",
            format!(
                "cells are tagged {} but the segment is {}",
                tags.join(", "),
                target.segment
            ),
        ),
        Err(e) => report.fail("Placement tag", e.to_string()),
    }
}
