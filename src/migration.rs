use crate::cf::{Cf, CfError, RestartStrategy};
use crate::exec::Executor;
use std::fmt;
use tracing::{error, info, warn};

/// Where apps are expected to run once restarted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Segment(String),
    Shared,
}

impl Placement {
    fn matches(&self, reported: Option<&str>) -> bool {
        match (self, reported) {
            (Placement::Segment(expected), Some(actual)) => expected == actual,
            (Placement::Shared, None | Some("shared")) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Segment(name) => f.write_str(name),
            Placement::Shared => f.write_str("shared"),
        }
    }
}

pub struct MigrateOptions {
    pub org: String,
    pub space: String,
    pub segment: String,
    pub batch_size: usize,
    pub delay: u64,
    pub apps: Vec<String>,
    pub exclude: Vec<String>,
    pub entitle: bool,
}

pub struct RollbackOptions {
    pub org: String,
    pub space: String,
    /// `None` returns the space to the shared segment.
    pub target_segment: Option<String>,
    pub apps: Vec<String>,
    pub batch_size: usize,
    pub delay: u64,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub total: usize,
    pub migrated: usize,
    pub failed: usize,
    pub failed_apps: Vec<String>,
    /// Restarted, but the reported placement did not confirm the move.
    pub unverified_apps: Vec<String>,
}

impl MigrationReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Move a space onto an isolation segment and restart its apps so they land there.
pub fn migrate(cf: &Cf, exec: &Executor, options: &MigrateOptions) -> Result<MigrationReport, CfError> {
    cf.ensure_logged_in()?;
    require_segment(cf, &options.segment)?;
    require_org_and_space(cf, &options.org, &options.space)?;

    if options.entitle {
        info!(
            "Entitling org {} to isolation segment {}",
            options.org, options.segment
        );
        cf.enable_org_isolation(&options.org, &options.segment)?;
    }

    cf.target(&options.org, &options.space)?;
    info!(
        "Assigning space {} to isolation segment {}",
        options.space, options.segment
    );
    cf.set_space_isolation_segment(&options.space, &options.segment)?;

    let apps = select_apps(cf.list_apps()?, &options.apps, &options.exclude);
    Ok(restart_apps(
        cf,
        exec,
        &apps,
        &Placement::Segment(options.segment.clone()),
        options.batch_size,
        options.delay,
    ))
}

/// Move a space back to shared cells (or onto another segment) and restart its apps.
pub fn rollback(cf: &Cf, exec: &Executor, options: &RollbackOptions) -> Result<MigrationReport, CfError> {
    cf.ensure_logged_in()?;
    if let Some(segment) = &options.target_segment {
        require_segment(cf, segment)?;
    }
    require_org_and_space(cf, &options.org, &options.space)?;
    cf.target(&options.org, &options.space)?;

    let placement = match &options.target_segment {
        Some(segment) => {
            info!("Moving space {} to isolation segment {segment}", options.space);
            cf.set_space_isolation_segment(&options.space, segment)?;
            Placement::Segment(segment.clone())
        }
        None => {
            info!("Resetting space {} to the shared segment", options.space);
            cf.reset_space_isolation_segment(&options.space)?;
            Placement::Shared
        }
    };

    let apps = select_apps(cf.list_apps()?, &options.apps, &[]);
    Ok(restart_apps(
        cf,
        exec,
        &apps,
        &placement,
        options.batch_size,
        options.delay,
    ))
}

fn require_segment(cf: &Cf, segment: &str) -> Result<(), CfError> {
    if !cf.segment_exists(segment)? {
        return Err(CfError::NotFound {
            kind: "Isolation segment",
            name: segment.to_string(),
        });
    }
    Ok(())
}

fn require_org_and_space(cf: &Cf, org: &str, space: &str) -> Result<(), CfError> {
    if !cf.org_exists(org)? {
        return Err(CfError::NotFound {
            kind: "Org",
            name: org.to_string(),
        });
    }
    if !cf.space_exists(org, space)? {
        return Err(CfError::NotFound {
            kind: "Space",
            name: format!("{org}/{space}"),
        });
    }
    Ok(())
}

/// Apply `--apps` (keep only) and `--exclude` to the space's app list,
/// preserving the listed order.
pub fn select_apps(listed: Vec<String>, only: &[String], exclude: &[String]) -> Vec<String> {
    for wanted in only {
        if !listed.contains(wanted) {
            warn!("App {wanted} is not in the space, skipping it");
        }
    }

    listed
        .into_iter()
        .filter(|app| only.is_empty() || only.contains(app))
        .filter(|app| !exclude.contains(app))
        .collect()
}

/// Restart apps one at a time, pausing `delay` seconds after every
/// `batch_size` apps (but not after the last one).
///
/// A failed restart is counted and the loop moves on, so
/// `migrated + failed == total` always holds for the returned report.
pub fn restart_apps(
    cf: &Cf,
    exec: &Executor,
    apps: &[String],
    expected: &Placement,
    batch_size: usize,
    delay: u64,
) -> MigrationReport {
    let batch_size = batch_size.max(1);
    let mut report = MigrationReport {
        total: apps.len(),
        ..MigrationReport::default()
    };

    if apps.is_empty() {
        info!("No apps to restart");
        return report;
    }

    for (index, app) in apps.iter().enumerate() {
        let position = index + 1;
        info!("[{position}/{}] Restarting {app}", apps.len());

        match cf.restart_app(app) {
            Ok(strategy) => {
                report.migrated += 1;
                if strategy == RestartStrategy::Plain {
                    info!("{app} restarted without the rolling strategy");
                }
                if !exec.dry_run() && !placement_confirmed(cf, app, expected) {
                    report.unverified_apps.push(app.clone());
                }
            }
            Err(e) => {
                error!("Failed to restart {app}: {e}");
                report.failed += 1;
                report.failed_apps.push(app.clone());
            }
        }

        if position % batch_size == 0 && position < apps.len() {
            exec.pause(delay);
        }
    }

    report
}

/// Best effort: an unreadable or mismatching placement is only warned about.
fn placement_confirmed(cf: &Cf, app: &str, expected: &Placement) -> bool {
    match cf.app_isolation_segments(app) {
        Ok(reported) if reported.is_empty() => {
            warn!("{app} has no running instances, cannot confirm it runs on {expected}");
            false
        }
        Ok(reported) => {
            let mismatched: Vec<String> = reported
                .iter()
                .filter(|segment| !expected.matches(segment.as_deref()))
                .map(|segment| segment.clone().unwrap_or_else(|| "shared".to_string()))
                .collect();
            if mismatched.is_empty() {
                info!("{app} is running on {expected}");
                true
            } else {
                warn!(
                    "{app} reports isolation segment {} instead of {expected}",
                    mismatched.join(", ")
                );
                false
            }
        }
        Err(e) => {
            warn!("Could not read placement of {app}: {e}");
            false
        }
    }
}

pub fn print_report(title: &str, report: &MigrationReport) {
    println!("{title}");
    println!("  Total apps: {}", report.total);
    println!("  Restarted:  {}", report.migrated);
    println!("  Failed:     {}", report.failed);
    if !report.failed_apps.is_empty() {
        println!("  Failed apps: {}", report.failed_apps.join(", "));
    }
    if !report.unverified_apps.is_empty() {
        println!(
            "  Placement not confirmed: {}",
            report.unverified_apps.join(", ")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::{ScriptedRunner, command_lines};

    const SEGMENTS: &str = "name      orgs\nshared\niso-one   demo\n";
    const ORGS: &str = "name\ndemo\n";
    const SPACES: &str = "name\ndev\n";
    const APPS: &str = "\
name        requested state   processes   routes
app-a       started           web:1/1     a.example.com
app-b       started           web:1/1     b.example.com
app-c       stopped           web:0/1
";

    fn scripted() -> ScriptedRunner {
        ScriptedRunner::new()
            .respond("cf isolation-segments", SEGMENTS)
            .respond("cf orgs", ORGS)
            .respond("cf spaces", SPACES)
            .respond("cf apps", APPS)
    }

    fn migrate_options() -> MigrateOptions {
        MigrateOptions {
            org: "demo".to_string(),
            space: "dev".to_string(),
            segment: "iso-one".to_string(),
            batch_size: 2,
            delay: 0,
            apps: vec![],
            exclude: vec![],
            entitle: true,
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_apps() {
        let listed = strings(&["a", "b", "c"]);
        assert_eq!(select_apps(listed.clone(), &[], &[]), listed);
        assert_eq!(
            select_apps(listed.clone(), &strings(&["c", "a", "zz"]), &[]),
            strings(&["a", "c"])
        );
        assert_eq!(
            select_apps(listed.clone(), &[], &strings(&["b"])),
            strings(&["a", "c"])
        );
        assert_eq!(
            select_apps(listed, &strings(&["a", "b"]), &strings(&["b"])),
            strings(&["a"])
        );
    }

    #[test]
    fn test_placement_matching() {
        let segment = Placement::Segment("iso-one".to_string());
        assert!(segment.matches(Some("iso-one")));
        assert!(!segment.matches(None));
        assert!(!segment.matches(Some("iso-two")));
        assert!(Placement::Shared.matches(None));
        assert!(Placement::Shared.matches(Some("shared")));
        assert!(!Placement::Shared.matches(Some("iso-one")));
    }

    #[test]
    fn test_migrate_counts_failures() {
        let (exec, calls) = scripted()
            .fail("cf restart app-b", "App app-b not found")
            .into_executor(false);
        let cf = Cf::new(&exec, "cf");

        let report = migrate(&cf, &exec, &migrate_options()).unwrap();

        assert_eq!(report.total, 3);
        assert_eq!(report.migrated, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.migrated + report.failed, report.total);
        assert_eq!(report.failed_apps, vec!["app-b"]);
        assert!(!report.is_success());

        let lines = command_lines(&calls);
        assert!(lines.contains(&"cf enable-org-isolation demo iso-one".to_string()));
        assert!(lines.contains(&"cf set-space-isolation-segment dev iso-one".to_string()));
    }

    #[test]
    fn test_migrate_dry_run_runs_no_mutations() {
        let (exec, calls) = scripted().into_executor(true);
        let cf = Cf::new(&exec, "cf");

        let report = migrate(&cf, &exec, &migrate_options()).unwrap();

        assert_eq!(report.migrated, 3);
        for line in command_lines(&calls) {
            assert!(
                !line.contains("restart")
                    && !line.contains("set-space")
                    && !line.contains("enable-org"),
                "unexpected mutation in dry run: {line}"
            );
        }
    }

    #[test]
    fn test_migrate_rejects_unknown_segment() {
        let (exec, _) = scripted().into_executor(false);
        let cf = Cf::new(&exec, "cf");
        let mut options = migrate_options();
        options.segment = "nope".to_string();

        match migrate(&cf, &exec, &options) {
            Err(CfError::NotFound { kind, name }) => {
                assert_eq!(kind, "Isolation segment");
                assert_eq!(name, "nope");
            }
            other => panic!("Expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_migrate_rejects_unknown_space() {
        let (exec, calls) = scripted().into_executor(false);
        let cf = Cf::new(&exec, "cf");
        let mut options = migrate_options();
        options.space = "prod".to_string();

        assert!(matches!(
            migrate(&cf, &exec, &options),
            Err(CfError::NotFound { kind: "Space", .. })
        ));
        assert!(
            !command_lines(&calls)
                .iter()
                .any(|l| l.contains("set-space-isolation-segment"))
        );
    }

    #[test]
    fn test_rollback_without_target_resets_space() {
        let (exec, calls) = scripted().into_executor(false);
        let cf = Cf::new(&exec, "cf");
        let options = RollbackOptions {
            org: "demo".to_string(),
            space: "dev".to_string(),
            target_segment: None,
            apps: strings(&["app-a"]),
            batch_size: 5,
            delay: 0,
        };

        let report = rollback(&cf, &exec, &options).unwrap();

        assert_eq!(report.total, 1);
        let lines = command_lines(&calls);
        assert!(lines.contains(&"cf reset-space-isolation-segment dev".to_string()));
        assert!(lines.contains(&"cf restart app-a --strategy rolling".to_string()));
        assert!(!lines.iter().any(|l| l.contains("restart app-b")));
    }

    fn rollback_options(target_segment: Option<&str>) -> RollbackOptions {
        RollbackOptions {
            org: "demo".to_string(),
            space: "dev".to_string(),
            target_segment: target_segment.map(str::to_string),
            apps: vec![],
            batch_size: 5,
            delay: 0,
        }
    }

    #[test]
    fn test_rollback_to_named_segment() {
        let (exec, calls) = scripted().into_executor(false);
        let cf = Cf::new(&exec, "cf");

        let report = rollback(&cf, &exec, &rollback_options(Some("iso-one"))).unwrap();

        assert_eq!(report.total, 3);
        assert_eq!(report.migrated, 3);
        let lines = command_lines(&calls);
        assert!(lines.contains(&"cf set-space-isolation-segment dev iso-one".to_string()));
        assert!(!lines.iter().any(|l| l.contains("reset-space-isolation-segment")));
    }

    #[test]
    fn test_rollback_to_unknown_segment_changes_nothing() {
        let (exec, calls) = scripted().into_executor(false);
        let cf = Cf::new(&exec, "cf");

        match rollback(&cf, &exec, &rollback_options(Some("iso-nope"))) {
            Err(CfError::NotFound { kind, name }) => {
                assert_eq!(kind, "Isolation segment");
                assert_eq!(name, "iso-nope");
            }
            other => panic!("Expected NotFound, got {other:?}"),
        }
        for line in command_lines(&calls) {
            assert!(
                !line.contains("space-isolation-segment") && !line.contains("restart"),
                "unexpected mutation: {line}"
            );
        }
    }

    #[test]
    fn test_restart_verifies_reported_segment() {
        let (exec, _) = ScriptedRunner::new()
            .respond("cf app app-a --guid", "guid-a")
            .respond(
                "cf curl /v3/apps/guid-a/processes/web/stats",
                r#"{"resources":[{"isolation_segment":"iso-one"}]}"#,
            )
            .respond("cf app app-b --guid", "guid-b")
            .respond(
                "cf curl /v3/apps/guid-b/processes/web/stats",
                r#"{"resources":[{"isolation_segment":null}]}"#,
            )
            .into_executor(false);
        let cf = Cf::new(&exec, "cf");

        let report = restart_apps(
            &cf,
            &exec,
            &strings(&["app-a", "app-b"]),
            &Placement::Segment("iso-one".to_string()),
            1,
            0,
        );

        assert_eq!(report.migrated, 2);
        assert_eq!(report.unverified_apps, vec!["app-b"]);
        assert!(report.is_success());
    }
}
