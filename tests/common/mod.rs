use assert_cmd::{Command, cargo::cargo_bin_cmd};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Environment variables that would let a developer's real session leak into tests.
const SCRUBBED_ENV: &[&str] = &[
    "CF_API",
    "CF_USERNAME",
    "CF_PASSWORD",
    "CF_SKIP_SSL_VALIDATION",
    "BOSH_ENVIRONMENT",
    "BOSH_CLIENT",
    "BOSH_CLIENT_SECRET",
    "OM_TARGET",
    "OM_USERNAME",
    "OM_PASSWORD",
    "PIVNET_TOKEN",
    "BATCH_SIZE",
    "MIGRATION_DELAY",
    "ISOSEG_CONFIG",
    "RUST_LOG",
];

/// A directory of fake `cf`/`bosh`/`om`/... scripts placed first on PATH.
///
/// Every script appends `<tool> <args>` to a shared log so tests can check
/// which commands ran.
pub struct FakeClis {
    dir: TempDir,
    log: PathBuf,
}

impl FakeClis {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("calls.log");
        fs::write(&log, "").unwrap();
        FakeClis { dir, log }
    }

    /// Install a fake tool. `cases` is the body of a shell `case "$*" in`
    /// block; anything unmatched exits 0 with no output.
    pub fn tool(self, name: &str, cases: &str) -> Self {
        let script = format!(
            "#!/bin/sh\nprintf '%s\\n' \"{name} $*\" >> \"$ISOSEG_FAKE_LOG\"\ncase \"$*\" in\n{cases}\nesac\nexit 0\n"
        );
        let path = self.dir.path().join(name);
        fs::write(&path, script).unwrap();
        make_executable(&path);
        self
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("isoseg");
        for name in SCRUBBED_ENV {
            cmd.env_remove(name);
        }
        let path = std::env::var("PATH").unwrap_or_default();
        cmd.env("PATH", format!("{}:{path}", self.dir.path().display()))
            .env("ISOSEG_FAKE_LOG", &self.log);
        cmd
    }

    /// Command lines the fake tools received, in order.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) {}

// Each integration test file is compiled as its own crate, so helpers unused
// by one of them would otherwise warn.
/// A cf that has a session, knows one org/space/segment and two apps.
#[allow(dead_code)]
pub const CF_CASES: &str = r#"
  "isolation-segments") printf 'name      orgs\nshared\niso-one   demo\n' ;;
  "orgs") printf 'name\ndemo\n' ;;
  "spaces") printf 'name\ndev\n' ;;
  "apps") printf 'name    requested state   processes   routes\napp-a   started           web:1/1     a.example.com\napp-b   started           web:1/1     b.example.com\n' ;;
"#;
