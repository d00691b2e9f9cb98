use crate::config::env_var;
use crate::exec::{ExecError, Executor, Invocation};
use serde::Deserialize;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum CfError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("Not logged in to Cloud Foundry and CF_API is not set (run 'cf login' or export CF_API, CF_USERNAME, CF_PASSWORD)")]
    NotLoggedIn,
    #[error("Unexpected JSON from 'cf curl {path}': {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
    #[error("Cloud Foundry API error for {path}: {detail}")]
    Api { path: String, detail: String },
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },
}

/// Which restart succeeded for an app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartStrategy {
    Rolling,
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInstance {
    pub isolation_segment: Option<String>,
    pub host: Option<String>,
}

/// Thin wrapper over the `cf` CLI.
pub struct Cf<'a> {
    exec: &'a Executor,
    program: &'a str,
}

impl<'a> Cf<'a> {
    pub fn new(exec: &'a Executor, program: &'a str) -> Self {
        Cf { exec, program }
    }

    fn read<const N: usize>(&self, args: [&str; N]) -> Result<String, CfError> {
        Ok(self.exec.read(Invocation::read(self.program, args))?.stdout)
    }

    fn mutate<const N: usize>(&self, args: [&str; N]) -> Result<(), CfError> {
        self.exec
            .mutate(Invocation::mutating(self.program, args))?;
        Ok(())
    }

    /// Make sure the CLI has a session, logging in from the environment if needed.
    ///
    /// `cf auth` without arguments reads `CF_USERNAME` and `CF_PASSWORD`
    /// itself, so the password never appears in an argument list.
    pub fn ensure_logged_in(&self) -> Result<(), CfError> {
        let target = self.exec.probe(Invocation::read(self.program, ["target"]))?;
        if target.success {
            debug!("Existing cf session is valid");
            return Ok(());
        }

        let Some(api) = env_var("CF_API") else {
            return Err(CfError::NotLoggedIn);
        };

        info!("Logging in to {api}");
        let mut api_args = vec!["api".to_string(), api];
        if env_var("CF_SKIP_SSL_VALIDATION").is_some_and(|v| v == "true" || v == "1") {
            api_args.push("--skip-ssl-validation".to_string());
        }
        self.exec.read(Invocation::read(self.program, api_args))?;
        self.read(["auth"])?;
        Ok(())
    }

    pub fn target_org(&self, org: &str) -> Result<(), CfError> {
        self.read(["target", "-o", org])?;
        Ok(())
    }

    pub fn target(&self, org: &str, space: &str) -> Result<(), CfError> {
        self.read(["target", "-o", org, "-s", space])?;
        Ok(())
    }

    pub fn orgs(&self) -> Result<Vec<String>, CfError> {
        Ok(parse_name_column(&self.read(["orgs"])?))
    }

    pub fn org_exists(&self, org: &str) -> Result<bool, CfError> {
        Ok(self.orgs()?.iter().any(|o| o == org))
    }

    /// Spaces of the currently targeted org.
    pub fn space_exists(&self, org: &str, space: &str) -> Result<bool, CfError> {
        self.target_org(org)?;
        let spaces = parse_name_column(&self.read(["spaces"])?);
        Ok(spaces.iter().any(|s| s == space))
    }

    pub fn isolation_segments(&self) -> Result<Vec<String>, CfError> {
        Ok(parse_name_column(&self.read(["isolation-segments"])?))
    }

    pub fn segment_exists(&self, segment: &str) -> Result<bool, CfError> {
        Ok(self.isolation_segments()?.iter().any(|s| s == segment))
    }

    pub fn create_isolation_segment(&self, segment: &str) -> Result<(), CfError> {
        self.mutate(["create-isolation-segment", segment])
    }

    pub fn enable_org_isolation(&self, org: &str, segment: &str) -> Result<(), CfError> {
        self.mutate(["enable-org-isolation", org, segment])
    }

    /// Requires the space's org to be targeted.
    pub fn set_space_isolation_segment(&self, space: &str, segment: &str) -> Result<(), CfError> {
        self.mutate(["set-space-isolation-segment", space, segment])
    }

    pub fn reset_space_isolation_segment(&self, space: &str) -> Result<(), CfError> {
        self.mutate(["reset-space-isolation-segment", space])
    }

    /// The segment explicitly assigned to a space, `None` when it runs on shared cells.
    pub fn space_isolation_segment(&self, space: &str) -> Result<Option<String>, CfError> {
        let output = self.read(["space", space])?;
        Ok(key_value(&output, "isolation segment"))
    }

    /// Apps in the targeted space, in the order `cf apps` lists them.
    pub fn list_apps(&self) -> Result<Vec<String>, CfError> {
        Ok(parse_name_column(&self.read(["apps"])?))
    }

    /// Restart with zero downtime, falling back to a plain restart when the
    /// rolling strategy is unavailable or fails.
    pub fn restart_app(&self, app: &str) -> Result<RestartStrategy, CfError> {
        let rolling = self.exec.try_mutate(Invocation::mutating(
            self.program,
            ["restart", app, "--strategy", "rolling"],
        ))?;
        if rolling.success {
            return Ok(RestartStrategy::Rolling);
        }

        warn!("Rolling restart of {app} failed, falling back to a plain restart");
        self.mutate(["restart", app])?;
        Ok(RestartStrategy::Plain)
    }

    pub fn app_guid(&self, app: &str) -> Result<String, CfError> {
        let output = self.read(["app", app, "--guid"])?;
        let guid = output.trim();
        if guid.is_empty() {
            return Err(CfError::NotFound {
                kind: "app",
                name: app.to_string(),
            });
        }
        Ok(guid.to_string())
    }

    /// Placement of each web instance as reported by the process stats endpoint.
    pub fn app_instances(&self, app: &str) -> Result<Vec<AppInstance>, CfError> {
        let guid = self.app_guid(app)?;
        let stats: ProcessStats = self.curl(&format!("/v3/apps/{guid}/processes/web/stats"))?;
        Ok(stats
            .resources
            .into_iter()
            .map(|instance| AppInstance {
                isolation_segment: instance.isolation_segment.filter(|s| !s.is_empty()),
                host: instance.host.filter(|h| !h.is_empty()),
            })
            .collect())
    }

    /// The isolation segment each web instance reports (`None` = shared).
    pub fn app_isolation_segments(&self, app: &str) -> Result<Vec<Option<String>>, CfError> {
        Ok(self
            .app_instances(app)?
            .into_iter()
            .map(|i| i.isolation_segment)
            .collect())
    }

    pub fn app_route(&self, app: &str) -> Result<Option<String>, CfError> {
        let output = self.read(["app", app])?;
        Ok(key_value(&output, "routes").and_then(|routes| {
            routes
                .split(',')
                .map(str::trim)
                .find(|r| !r.is_empty())
                .map(str::to_string)
        }))
    }

    pub fn segment_guid(&self, segment: &str) -> Result<String, CfError> {
        let list: Resources<Named> = self.curl(&format!("/v3/isolation_segments?names={segment}"))?;
        list.resources
            .into_iter()
            .find(|s| s.name == segment)
            .map(|s| s.guid)
            .ok_or_else(|| CfError::NotFound {
                kind: "isolation segment",
                name: segment.to_string(),
            })
    }

    pub fn segment_space_guids(&self, segment_guid: &str) -> Result<Vec<String>, CfError> {
        let rel: Relationships = self.curl(&format!(
            "/v3/isolation_segments/{segment_guid}/relationships/spaces"
        ))?;
        Ok(rel.data.into_iter().map(|d| d.guid).collect())
    }

    pub fn segment_org_guids(&self, segment_guid: &str) -> Result<Vec<String>, CfError> {
        let rel: Relationships = self.curl(&format!(
            "/v3/isolation_segments/{segment_guid}/relationships/organizations"
        ))?;
        Ok(rel.data.into_iter().map(|d| d.guid).collect())
    }

    pub fn count_apps_in_spaces(&self, space_guids: &[String]) -> Result<u64, CfError> {
        if space_guids.is_empty() {
            return Ok(0);
        }
        let page: Resources<serde_json::Value> = self.curl(&format!(
            "/v3/apps?space_guids={}&per_page=1",
            space_guids.join(",")
        ))?;
        Ok(page.pagination.map(|p| p.total_results).unwrap_or(0))
    }

    fn curl<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, CfError> {
        let body = self.read(["curl", path])?;
        parse_api_response(path, &body)
    }
}

#[derive(Debug, Deserialize)]
struct Resources<T> {
    #[serde(default = "Vec::new")]
    resources: Vec<T>,
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    total_results: u64,
}

#[derive(Debug, Deserialize)]
struct Named {
    guid: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct Relationships {
    #[serde(default)]
    data: Vec<Guid>,
}

#[derive(Debug, Deserialize)]
struct Guid {
    guid: String,
}

#[derive(Debug, Deserialize)]
struct ProcessStats {
    #[serde(default)]
    resources: Vec<InstanceStats>,
}

#[derive(Debug, Deserialize)]
struct InstanceStats {
    isolation_segment: Option<String>,
    host: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrors {
    errors: Vec<ApiErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEntry {
    detail: String,
}

/// `cf curl` exits zero on API errors, so the body has to be checked for an
/// `errors` array before decoding it as `T`.
fn parse_api_response<T: serde::de::DeserializeOwned>(path: &str, body: &str) -> Result<T, CfError> {
    if let Ok(api_errors) = serde_json::from_str::<ApiErrors>(body)
        && !api_errors.errors.is_empty()
    {
        let detail = api_errors
            .errors
            .into_iter()
            .map(|e| e.detail)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(CfError::Api {
            path: path.to_string(),
            detail,
        });
    }

    serde_json::from_str(body).map_err(|source| CfError::Json {
        path: path.to_string(),
        source,
    })
}

/// Extract the first column of a cf table.
///
/// cf prints tables with a header row starting with `name`, padding each
/// column to a fixed width. The first column therefore spans up to the start
/// of the second header cell, which lets names containing spaces survive.
/// Tables with a single column take the whole line.
pub fn parse_name_column(output: &str) -> Vec<String> {
    let mut lines = output.lines();
    let Some(header) = lines.find(|l| l.starts_with("name") && l.split_whitespace().next() == Some("name"))
    else {
        return Vec::new();
    };

    let second_column = header["name".len()..]
        .find(|c: char| !c.is_whitespace())
        .map(|offset| offset + "name".len());

    lines
        .filter(|l| !l.trim().is_empty())
        .filter_map(|row| {
            let cell = match second_column {
                Some(end) => row.get(..end).unwrap_or_else(|| {
                    row.split_whitespace().next().unwrap_or_default()
                }),
                None => row,
            };
            let cell = cell.trim();
            (!cell.is_empty()).then(|| cell.to_string())
        })
        .collect()
}

/// Value of a `key: value` line in cf's detail views, `None` when absent or empty.
pub fn key_value(output: &str, key: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        if k.trim() != key {
            return None;
        }
        let v = v.trim();
        (!v.is_empty()).then(|| v.to_string())
    })
}
