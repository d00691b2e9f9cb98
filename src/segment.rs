use crate::bosh::{Bosh, BoshError};
use crate::cf::{Cf, CfError};
use crate::manifest::{ManifestError, SegmentParams, render, validate_segment_name};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Bosh(#[from] BoshError),
    #[error(transparent)]
    Cf(#[from] CfError),
    #[error("Failed to write manifest {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub fn default_deployment(segment: &str) -> String {
    format!("isolation-segment-{segment}")
}

/// Outcome of registering a segment, for the summary line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Registration {
    pub created: bool,
    pub entitled: Vec<String>,
}

/// Create the segment in Cloud Foundry unless it already exists, then
/// entitle each org to it. Safe to re-run.
pub fn register_segment(cf: &Cf, name: &str, orgs: &[String]) -> Result<Registration, SegmentError> {
    validate_segment_name(name)?;
    cf.ensure_logged_in()?;

    let mut registration = Registration::default();
    if cf.segment_exists(name)? {
        info!("Isolation segment {name} is already registered");
    } else {
        info!("Registering isolation segment {name}");
        cf.create_isolation_segment(name)?;
        registration.created = true;
    }

    for org in orgs {
        if !cf.org_exists(org)? {
            return Err(CfError::NotFound {
                kind: "Org",
                name: org.clone(),
            }
            .into());
        }
        info!("Entitling org {org} to {name}");
        cf.enable_org_isolation(org, name)?;
        registration.entitled.push(org.clone());
    }

    Ok(registration)
}

pub struct CreateOptions {
    pub params: SegmentParams,
    /// Keep the rendered manifest here instead of a temporary file.
    pub manifest_out: Option<PathBuf>,
    pub register: bool,
    pub orgs: Vec<String>,
}

fn write_manifest(path: &Path, manifest: &str) -> Result<(), SegmentError> {
    std::fs::write(path, manifest).map_err(|source| SegmentError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Render the cell manifest, deploy it with BOSH and optionally register
/// the segment in Cloud Foundry.
pub fn create_segment(cf: &Cf, bosh: &Bosh, options: &CreateOptions) -> Result<Option<Registration>, SegmentError> {
    let params = &options.params;
    let manifest = render(params)?;

    let deploy = |path: &Path| -> Result<(), SegmentError> {
        info!(
            "Deploying {} cell(s) for {} as {}",
            params.instances, params.name, params.deployment
        );
        bosh.deploy(&params.deployment, path)?;
        Ok(())
    };

    match &options.manifest_out {
        Some(path) => {
            write_manifest(path, &manifest)?;
            info!("Wrote manifest to {}", path.display());
            deploy(path)?;
        }
        None => {
            let mut file = tempfile::Builder::new()
                .prefix("isoseg-manifest-")
                .suffix(".yml")
                .tempfile()
                .map_err(|source| SegmentError::Write {
                    path: std::env::temp_dir(),
                    source,
                })?;
            file.write_all(manifest.as_bytes())
                .and_then(|_| file.flush())
                .map_err(|source| SegmentError::Write {
                    path: file.path().to_path_buf(),
                    source,
                })?;
            deploy(file.path())?;
        }
    }

    if !options.register {
        info!(
            "Cells deployed; run 'isoseg register-segment --name {}' to make the segment available",
            params.name
        );
        return Ok(None);
    }

    Ok(Some(register_segment(cf, &params.name, &options.orgs)?))
}
