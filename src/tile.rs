use crate::checksum::{ChecksumError, verify_file};
use crate::exec::{ExecError, Executor, Invocation};
use serde::Deserialize;
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum TileError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Checksum(#[from] ChecksumError),
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("File not found: {0}")]
    NotFound(PathBuf),
    #[error("No file matching '{glob}' was downloaded to {dir}")]
    NoDownload { dir: PathBuf, glob: String },
    #[error("Unexpected output from '{command}': {detail}")]
    Unexpected { command: String, detail: String },
    #[error("Product {0} is not staged in Ops Manager (run isoseg install-tile first)")]
    NotStaged(String),
    #[error("Failed to render product config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// Tanzu Network slug of the Isolation Segment tile; the replicator ships
/// as a file of the same release.
pub const TILE_SLUG: &str = "p-isolation-segment";
pub const DEFAULT_TILE_GLOB: &str = "p-isolation-segment-*.pivotal";
pub const REPLICATOR_GLOB: &str = "replicator-linux*";

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> TileError + '_ {
    move |source| TileError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Files in `dir` matching the shell-style `pattern`, most recently modified first.
fn find_matching(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, TileError> {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    let full = Path::new(&escaped).join(pattern).to_string_lossy().into_owned();

    let mut found = Vec::new();
    for entry in glob::glob(&full)? {
        let path = entry.map_err(|e| TileError::Io {
            path: e.path().to_path_buf(),
            source: e.into_error(),
        })?;
        if !path.is_file() {
            continue;
        }
        let modified = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(io_error(&path))?;
        found.push((modified, path));
    }
    found.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Thin wrapper over the `pivnet` CLI.
pub struct Pivnet<'a> {
    exec: &'a Executor,
    program: &'a str,
}

impl<'a> Pivnet<'a> {
    pub fn new(exec: &'a Executor, program: &'a str) -> Self {
        Pivnet { exec, program }
    }

    pub fn login(&self, token: &str) -> Result<(), TileError> {
        self.exec.read(Invocation::read(
            self.program,
            ["login".to_string(), format!("--api-token={token}")],
        ))?;
        Ok(())
    }

    /// Download the release files matching `glob`; `None` in dry-run mode.
    pub fn download(
        &self,
        version: &str,
        glob: &str,
        dir: &Path,
    ) -> Result<Option<PathBuf>, TileError> {
        glob::Pattern::new(glob)?;
        if !self.exec.dry_run() {
            std::fs::create_dir_all(dir).map_err(io_error(dir))?;
        }

        self.exec.mutate(Invocation::mutating(
            self.program,
            [
                "download-product-files",
                "--product-slug",
                TILE_SLUG,
                "--release-version",
                version,
                "--glob",
                glob,
                "--download-dir",
                &dir.display().to_string(),
                "--accept-eula",
            ],
        ))?;

        if self.exec.dry_run() {
            return Ok(None);
        }

        let found = find_matching(dir, glob)?;
        if found.len() > 1 {
            warn!(
                "{} files match '{glob}' in {}, using the newest",
                found.len(),
                dir.display()
            );
        }
        found
            .into_iter()
            .next()
            .map(Some)
            .ok_or_else(|| TileError::NoDownload {
                dir: dir.to_path_buf(),
                glob: glob.to_string(),
            })
    }
}

pub struct DownloadOptions {
    pub version: String,
    pub output_dir: PathBuf,
    pub glob: String,
    pub sha256: Option<String>,
}

pub fn download_tile(pivnet: &Pivnet, token: &str, options: &DownloadOptions) -> Result<Option<PathBuf>, TileError> {
    pivnet.login(token)?;
    let Some(path) = pivnet.download(&options.version, &options.glob, &options.output_dir)? else {
        return Ok(None);
    };

    match &options.sha256 {
        Some(expected) => {
            verify_file(&path, expected)?;
            info!("SHA-256 of {} verified", path.display());
        }
        None => warn!("No --sha256 given, {} was not verified", path.display()),
    }
    Ok(Some(path))
}

pub fn download_replicator(
    pivnet: &Pivnet,
    token: &str,
    version: &str,
    output_dir: &Path,
) -> Result<Option<PathBuf>, TileError> {
    pivnet.login(token)?;
    let Some(path) = pivnet.download(version, REPLICATOR_GLOB, output_dir)? else {
        return Ok(None);
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .map_err(io_error(&path))?;
    }
    Ok(Some(path))
}

pub struct ReplicateOptions {
    pub source: PathBuf,
    pub name: String,
    pub output: PathBuf,
}

/// Clone the tile under a new name so several segments can be installed side by side.
pub fn replicate_tile(exec: &Executor, replicator: &str, options: &ReplicateOptions) -> Result<(), TileError> {
    if !options.source.is_file() {
        return Err(TileError::NotFound(options.source.clone()));
    }
    if options.output == options.source {
        return Err(TileError::Unexpected {
            command: "replicate-tile".to_string(),
            detail: "--output must differ from --source".to_string(),
        });
    }
    if let Some(parent) = options.output.parent()
        && !parent.as_os_str().is_empty()
        && !parent.is_dir()
    {
        return Err(TileError::NotFound(parent.to_path_buf()));
    }

    exec.mutate(Invocation::mutating(
        replicator,
        [
            "-name".to_string(),
            options.name.clone(),
            "-path".to_string(),
            options.source.display().to_string(),
            "-output".to_string(),
            options.output.display().to_string(),
        ],
    ))?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StagedProduct {
    pub name: String,
    pub version: String,
}

/// Thin wrapper over the `om` CLI. Credentials come from `OM_TARGET`,
/// `OM_USERNAME` and `OM_PASSWORD`, which om reads itself.
pub struct Om<'a> {
    exec: &'a Executor,
    program: &'a str,
}

impl<'a> Om<'a> {
    pub fn new(exec: &'a Executor, program: &'a str) -> Self {
        Om { exec, program }
    }

    fn metadata(&self, file: &Path, flag: &str) -> Result<String, TileError> {
        let invocation = Invocation::read(
            self.program,
            [
                "product-metadata".to_string(),
                "--product-path".to_string(),
                file.display().to_string(),
                flag.to_string(),
            ],
        );
        let command = invocation.to_string();
        let value = self.exec.read(invocation)?.stdout.trim().to_string();
        if value.is_empty() {
            return Err(TileError::Unexpected {
                command,
                detail: "empty output".to_string(),
            });
        }
        Ok(value)
    }

    /// Product name and version embedded in a `.pivotal` file.
    pub fn product_metadata(&self, file: &Path) -> Result<(String, String), TileError> {
        Ok((
            self.metadata(file, "--product-name")?,
            self.metadata(file, "--product-version")?,
        ))
    }

    pub fn upload_product(&self, file: &Path) -> Result<(), TileError> {
        self.exec.mutate(Invocation::mutating(
            self.program,
            ["upload-product".to_string(), "--product".to_string(), file.display().to_string()],
        ))?;
        Ok(())
    }

    pub fn stage_product(&self, name: &str, version: &str) -> Result<(), TileError> {
        self.exec.mutate(Invocation::mutating(
            self.program,
            ["stage-product", "--product-name", name, "--product-version", version],
        ))?;
        Ok(())
    }

    pub fn staged_products(&self) -> Result<Vec<StagedProduct>, TileError> {
        let invocation = Invocation::read(self.program, ["staged-products", "--format", "json"]);
        let command = invocation.to_string();
        let output = self.exec.read(invocation)?;
        serde_json::from_str(&output.stdout).map_err(|e| TileError::Unexpected {
            command,
            detail: e.to_string(),
        })
    }

    pub fn configure_product(&self, config: &Path) -> Result<(), TileError> {
        self.exec.mutate(Invocation::mutating(
            self.program,
            ["configure-product".to_string(), "--config".to_string(), config.display().to_string()],
        ))?;
        Ok(())
    }

    pub fn apply_changes(&self, product: &str) -> Result<(), TileError> {
        self.exec.mutate(Invocation::mutating(
            self.program,
            ["apply-changes", "--product-name", product],
        ))?;
        Ok(())
    }
}

/// Upload a tile and stage it, returning its product name and version.
pub fn install_tile(om: &Om, file: &Path) -> Result<(String, String), TileError> {
    if !file.is_file() {
        return Err(TileError::NotFound(file.to_path_buf()));
    }

    let (name, version) = om.product_metadata(file)?;
    info!("Uploading {name} {version}");
    om.upload_product(file)?;
    info!("Staging {name} {version}");
    om.stage_product(&name, &version)?;
    Ok((name, version))
}

pub struct SegmentConfig {
    pub product_name: String,
    pub segment: String,
    pub network: String,
    pub azs: Vec<String>,
    pub instances: u32,
    pub vm_type: Option<String>,
}

/// om `configure-product` document for the tile.
///
/// The isolated router and HAProxy groups are scaled to zero so the
/// segment's apps are served by the platform's shared Gorouters.
pub fn render_product_config(config: &SegmentConfig) -> Result<String, TileError> {
    let zone = |name: &String| json!({ "name": name });
    let singleton = config.azs.first().map(zone);

    let document = json!({
        "product-name": config.product_name,
        "product-properties": {
            ".isolated_diego_cell.placement_tag": { "value": config.segment },
        },
        "network-properties": {
            "network": { "name": config.network },
            "singleton_availability_zone": singleton,
            "other_availability_zones": config.azs.iter().map(zone).collect::<Vec<_>>(),
        },
        "resource-config": {
            "isolated_diego_cell": {
                "instances": config.instances,
                "instance_type": { "id": config.vm_type.as_deref().unwrap_or("automatic") },
            },
            "isolated_router": { "instances": 0 },
            "isolated_ha_proxy": { "instances": 0 },
        },
    });

    Ok(serde_yaml::to_string(&document)?)
}

pub struct ConfigureOptions {
    pub segment: SegmentConfig,
    /// Use this om config instead of generating one.
    pub config_file: Option<PathBuf>,
    pub apply: bool,
}

pub fn configure_segment(om: &Om, options: &ConfigureOptions) -> Result<(), TileError> {
    let product = &options.segment.product_name;
    if !om.staged_products()?.iter().any(|p| &p.name == product) {
        return Err(TileError::NotStaged(product.clone()));
    }

    // Kept alive until om has read it.
    let mut generated = None;
    let config_path = match &options.config_file {
        Some(path) if !path.is_file() => return Err(TileError::NotFound(path.clone())),
        Some(path) => path.clone(),
        None => {
            let rendered = render_product_config(&options.segment)?;
            let mut file = tempfile::Builder::new()
                .prefix("isoseg-product-config-")
                .suffix(".yml")
                .tempfile()
                .map_err(io_error(Path::new("product config")))?;
            file.write_all(rendered.as_bytes())
                .map_err(io_error(file.path()))?;
            file.flush().map_err(io_error(file.path()))?;
            let path = file.path().to_path_buf();
            generated = Some(file);
            path
        }
    };

    info!("Configuring {product} from {}", config_path.display());
    om.configure_product(&config_path)?;
    drop(generated);

    if options.apply {
        info!("Applying changes for {product}");
        om.apply_changes(product)?;
    } else {
        info!("Run 'om apply-changes --product-name {product}' (or re-run with --apply) to deploy");
    }
    Ok(())
}
