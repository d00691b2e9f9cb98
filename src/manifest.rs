use serde::Serialize;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error(
        "Invalid segment name '{0}' (use lowercase letters, digits and dashes, not starting with a dash)"
    )]
    InvalidName(String),
    #[error("'shared' is the name of the built-in shared segment")]
    ReservedName,
    #[error("At least one availability zone is required (--az or defaults.azs in the config file)")]
    NoAzs,
    #[error("Cell count must be at least 1")]
    NoInstances,
    #[error("Failed to render manifest: {0}")]
    Render(#[from] serde_yaml::Error),
}

/// Preset cell sizes, mapped onto cf-deployment cloud-config names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CellSize {
    Small,
    Medium,
    Large,
}

impl CellSize {
    pub fn vm_type(self) -> &'static str {
        match self {
            CellSize::Small => "small-highmem",
            CellSize::Medium => "medium-highmem",
            CellSize::Large => "large-highmem",
        }
    }

    pub fn vm_extension(self) -> &'static str {
        match self {
            CellSize::Small => "50GB_ephemeral_disk",
            CellSize::Medium | CellSize::Large => "100GB_ephemeral_disk",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentParams {
    pub name: String,
    pub deployment: String,
    pub cell_size: CellSize,
    pub instances: u32,
    pub azs: Vec<String>,
    pub network: String,
    /// Overrides the cell size's VM type.
    pub vm_type: Option<String>,
    /// Deployment providing NATS, BBS and loggregator links.
    pub cf_deployment: String,
    pub stemcell_os: String,
    pub instance_group: String,
}

pub fn validate_segment_name(name: &str) -> Result<(), ManifestError> {
    if name == "shared" {
        return Err(ManifestError::ReservedName);
    }
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if name.is_empty() || name.starts_with('-') || !valid_chars {
        return Err(ManifestError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[derive(Serialize)]
struct Manifest {
    name: String,
    releases: Vec<Release>,
    stemcells: Vec<Stemcell>,
    update: Update,
    instance_groups: Vec<InstanceGroup>,
}

#[derive(Serialize)]
struct Release {
    name: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct Stemcell {
    alias: &'static str,
    os: String,
    version: &'static str,
}

#[derive(Serialize)]
struct Update {
    canaries: u32,
    max_in_flight: &'static str,
    canary_watch_time: &'static str,
    update_watch_time: &'static str,
    serial: bool,
}

#[derive(Serialize)]
struct InstanceGroup {
    name: String,
    azs: Vec<String>,
    instances: u32,
    vm_type: String,
    vm_extensions: Vec<&'static str>,
    stemcell: &'static str,
    networks: Vec<Network>,
    jobs: Vec<Job>,
}

#[derive(Serialize)]
struct Network {
    name: String,
}

#[derive(Serialize)]
struct Job {
    name: &'static str,
    release: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    consumes: Option<serde_json::Value>,
    properties: serde_json::Value,
}

const RELEASES: &[&str] = &["diego", "garden-runc", "cflinuxfs4", "loggregator-agent"];

/// Render the BOSH manifest for a segment's Diego cells.
///
/// Cells join the existing platform through cross-deployment links and rely
/// on the shared Gorouters (a cell-local route emitter registers routes), so
/// no router instance group is generated.
pub fn render(params: &SegmentParams) -> Result<String, ManifestError> {
    validate_segment_name(&params.name)?;
    if params.azs.is_empty() {
        return Err(ManifestError::NoAzs);
    }
    if params.instances == 0 {
        return Err(ManifestError::NoInstances);
    }

    let from_cf = |link: &str| json!({ "from": link, "deployment": params.cf_deployment });

    let jobs = vec![
        Job {
            name: "rep",
            release: "diego",
            consumes: None,
            properties: json!({
                "diego": {
                    "rep": {
                        "placement_tags": [params.name],
                        "preloaded_rootfses": ["cflinuxfs4:/var/vcap/packages/cflinuxfs4/rootfs.tar"],
                    },
                },
            }),
        },
        Job {
            name: "garden",
            release: "garden-runc",
            consumes: None,
            properties: json!({
                "garden": {
                    "destroy_containers_on_start": true,
                    "default_container_grace_time": 0,
                    "deny_networks": ["0.0.0.0/0"],
                },
            }),
        },
        Job {
            name: "cflinuxfs4-rootfs-setup",
            release: "cflinuxfs4",
            consumes: None,
            properties: json!({}),
        },
        Job {
            name: "route_emitter",
            release: "diego",
            consumes: Some(json!({ "nats-tls": from_cf("nats-tls") })),
            properties: json!({
                "diego": { "route_emitter": { "local_mode": true } },
            }),
        },
        Job {
            name: "loggregator_agent",
            release: "loggregator-agent",
            consumes: Some(json!({ "doppler": from_cf("doppler") })),
            properties: json!({}),
        },
    ];

    let manifest = Manifest {
        name: params.deployment.clone(),
        releases: RELEASES
            .iter()
            .map(|&name| Release {
                name,
                version: "latest",
            })
            .collect(),
        stemcells: vec![Stemcell {
            alias: "default",
            os: params.stemcell_os.clone(),
            version: "latest",
        }],
        update: Update {
            canaries: 1,
            max_in_flight: "20%",
            canary_watch_time: "30000-1200000",
            update_watch_time: "30000-1200000",
            serial: false,
        },
        instance_groups: vec![InstanceGroup {
            name: params.instance_group.clone(),
            azs: params.azs.clone(),
            instances: params.instances,
            vm_type: params
                .vm_type
                .clone()
                .unwrap_or_else(|| params.cell_size.vm_type().to_string()),
            vm_extensions: vec![params.cell_size.vm_extension()],
            stemcell: "default",
            networks: vec![Network {
                name: params.network.clone(),
            }],
            jobs,
        }],
    };

    Ok(serde_yaml::to_string(&manifest)?)
}
