use crate::demo::{DEFAULT_STATE_FILE, Phase};
use crate::manifest::CellSize;
use crate::monitor::OutputFormat;
use crate::tile::{DEFAULT_TILE_GLOB, TILE_SLUG};
use clap::{ArgAction, Parser, Subcommand, ValueEnum, value_parser};
use std::path::PathBuf;

mod help_text;

/// Manage Cloud Foundry isolation segments
#[derive(Parser, Debug)]
#[command(name = "isoseg", version, about, long_about = help_text::ROOT_LONG_ABOUT)]
pub struct Cli {
    /// Log mutating commands instead of running them
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Increase logging (-v info, -vv debug). Takes precedence over RUST_LOG.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Set the log level explicitly. Takes precedence over RUST_LOG.
    #[arg(
        long,
        value_name = "LEVEL",
        global = true,
        conflicts_with = "verbose"
    )]
    pub log_level: Option<LogLevel>,

    /// Also write logs, without colours, to this file
    #[arg(long, value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// TOML file with binary paths and defaults
    #[arg(long, value_name = "PATH", env = "ISOSEG_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Deploy Diego cells for a new isolation segment with BOSH
    CreateSegment {
        /// Segment name, also used as the cells' placement tag
        #[arg(long)]
        name: String,

        #[arg(long, value_enum, default_value_t = CellSize::Medium)]
        cell_size: CellSize,

        /// Number of cells
        #[arg(long, default_value_t = 1)]
        count: u32,

        /// BOSH deployment name [default: isolation-segment-<NAME>]
        #[arg(long)]
        deployment: Option<String>,

        /// Availability zone (repeatable)
        #[arg(long = "az", value_name = "AZ")]
        azs: Vec<String>,

        #[arg(long)]
        network: Option<String>,

        /// VM type overriding the one implied by --cell-size
        #[arg(long)]
        vm_type: Option<String>,

        /// Deployment providing NATS and loggregator links
        #[arg(long, default_value = "cf")]
        cf_deployment: String,

        /// Register the segment in Cloud Foundry once the cells are up
        #[arg(long)]
        register: bool,

        /// Org to entitle when registering (repeatable)
        #[arg(long = "org", value_name = "ORG", requires = "register")]
        orgs: Vec<String>,

        /// Keep the rendered manifest at this path
        #[arg(long, value_name = "PATH")]
        manifest_out: Option<PathBuf>,
    },

    /// Register an isolation segment in Cloud Foundry and entitle orgs to it
    RegisterSegment {
        #[arg(long)]
        name: String,

        /// Org to entitle (repeatable)
        #[arg(long = "org", value_name = "ORG")]
        orgs: Vec<String>,
    },

    /// Move a space onto an isolation segment and restart its apps
    #[command(long_about = help_text::MIGRATE_LONG_ABOUT)]
    Migrate {
        #[arg(long)]
        org: String,

        #[arg(long)]
        space: String,

        #[arg(long)]
        segment: String,

        /// Apps restarted between pauses [default: 5]
        #[arg(long, env = "BATCH_SIZE")]
        batch_size: Option<usize>,

        /// Seconds to pause between batches [default: 30]
        #[arg(long, env = "MIGRATION_DELAY")]
        delay: Option<u64>,

        /// Only restart these apps (comma separated)
        #[arg(long, value_delimiter = ',')]
        apps: Vec<String>,

        /// Never restart these apps (comma separated)
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,

        /// Entitle the org to the segment first
        #[arg(long)]
        entitle: bool,
    },

    /// Move a space back to shared cells (or another segment) and restart its apps
    Rollback {
        #[arg(long)]
        org: String,

        #[arg(long)]
        space: String,

        /// Segment to move to instead of the shared cells
        #[arg(long)]
        target_segment: Option<String>,

        /// Only restart these apps (comma separated)
        #[arg(long, value_delimiter = ',')]
        apps: Vec<String>,

        #[arg(long, env = "BATCH_SIZE")]
        batch_size: Option<usize>,

        #[arg(long, env = "MIGRATION_DELAY")]
        delay: Option<u64>,
    },

    /// Report apps, cells and capacity of an isolation segment
    #[command(long_about = help_text::MONITOR_LONG_ABOUT)]
    Monitor {
        #[arg(long)]
        segment: String,

        /// BOSH deployment name [default: isolation-segment-<SEGMENT>]
        #[arg(long)]
        deployment: Option<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,

        /// Take a snapshot every SECS seconds until interrupted
        #[arg(long, value_name = "SECS", value_parser = value_parser!(u64).range(1..))]
        watch: Option<u64>,

        /// Stop after N snapshots when watching
        #[arg(
            long,
            value_name = "N",
            requires = "watch",
            value_parser = value_parser!(u64).range(1..)
        )]
        iterations: Option<u64>,
    },

    /// Check that a segment is registered, deployed and correctly tagged
    #[command(long_about = help_text::VALIDATE_LONG_ABOUT)]
    Validate {
        #[arg(long)]
        segment: String,

        /// BOSH deployment name [default: isolation-segment-<SEGMENT>]
        #[arg(long)]
        deployment: Option<String>,
    },

    /// Download the isolation segment tile from the Broadcom support portal
    DownloadTile {
        /// Release version, for example 6.0.4
        #[arg(long)]
        version: String,

        #[arg(long, value_name = "DIR", default_value = ".")]
        output_dir: PathBuf,

        #[arg(long, default_value = DEFAULT_TILE_GLOB)]
        glob: String,

        /// Expected SHA-256 of the downloaded file
        #[arg(long)]
        sha256: Option<String>,
    },

    /// Download the replicator tool
    DownloadReplicator {
        #[arg(long)]
        version: String,

        #[arg(long, value_name = "DIR", default_value = ".")]
        output_dir: PathBuf,
    },

    /// Clone the tile under a new name for an additional segment
    ReplicateTile {
        #[arg(long, value_name = "FILE")]
        source: PathBuf,

        /// Name of the replicated segment
        #[arg(long)]
        name: String,

        #[arg(long, value_name = "FILE")]
        output: PathBuf,

        /// Path to the replicator binary
        #[arg(long, value_name = "PATH")]
        replicator: Option<String>,
    },

    /// Upload and stage a tile in Ops Manager
    InstallTile {
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
    },

    /// Configure a staged tile for a segment and optionally apply changes
    ConfigureSegment {
        #[arg(long, default_value = TILE_SLUG)]
        product_name: String,

        #[arg(long)]
        segment: String,

        #[arg(long)]
        network: Option<String>,

        /// Availability zone (repeatable); the first is the singleton AZ
        #[arg(long = "az", value_name = "AZ")]
        azs: Vec<String>,

        /// Number of cells
        #[arg(long, default_value_t = 1)]
        count: u32,

        #[arg(long)]
        vm_type: Option<String>,

        /// Use this om config file instead of generating one
        #[arg(long = "product-config", value_name = "FILE")]
        product_config: Option<PathBuf>,

        /// Run om apply-changes for the product afterwards
        #[arg(long)]
        apply: bool,
    },

    /// Capture and compare platform state around a migration
    #[command(long_about = help_text::DEMO_LONG_ABOUT)]
    Demo {
        #[command(subcommand)]
        command: DemoCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum DemoCommand {
    /// Record the cf, BOSH, capacity and app views of one phase
    Capture {
        #[arg(long, value_enum)]
        phase: Phase,

        #[arg(long)]
        org: String,

        #[arg(long)]
        space: String,

        /// App serving the cf-env page
        #[arg(long)]
        app: String,

        #[arg(long)]
        segment: String,

        #[arg(long)]
        deployment: Option<String>,

        #[arg(long, value_name = "PATH", default_value = DEFAULT_STATE_FILE)]
        state_file: PathBuf,
    },

    /// Show what changed between the before and after captures
    Compare {
        #[arg(long, value_name = "PATH", default_value = DEFAULT_STATE_FILE)]
        state_file: PathBuf,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
