mod bosh;
mod cf;
mod checksum;
mod cli;
mod config;
mod demo;
mod exec;
mod manifest;
mod migration;
mod monitor;
mod segment;
mod tile;
mod validate;

use anyhow::{Context, bail};
use bosh::Bosh;
use cf::Cf;
use cli::{Cli, Command, DemoCommand, LogLevel};
use config::{Settings, Tool};
use exec::Executor;
use std::fmt as stdfmt;
use std::fs::OpenOptions;
use std::io::{IsTerminal, stderr};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Mutex;
use tile::{Om, Pivnet};
use tracing::{Event, Level, Subscriber, error, info, warn};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt as tracing_fmt;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

struct IsosegExitCode;

impl IsosegExitCode {
    /// Exit code used when the command ran but found problems (failed
    /// checks, apps that could not be restarted).
    fn problems() -> ExitCode {
        ExitCode::from(1)
    }

    /// Exit code used for other errors (missing CLIs, failed commands, invalid arguments, etc.).
    fn any_error() -> ExitCode {
        ExitCode::from(255)
    }
}

/// Resolved settings plus the executor every CLI wrapper runs through.
struct App {
    settings: Settings,
    exec: Executor,
}

impl App {
    fn cf(&self) -> Cf<'_> {
        Cf::new(&self.exec, self.settings.program(Tool::Cf))
    }

    fn bosh(&self) -> Bosh<'_> {
        Bosh::new(&self.exec, self.settings.program(Tool::Bosh))
    }

    fn om(&self) -> Om<'_> {
        Om::new(&self.exec, self.settings.program(Tool::Om))
    }

    fn pivnet(&self) -> Pivnet<'_> {
        Pivnet::new(&self.exec, self.settings.program(Tool::Pivnet))
    }

    fn require_tools(&self, tools: &[Tool]) -> anyhow::Result<()> {
        for tool in tools {
            exec::ensure_available(self.settings.program(*tool))?;
        }
        Ok(())
    }

    fn deployment(&self, flag: Option<String>, name: &str) -> String {
        self.settings
            .deployment(flag, || segment::default_deployment(name))
    }

    fn finish(&self) {
        if self.exec.dry_run() {
            info!("DRY RUN - no changes were made");
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose, cli.log_level, cli.log_file.as_deref()) {
        eprintln!("ERROR: {e:#}");
        return IsosegExitCode::any_error();
    }

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{e}");
            return IsosegExitCode::any_error();
        }
    };

    let app = App {
        settings,
        exec: Executor::system(cli.dry_run),
    };

    let result = match cli.command {
        Command::CreateSegment {
            name,
            cell_size,
            count,
            deployment,
            azs,
            network,
            vm_type,
            cf_deployment,
            register,
            orgs,
            manifest_out,
        } => {
            let params = manifest::SegmentParams {
                deployment: app.deployment(deployment, &name),
                name,
                cell_size,
                instances: count,
                azs: app.settings.azs(azs),
                network: app.settings.network(network),
                vm_type: app.settings.vm_type(vm_type),
                cf_deployment,
                stemcell_os: app.settings.stemcell_os().to_string(),
                instance_group: app.settings.cell_instance_group().to_string(),
            };
            handle_create_segment(
                &app,
                segment::CreateOptions {
                    params,
                    manifest_out,
                    register,
                    orgs,
                },
            )
        }
        Command::RegisterSegment { name, orgs } => handle_register_segment(&app, &name, &orgs),
        Command::Migrate {
            org,
            space,
            segment,
            batch_size,
            delay,
            apps,
            exclude,
            entitle,
        } => handle_migrate(
            &app,
            migration::MigrateOptions {
                org,
                space,
                segment,
                batch_size: app.settings.batch_size(batch_size),
                delay: app.settings.delay(delay),
                apps,
                exclude,
                entitle,
            },
        ),
        Command::Rollback {
            org,
            space,
            target_segment,
            apps,
            batch_size,
            delay,
        } => handle_rollback(
            &app,
            migration::RollbackOptions {
                org,
                space,
                target_segment,
                apps,
                batch_size: app.settings.batch_size(batch_size),
                delay: app.settings.delay(delay),
            },
        ),
        Command::Monitor {
            segment,
            deployment,
            output,
            watch,
            iterations,
        } => handle_monitor(
            &app,
            monitor::MonitorOptions {
                deployment: app.deployment(deployment, &segment),
                segment,
                cell_group: app.settings.cell_instance_group().to_string(),
                format: output,
                watch,
                iterations,
            },
        ),
        Command::Validate {
            segment,
            deployment,
        } => {
            let deployment = app.deployment(deployment, &segment);
            handle_validate(&app, &segment, &deployment)
        }
        Command::DownloadTile {
            version,
            output_dir,
            glob,
            sha256,
        } => handle_download_tile(
            &app,
            tile::DownloadOptions {
                version,
                output_dir,
                glob,
                sha256,
            },
        ),
        Command::DownloadReplicator {
            version,
            output_dir,
        } => handle_download_replicator(&app, &version, &output_dir),
        Command::ReplicateTile {
            source,
            name,
            output,
            replicator,
        } => handle_replicate_tile(
            &app,
            replicator,
            tile::ReplicateOptions {
                source,
                name,
                output,
            },
        ),
        Command::InstallTile { file } => handle_install_tile(&app, &file),
        Command::ConfigureSegment {
            product_name,
            segment,
            network,
            azs,
            count,
            vm_type,
            product_config,
            apply,
        } => handle_configure_segment(
            &app,
            tile::ConfigureOptions {
                segment: tile::SegmentConfig {
                    product_name,
                    segment,
                    network: app.settings.network(network),
                    azs: app.settings.azs(azs),
                    instances: count,
                    vm_type: app.settings.vm_type(vm_type),
                },
                config_file: product_config,
                apply,
            },
        ),
        Command::Demo { command } => match command {
            DemoCommand::Capture {
                phase,
                org,
                space,
                app: app_name,
                segment,
                deployment,
                state_file,
            } => handle_demo_capture(
                &app,
                phase,
                demo::CaptureTarget {
                    org,
                    space,
                    app: app_name,
                    deployment: app.deployment(deployment, &segment),
                    segment,
                    cell_group: app.settings.cell_instance_group().to_string(),
                },
                &state_file,
            ),
            DemoCommand::Compare { state_file } => handle_demo_compare(&state_file),
        },
    };

    match result {
        Ok(exit_code) => exit_code,
        Err(err) => {
            error!("{err:#}");
            IsosegExitCode::any_error()
        }
    }
}

fn handle_create_segment(app: &App, options: segment::CreateOptions) -> anyhow::Result<ExitCode> {
    app.require_tools(&[Tool::Bosh])?;
    config::require_all(config::BOSH_ENV)?;
    if options.register {
        app.require_tools(&[Tool::Cf])?;
    }

    let registration = segment::create_segment(&app.cf(), &app.bosh(), &options)?;

    println!(
        "Deployed {} cell(s) for isolation segment {} ({})",
        options.params.instances, options.params.name, options.params.deployment
    );
    if let Some(registration) = registration {
        print_registration(&options.params.name, &registration);
    }
    app.finish();
    Ok(ExitCode::SUCCESS)
}

fn handle_register_segment(app: &App, name: &str, orgs: &[String]) -> anyhow::Result<ExitCode> {
    app.require_tools(&[Tool::Cf])?;
    let registration = segment::register_segment(&app.cf(), name, orgs)?;
    print_registration(name, &registration);
    app.finish();
    Ok(ExitCode::SUCCESS)
}

fn print_registration(name: &str, registration: &segment::Registration) {
    if registration.created {
        println!("Registered isolation segment {name}");
    } else {
        println!("Isolation segment {name} was already registered");
    }
    for org in &registration.entitled {
        println!("Entitled org {org}");
    }
}

fn handle_migrate(app: &App, options: migration::MigrateOptions) -> anyhow::Result<ExitCode> {
    app.require_tools(&[Tool::Cf])?;
    let report = migration::migrate(&app.cf(), &app.exec, &options)?;
    migration::print_report(
        &format!(
            "Migration of {}/{} to {}",
            options.org, options.space, options.segment
        ),
        &report,
    );
    app.finish();

    if !report.is_success() {
        warn!(
            "{} app(s) failed to restart. To move the space back run: isoseg rollback --org {} --space {}",
            report.failed, options.org, options.space
        );
        return Ok(IsosegExitCode::problems());
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_rollback(app: &App, options: migration::RollbackOptions) -> anyhow::Result<ExitCode> {
    app.require_tools(&[Tool::Cf])?;
    let report = migration::rollback(&app.cf(), &app.exec, &options)?;
    let destination = options.target_segment.as_deref().unwrap_or("shared cells");
    migration::print_report(
        &format!(
            "Rollback of {}/{} to {destination}",
            options.org, options.space
        ),
        &report,
    );
    app.finish();

    if !report.is_success() {
        return Ok(IsosegExitCode::problems());
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_monitor(app: &App, options: monitor::MonitorOptions) -> anyhow::Result<ExitCode> {
    app.require_tools(&[Tool::Cf, Tool::Bosh])?;
    let mut stdout = std::io::stdout().lock();
    monitor::run(&app.cf(), &app.bosh(), &options, &mut stdout)?;
    Ok(ExitCode::SUCCESS)
}

fn handle_validate(app: &App, segment: &str, deployment: &str) -> anyhow::Result<ExitCode> {
    let programs = [
        app.settings.program(Tool::Cf),
        app.settings.program(Tool::Bosh),
    ];
    let report = validate::validate(
        &app.cf(),
        &app.bosh(),
        &programs,
        &validate::ValidateTarget {
            segment,
            deployment,
            cell_group: app.settings.cell_instance_group(),
        },
    );
    report.print();

    if !report.is_healthy() {
        error!("Validation failed: {} check(s) failed", report.failures());
        return Ok(IsosegExitCode::problems());
    }
    info!("Isolation segment {segment} is healthy");
    Ok(ExitCode::SUCCESS)
}

fn handle_download_tile(app: &App, options: tile::DownloadOptions) -> anyhow::Result<ExitCode> {
    app.require_tools(&[Tool::Pivnet])?;
    let token = config::require_env("PIVNET_TOKEN")?;
    if let Some(path) = tile::download_tile(&app.pivnet(), &token, &options)? {
        println!("{}", path.display());
    }
    app.finish();
    Ok(ExitCode::SUCCESS)
}

fn handle_download_replicator(app: &App, version: &str, output_dir: &Path) -> anyhow::Result<ExitCode> {
    app.require_tools(&[Tool::Pivnet])?;
    let token = config::require_env("PIVNET_TOKEN")?;
    if let Some(path) = tile::download_replicator(&app.pivnet(), &token, version, output_dir)? {
        println!("{}", path.display());
    }
    app.finish();
    Ok(ExitCode::SUCCESS)
}

fn handle_replicate_tile(
    app: &App,
    replicator: Option<String>,
    options: tile::ReplicateOptions,
) -> anyhow::Result<ExitCode> {
    let replicator = replicator.unwrap_or_else(|| app.settings.program(Tool::Replicator).to_string());
    exec::ensure_available(&replicator)?;
    tile::replicate_tile(&app.exec, &replicator, &options)?;
    if !app.exec.dry_run() {
        println!("{}", options.output.display());
    }
    app.finish();
    Ok(ExitCode::SUCCESS)
}

fn handle_install_tile(app: &App, file: &Path) -> anyhow::Result<ExitCode> {
    app.require_tools(&[Tool::Om])?;
    config::require_all(config::OM_ENV)?;
    let (name, version) = tile::install_tile(&app.om(), file)?;
    println!("Staged {name} {version}");
    app.finish();
    Ok(ExitCode::SUCCESS)
}

fn handle_configure_segment(app: &App, options: tile::ConfigureOptions) -> anyhow::Result<ExitCode> {
    app.require_tools(&[Tool::Om])?;
    config::require_all(config::OM_ENV)?;
    if options.config_file.is_none() && options.segment.azs.is_empty() {
        bail!("At least one --az is required when generating the product configuration");
    }
    manifest::validate_segment_name(&options.segment.segment)?;

    tile::configure_segment(&app.om(), &options)?;
    println!(
        "Configured {} for isolation segment {}",
        options.segment.product_name, options.segment.segment
    );
    app.finish();
    Ok(ExitCode::SUCCESS)
}

fn handle_demo_capture(
    app: &App,
    phase: demo::Phase,
    target: demo::CaptureTarget,
    state_file: &Path,
) -> anyhow::Result<ExitCode> {
    app.require_tools(&[Tool::Cf, Tool::Bosh, Tool::Curl])?;
    let state = demo::capture(
        &app.cf(),
        &app.bosh(),
        &app.exec,
        app.settings.program(Tool::Curl),
        &target,
    )?;
    demo::capture_into(state_file, phase, state)
        .with_context(|| format!("Failed to record the {phase:?} capture"))?;
    println!("Captured {phase:?} state of {} in {}", target.app, state_file.display());
    Ok(ExitCode::SUCCESS)
}

fn handle_demo_compare(state_file: &Path) -> anyhow::Result<ExitCode> {
    let state = demo::DemoState::load(state_file)?;
    let comparison = demo::compare(&state)?;
    demo::print_comparison(&comparison);
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(verbose: u8, log_level: Option<LogLevel>, log_file: Option<&Path>) -> anyhow::Result<()> {
    let stderr_is_terminal = stderr().is_terminal();
    let formatter = EmojiFormatter {
        stderr_is_terminal,
        timestamps: false,
    };

    // Explicit flags win over RUST_LOG.
    let filter = match (log_level, verbose) {
        (Some(level), _) => EnvFilter::new(level.as_filter()),
        (None, 0) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        (None, 1) => EnvFilter::new("info"),
        (None, _) => EnvFilter::new("debug"),
    };

    let fmt_layer = tracing_fmt::layer()
        .event_format(formatter)
        .with_writer(std::io::stderr);

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_fmt::layer()
                    .event_format(EmojiFormatter {
                        stderr_is_terminal: false,
                        timestamps: true,
                    })
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(file_layer)
        .init();
    Ok(())
}

struct EmojiFormatter {
    stderr_is_terminal: bool,
    timestamps: bool,
}

impl<S, N> FormatEvent<S, N> for EmojiFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        if self.timestamps {
            write!(
                writer,
                "{} ",
                chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, false)
            )?;
        }

        if self.stderr_is_terminal {
            match *event.metadata().level() {
                Level::DEBUG => write!(writer, "🔍 ")?,
                Level::INFO => write!(writer, "ℹ️ ")?,
                Level::WARN => write!(writer, "⚠️  ")?,
                Level::ERROR => write!(writer, "❌️ ")?,
                _ => {}
            }
        } else {
            match *event.metadata().level() {
                Level::DEBUG => writer.write_str("DEBUG: ")?,
                Level::INFO => writer.write_str("INFO: ")?,
                Level::WARN => writer.write_str("WARN: ")?,
                Level::ERROR => writer.write_str("ERROR: ")?,
                _ => {}
            }
        }

        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
