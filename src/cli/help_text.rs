pub(super) const ROOT_LONG_ABOUT: &str = "\
Manage Cloud Foundry isolation segments

isoseg drives the cf, bosh, om and pivnet command line tools to build isolation
segments, move workloads onto them and keep an eye on them afterwards. It never talks
to the platform APIs directly: every action is a CLI invocation that is logged with
-vv and can be previewed with --dry-run.

CORE CONCEPTS:

  Isolation segment:
    A named pool of Diego cells. Cells carry the segment name as their placement
    tag, and Cloud Foundry schedules the apps of spaces assigned to the segment
    only onto those cells. Routing stays on the platform's shared Gorouters.

  Two ways to get cells:
    - create-segment deploys a standalone BOSH deployment of cells.
    - download-tile / replicate-tile / install-tile / configure-segment go through
      Ops Manager with the Isolation Segment tile.
    Either way, register-segment makes the segment known to Cloud Foundry.

TYPICAL WORKFLOW:

  1. Deploy cells and register the segment:
     $ isoseg create-segment --name iso-one --count 2 --az z1 --register --org demo

  2. Check it:
     $ isoseg validate --segment iso-one

  3. Move a space onto it:
     $ isoseg migrate --org demo --space dev --segment iso-one

  4. Watch capacity:
     $ isoseg monitor --segment iso-one --watch 30

  5. Undo if needed:
     $ isoseg rollback --org demo --space dev

GLOBAL OPTIONS:

  --dry-run
    Run read-only commands as usual but only log commands that would change the
    platform. Pauses between migration batches are skipped.

  --config <PATH>
    TOML file overriding binary paths ([binaries]) and defaults ([defaults]).
    Also read from ISOSEG_CONFIG.

  -v, --verbose / --log-level <LEVEL> / --log-file <PATH>
    Logging goes to stderr. Without flags RUST_LOG is honoured (default warn).

CREDENTIALS:

  Credentials are only read from the environment:
    CF_API, CF_USERNAME, CF_PASSWORD (login when cf has no session)
    CF_SKIP_SSL_VALIDATION
    BOSH_ENVIRONMENT, BOSH_CLIENT, BOSH_CLIENT_SECRET, BOSH_CA_CERT
    OM_TARGET, OM_USERNAME, OM_PASSWORD
    PIVNET_TOKEN

EXIT CODES:

  0    Success
  1    The command ran but found problems (failed validation checks, apps that
       could not be restarted)
  255  Error (invalid arguments, missing CLI or credentials, failed command)
";

pub(super) const MIGRATE_LONG_ABOUT: &str = "\
Move a space onto an isolation segment and restart its apps

Apps only change cells when they restart, so after assigning the space to the
segment every app is restarted, a batch at a time.

STEPS:

  1. Log in (existing cf session, or CF_API / CF_USERNAME / CF_PASSWORD).
  2. Check that the segment, org and space exist.
  3. With --entitle, entitle the org to the segment.
  4. Assign the space to the segment.
  5. Restart the selected apps with a rolling restart, falling back to a plain
     restart when the rolling one is refused. After each restart the placement
     reported by the app's instances is compared with the segment; a mismatch is
     only a warning.
  6. Pause --delay seconds after every --batch-size apps.

SELECTING APPS:

  --apps a,b   only restart these apps
  --exclude c  restart everything except these apps

OUTPUT:

  A summary of total, restarted and failed apps is printed on stdout. If any app
  failed the exit code is 1 and the rollback command is suggested.

EXAMPLES:

  Preview:
    $ isoseg --dry-run migrate --org demo --space dev --segment iso-one

  Small batches, long pauses:
    $ BATCH_SIZE=2 MIGRATION_DELAY=120 isoseg migrate --org demo --space dev --segment iso-one
";

pub(super) const MONITOR_LONG_ABOUT: &str = "\
Report apps, cells and capacity of an isolation segment

A snapshot contains:
  - the number of apps in spaces assigned to the segment
  - the number of cells in the deployment, and how many are running
  - memory, disk and container capacity (total, available, used, utilization)

Capacity is the sum of every running cell's rep state, read over bosh ssh. Cells
whose state cannot be read are left out and reported as such.

OUTPUT FORMATS:

  text  Human readable report (default)
  json  One JSON document per snapshot
  csv   A header line, then one row per snapshot

EXAMPLES:

  $ isoseg monitor --segment iso-one --output json
  $ isoseg monitor --segment iso-one --output csv --watch 60 --iterations 10 > capacity.csv
";

pub(super) const VALIDATE_LONG_ABOUT: &str = "\
Check that a segment is registered, deployed and correctly tagged

CHECKS:

  CLIs                cf and bosh can be found
  CF login            a cf session exists or can be created
  Segment registered  the segment is registered in Cloud Foundry
  Entitlements        orgs entitled to the segment (warning when none)
  Space assignments   spaces assigned to the segment (warning when none)
  Deployment          the BOSH deployment exists
  Cells               at least one cell, every cell running
  Placement tag       the cells' rep placement tags include the segment name

Each check prints PASS, WARN or FAIL. The exit code is 1 when any check fails.
";

pub(super) const DEMO_LONG_ABOUT: &str = "\
Capture and compare platform state around a migration

Run 'demo capture --phase before', migrate the space, run
'demo capture --phase after', then 'demo compare'. Each capture records four views
of the same app:

  cf_cli    the space's segment and the segment reported by each app instance
  bosh      the segment's cells and their IPs
  capacity  the segment's summed cell capacity
  app_env   CF_INSTANCE_* values printed by the app itself (a cf-env style app
            reached over its route)

compare prints what changed in each view and whether the app's instance IP is now
one of the segment's cells.
";
