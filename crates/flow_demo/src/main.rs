mod console;
mod manifest;
mod tour;

use anyhow::Context;
use app::{AppBuilder, Application};
use clap::Parser;
use serde::Deserialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use scene_flow::{
    FlowController, FlowSettings, JsonLinesSink, NavStatus, RngSeedSource, TickResult,
    TimedTransitionPlayer, TransitionCatalog,
};

use crate::console::{CheckpointLog, ConsoleHost, ConsoleLoadingScreen, FileSaves};
use crate::manifest::ManifestBackend;
use crate::tour::{Navigation, Step, Tour};

struct FlowDemo;

impl Application for FlowDemo {
    const APP_ID: &'static str = "flow_demo";
}

#[derive(Parser)]
#[command(
    name = "flow_demo",
    version,
    about = "Walks a scripted tour through the scene flow controller"
)]
struct Cli {
    /// Directory holding `<scene>.ron` manifests, `transitions.ron` and `tour.ron`.
    #[arg(long, default_value = concat!(env!("CARGO_MANIFEST_DIR"), "/scenes"))]
    scenes: PathBuf,

    /// Tour to play, defaults to `tour.ron` in the scene directory.
    #[arg(long)]
    tour: Option<PathBuf>,

    /// Settings file, defaults to the app's `settings.toml`.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Root seed for load snapshots. Random when omitted.
    #[arg(long)]
    seed: Option<u64>,

    /// Overrides the tick length from the settings file.
    #[arg(long)]
    tick_ms: Option<u64>,
}

/// `[demo]` section of the settings file.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct DemoSettings {
    tick_ms: u64,
    /// Give up on a step after this many ticks.
    max_ticks: u32,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            max_ticks: 400,
        }
    }
}

impl DemoSettings {
    const SECTION: &'static str = "demo";
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let context = AppBuilder::<FlowDemo>::new(env!("CARGO_PKG_VERSION"))
        .build()
        .map_err(|err| anyhow::anyhow!(err))?;

    let settings_file = cli.settings.clone().unwrap_or_else(|| context.settings_file());
    let flow_settings: FlowSettings = app::load_section(&settings_file, FlowSettings::SECTION)?;
    let demo: DemoSettings = app::load_section(&settings_file, DemoSettings::SECTION)?;
    let tick = Duration::from_millis(cli.tick_ms.unwrap_or(demo.tick_ms));

    let tour_file = cli.tour.clone().unwrap_or_else(|| cli.scenes.join("tour.ron"));
    let tour = Tour::from_file(&tour_file)?;

    let catalog_source = std::fs::read_to_string(cli.scenes.join("transitions.ron"))
        .context("reading transitions.ron")?;
    let catalog = TransitionCatalog::from_ron(&catalog_source)?;

    let events_file = context.logs_dir().join("flow_events.jsonl");
    let analytics = JsonLinesSink::new(BufWriter::new(
        File::create(&events_file).with_context(|| format!("creating {}", events_file.display()))?,
    ));

    let seeds = match cli.seed {
        Some(seed) => RngSeedSource::new(seed),
        None => RngSeedSource::from_entropy(),
    };

    let host = ConsoleHost::default();
    let checkpoints = CheckpointLog::default();
    let backend = ManifestBackend::new(cli.scenes.clone())?;
    info!(
        version = context.version(),
        scenes = %backend.root().display(),
        transitions = catalog.len(),
        "starting tour"
    );

    let mut flow = FlowController::builder(backend)
        .settings(flow_settings)
        .scene_host(host.clone())
        .loading_screen(ConsoleLoadingScreen)
        .checkpoint_sink(checkpoints.clone())
        .save_service(FileSaves::new(context.saves_dir(), host.clone()))
        .analytics_sink(analytics)
        .transition_library(catalog)
        .transition_player(TimedTransitionPlayer::new())
        .seed_source(seeds)
        .build(&tour.start)?;

    for (index, step) in tour.steps.into_iter().enumerate() {
        info!("step {}: {}", index + 1, describe(&step));
        if let Err(err) = run_step(&mut flow, step, tick, demo.max_ticks) {
            warn!(error = %err, "step failed, stack left as it was");
        }
        let stack: Vec<_> = flow
            .entries()
            .iter()
            .map(|entry| entry.scene_path.as_str())
            .collect();
        info!("  stack: {}", stack.join(" > "));
    }

    let live = host.current_title().unwrap_or_else(|| "-".to_string());
    info!(
        checkpoints = checkpoints.records().len(),
        live = %live,
        events = %events_file.display(),
        "tour finished"
    );
    Ok(())
}

fn describe(step: &Step) -> String {
    match step {
        Step::Push(nav) => format!("push {}{}", nav.scene, mode(nav)),
        Step::Replace(nav) => format!("replace {}{}", nav.scene, mode(nav)),
        Step::Pop { .. } => "pop".to_string(),
    }
}

fn mode(nav: &Navigation) -> &'static str {
    if nav.background { " (background)" } else { "" }
}

fn run_step(
    flow: &mut FlowController<ManifestBackend>,
    step: Step,
    tick: Duration,
    max_ticks: u32,
) -> anyhow::Result<()> {
    let mut cancel_after = None;
    let status = match step {
        Step::Push(nav) if nav.background => {
            cancel_after = nav.cancel_after;
            flow.push_scene_async(&nav.scene, nav.data, nav.metadata)?
        }
        Step::Push(nav) => flow.push_scene(&nav.scene, nav.data, nav.metadata)?,
        Step::Replace(nav) if nav.background => {
            cancel_after = nav.cancel_after;
            flow.replace_scene_async(&nav.scene, nav.data, nav.metadata)?
        }
        Step::Replace(nav) => flow.replace_scene(&nav.scene, nav.data, nav.metadata)?,
        Step::Pop { data, metadata } => flow.pop_scene(data, metadata)?,
    };
    if status == NavStatus::Completed {
        settle(flow, tick);
        return Ok(());
    }

    for ticks in 1..=max_ticks {
        std::thread::sleep(tick);
        if cancel_after.is_some_and(|limit| ticks > limit) {
            if let Some(done) = flow.cancel_pending_load() {
                info!(scene = %done.scene_path, "cancelled after {} ticks", ticks - 1);
            }
            return Ok(());
        }
        if let TickResult::Finished(done) = flow.advance(tick) {
            done.outcome?;
            settle(flow, tick);
            return Ok(());
        }
    }

    error!(max_ticks, "step did not finish, cancelling");
    flow.cancel_pending_load();
    anyhow::bail!("step exceeded {max_ticks} ticks")
}

/// Lets the enter transition play out before the next step.
fn settle(flow: &mut FlowController<ManifestBackend>, tick: Duration) {
    let settle_time = flow.settings().transition_timeout();
    let mut waited = Duration::ZERO;
    while waited < settle_time {
        if !flow.is_transition_playing() {
            break;
        }
        std::thread::sleep(tick);
        flow.advance(tick);
        waited += tick;
    }
}
