use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cadenza_audioio::{AudioIo, PeakMeter, ProjectAudioIo};
use cadenza_effects::{
    ControlPanel, EffectSession, EffectSettingChanged, EffectUiClient, EffectUiValidator,
    NullAutomation, NullPlugin, ParamId, ParameterInfo, ParameterUnit, SyncConfig,
};
use clap::{Args, Parser, Subcommand};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    match cli.command {
        Commands::Simulate(args) => execute_simulate(args),
    }
}

#[derive(Parser)]
#[command(author, version, about = "Effect parameter synchronisation tools for Cadenza")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an effect dialog against a plugin whose automation keeps moving.
    Simulate(SimulateArgs),
}

#[derive(Args)]
struct SimulateArgs {
    /// Path to a sync configuration file (JSON).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Number of idle ticks to run before validating.
    #[arg(long, default_value_t = 20)]
    ticks: u32,
    /// Number of plugin parameters; the last one is a rate parameter.
    #[arg(long, default_value_t = 4)]
    params: u32,
    /// Project play speed multiplier.
    #[arg(long, default_value_t = 1.0)]
    play_speed: f64,
    /// Seed for the plugin automation.
    #[arg(long)]
    seed: Option<u64>,
}

fn execute_simulate(args: SimulateArgs) -> Result<()> {
    if args.params == 0 {
        bail!("--params must be at least 1");
    }
    if !(args.play_speed.is_finite() && args.play_speed > 0.0) {
        bail!("--play-speed must be a positive number");
    }

    let config = args.config.as_ref().map(SyncConfig::load).unwrap_or_default();
    let infos = simulated_parameters(args.params);
    let rate_id = infos[infos.len() - 1].id;
    let plugin = NullPlugin::new(infos);
    let session = EffectSession::new(plugin.clone(), config.clone());

    let project = Arc::new(ProjectAudioIo::default());
    project.set_play_speed(args.play_speed);
    let meter = Arc::new(PeakMeter::new());
    project.set_playback_meter(Some(meter.clone()));

    let store = Arc::clone(session.store());
    let mut phase = 0.0f64;
    let audio = AudioIo::new(None);
    let stream = audio
        .start_stream(Arc::clone(&project), move |block, speed| {
            let rate = store.scaled_value(rate_id, speed).unwrap_or(1.0);
            let step = rate * 110.0 / 48_000.0;
            for frame in 0..block.frames {
                let sample = (phase * std::f64::consts::TAU).sin() as f32 * 0.25;
                for channel in &mut block.channels {
                    channel[frame] = sample;
                }
                phase = (phase + step).fract();
            }
        })
        .context("failed to start the virtual audio stream")?;
    info!(token = stream.token(), "audio stream started");

    let mut validator = session.populate_ui(ConsolePanel::default(), Box::new(ConsoleClient));
    let _edits = validator.subscribe(|change: &EffectSettingChanged| {
        info!(index = change.index, value = change.new_value, "user edit");
    });

    let running = Arc::new(AtomicBool::new(true));
    let automation = spawn_automation(
        plugin.automation(),
        Arc::clone(&running),
        args.seed.unwrap_or(0x5eed),
    )?;

    let mut applied = 0;
    for tick in 0..args.ticks {
        thread::sleep(config.idle_interval());
        let flushed = validator.on_idle();
        debug!(tick, flushed, "idle");
        applied += flushed;
    }
    running.store(false, Ordering::Relaxed);
    automation
        .join()
        .map_err(|_| anyhow::anyhow!("automation thread panicked"))?;
    applied += validator.on_idle();

    let first = ParamId(0);
    let edited = validator
        .store()
        .info(first)
        .map(|info| (info.min + info.max) / 2.0)
        .unwrap_or(0.5);
    validator.panel_mut().controls.insert(first, edited);
    validator
        .on_control_changed(first, edited)
        .context("user edit was not applied")?;
    if !validator.validate_ui() {
        bail!("panel settings were rejected");
    }

    let preset = session
        .save_preset_string()
        .context("failed to serialise settings")?;
    validator.on_close();
    let token = stream.token();
    drop(stream);

    println!("Simulated {} idle ticks ({applied} changes applied)", args.ticks);
    println!("  Stream token: {token}");
    println!("  Peak level: {:.3}", meter.max_peak());
    println!("  Panel writes: {}", validator.panel().writes);
    for (id, value) in &validator.panel().controls {
        println!("    {id} = {value:.4}");
    }
    println!("{preset}");
    Ok(())
}

fn simulated_parameters(count: u32) -> Vec<ParameterInfo> {
    let mut infos: Vec<ParameterInfo> = (0..count - 1)
        .map(|id| ParameterInfo::new(id, format!("Param {id}"), 0.0, 1.0, 0.5))
        .collect();
    infos.push(
        ParameterInfo::new(count - 1, "Rate", 0.1, 20.0, 1.0).with_unit(ParameterUnit::Rate),
    );
    infos
}

fn spawn_automation(
    automation: NullAutomation,
    running: Arc<AtomicBool>,
    seed: u64,
) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("cadenza-automation".into())
        .spawn(move || {
            let mut rng = StdRng::seed_from_u64(seed);
            let ids = automation.parameter_ids();
            while running.load(Ordering::Relaxed) {
                let id = ids[rng.gen_range(0..ids.len())];
                automation.emit(id, rng.gen_range(0.1..=1.0));
                thread::sleep(Duration::from_micros(rng.gen_range(100..2_000)));
            }
        })
        .context("failed to spawn automation thread")
}

/// Panel that keeps controls in memory and reports errors on stderr.
#[derive(Default)]
struct ConsolePanel {
    controls: BTreeMap<ParamId, f64>,
    writes: usize,
}

impl ControlPanel for ConsolePanel {
    fn read_control(&self, id: ParamId) -> Option<f64> {
        self.controls.get(&id).copied()
    }

    fn write_control(&mut self, id: ParamId, value: f64) -> bool {
        self.controls.insert(id, value);
        self.writes += 1;
        true
    }

    fn show_error(&mut self, message: &str) {
        eprintln!("error: {message}");
    }
}

struct ConsoleClient;

impl EffectUiClient for ConsoleClient {
    fn close_ui(&mut self) -> bool {
        debug!("dialog closed");
        true
    }
}
