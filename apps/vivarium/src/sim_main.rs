use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use parking_lot::Mutex;
use tracing::info;

use vivarium_core::config::Config;
use vivarium_core::telemetry::logging::{self, LogLevel};
use vivarium_core::vmcomm::{CommandSink, PaintWhen, SimulationComms, WorldSurface};

#[derive(Parser, Debug)]
#[command(name = "vivarium-sim", about = "Simulation-side process, launched by vivarium")]
struct Cli {
    /// Backing file of the shared region, created by the primary.
    #[arg(long)]
    shm_path: PathBuf,

    /// Negotiated size of the shared region in bytes.
    #[arg(long)]
    shm_size: usize,

    /// First exchange sequence number to use; chosen by the primary so a
    /// relaunched process never collides with stale frames.
    #[arg(long, default_value_t = 1)]
    seq_start: i32,

    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// A placeholder world: a scrolling gradient, enough to exercise frame flow
/// end to end without a real scenario runtime behind it.
struct DemoWorld {
    width: u32,
    height: u32,
    tick: AtomicU32,
}

impl DemoWorld {
    fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            width,
            height,
            tick: AtomicU32::new(0),
        })
    }

    fn act(&self) {
        self.tick.fetch_add(1, Ordering::Relaxed);
    }
}

impl WorldSurface for DemoWorld {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn cell_size(&self) -> i32 {
        1
    }

    fn render(&self, into: &mut [i32]) {
        let tick = self.tick.load(Ordering::Relaxed);
        for y in 0..self.height {
            for x in 0..self.width {
                let blue = (x.wrapping_add(tick) % 256) as i32;
                let green = (y.wrapping_add(tick / 2) % 256) as i32;
                into[(y * self.width + x) as usize] = (blue << 24) | (green << 16) | 0xFF;
            }
        }
    }
}

#[derive(Default)]
struct DemoState {
    world: Option<Arc<DemoWorld>>,
    speed: i32,
}

/// Applies decoded commands to the demo runtime. Runs on the exchange
/// thread; everything it touches is behind the shared state lock.
struct DemoSink {
    comms: SimulationComms,
    state: Arc<Mutex<DemoState>>,
    paused: Arc<AtomicBool>,
    step: Arc<AtomicBool>,
}

impl CommandSink for DemoSink {
    fn key_down(&mut self, code: i32, _text: &str) {
        info!(code, "key down");
    }
    fn key_up(&mut self, _code: i32, _text: &str) {}
    fn key_typed(&mut self, _code: i32, _text: &str) {}

    fn mouse_event(
        &mut self,
        _action: sim_proto::MouseAction,
        _x: i32,
        _y: i32,
        _button: i32,
        _clicks: i32,
    ) {
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    fn step_once(&mut self) {
        self.step.store(true, Ordering::SeqCst);
    }

    fn instantiate_world(&mut self, class_name: &str) {
        info!(class_name, "instantiating world");
        let world = DemoWorld::new(320, 240);
        self.state.lock().world = Some(world.clone());
        self.comms.set_world(Some(world));
        self.comms.paint(PaintWhen::Force);
    }

    fn discard_world(&mut self) {
        self.state.lock().world = None;
        self.comms.set_world(None);
    }

    fn continue_drag(&mut self, _drag_id: i32, _x: i32, _y: i32) {}
    fn end_drag(&mut self, _drag_id: i32) {}

    fn property_changed(&mut self, key: &str, value: Option<&str>) {
        info!(key, ?value, "property changed");
    }

    fn set_speed(&mut self, speed: i32) {
        self.state.lock().speed = speed;
    }

    fn world_focus_changed(&mut self, _focused: bool) {}
}

/// Map the 1..=100 speed scale to an inter-act delay.
fn act_delay(speed: i32) -> Duration {
    let speed = speed.clamp(1, 100) as u64;
    Duration::from_millis(205u64.saturating_sub(speed * 2).max(4))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env();
    config.log.level = cli.log_level;
    config.log.file = cli.log_file.clone();
    logging::init(&config.log).context("initialise logging")?;

    let comms = SimulationComms::open(&cli.shm_path, cli.shm_size, cli.seq_start)
        .with_context(|| format!("map shared region {:?}", cli.shm_path))?;
    info!(path = %cli.shm_path.display(), seq_start = cli.seq_start, "simulation side up");

    let state = Arc::new(Mutex::new(DemoState {
        world: None,
        speed: 50,
    }));
    let paused = Arc::new(AtomicBool::new(true));
    let step = Arc::new(AtomicBool::new(false));

    let sink = DemoSink {
        comms: comms.clone(),
        state: state.clone(),
        paused: paused.clone(),
        step: step.clone(),
    };
    let _exchange = comms.start(Box::new(sink));
    comms.mark_ready();

    // The execution loop: this is the thread that runs "user code" in a real
    // scenario, and the one `ask` would block.
    loop {
        let run_once = step.swap(false, Ordering::SeqCst);
        let running = !paused.load(Ordering::SeqCst) || run_once;
        let (world, speed) = {
            let state = state.lock();
            (state.world.clone(), state.speed)
        };
        if running {
            if let Some(world) = world {
                comms.user_code_starting();
                world.act();
                comms.user_code_stopped(run_once);
                comms.paint(PaintWhen::IfDue);
            }
        }
        comms.delay_loop_entered();
        std::thread::sleep(act_delay(speed));
        comms.delay_loop_completed();
    }
}
