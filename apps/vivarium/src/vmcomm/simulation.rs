//! Simulation-side channel endpoint.
//!
//! Runs the continuous exchange loop on a dedicated thread: drains incoming
//! commands into a [`CommandSink`], publishes rendered frames plus telemetry
//! into the consumer area, and carries the synchronous `ask` protocol for
//! user code. Rendering goes through a small pool of reusable pixel buffers
//! so the steady state allocates nothing per frame.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::{Condvar, Mutex};
use tracing::{error, warn};

use sim_proto::layout::{
    CONSUMER_OFFSET, PRODUCER_COMMAND_COUNT, PRODUCER_LAST_CONSUMED, PRODUCER_MARKER, WORD_BYTES,
};
use sim_proto::{
    AskRequest, Command, CommandPayload, ConsumerStatus, ImageFrame, MouseAction, WireError,
    decode_commands, encode_consumer_frame,
};

use super::ExchangeError;
use super::region::{LockArea, RegionError, SharedRegion};
use crate::telemetry;

/// Throttled paints are skipped when the previous one is closer than this
/// (about 1/120 s); forced paints bypass the throttle.
const MIN_PAINT_INTERVAL: Duration = Duration::from_nanos(8_333_333);
/// Reusable pixel buffers kept around for rendering.
const IMAGE_POOL_SIZE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintWhen {
    /// Paint regardless of the throttle (uncaught error, user-visible world
    /// mutation).
    Force,
    /// Paint unless the minimum inter-frame interval has not yet elapsed.
    IfDue,
}

/// The world being visualised. Implemented by the embedding simulation
/// runtime; the channel only needs geometry and a way to rasterise.
pub trait WorldSurface: Send + Sync {
    /// Width and height in pixels.
    fn dimensions(&self) -> (u32, u32);
    /// Cell size in pixels.
    fn cell_size(&self) -> i32;
    /// Render into `width * height` BGRA words, row-major.
    fn render(&self, into: &mut [i32]);
}

/// Dispatch target for decoded commands. Runs on the exchange thread, so
/// implementations hand work off to the execution thread rather than doing
/// it inline.
pub trait CommandSink: Send {
    fn key_down(&mut self, code: i32, text: &str);
    fn key_up(&mut self, code: i32, text: &str);
    fn key_typed(&mut self, code: i32, text: &str);
    fn mouse_event(&mut self, action: MouseAction, x: i32, y: i32, button: i32, click_count: i32);
    fn set_paused(&mut self, paused: bool);
    fn step_once(&mut self);
    fn instantiate_world(&mut self, class_name: &str);
    fn discard_world(&mut self);
    fn continue_drag(&mut self, drag_id: i32, x: i32, y: i32);
    fn end_drag(&mut self, drag_id: i32);
    fn property_changed(&mut self, key: &str, value: Option<&str>);
    fn set_speed(&mut self, speed: i32);
    fn world_focus_changed(&mut self, focused: bool);
}

struct RenderedImage {
    width: u32,
    height: u32,
    pixels: Vec<i32>,
}

struct AskState {
    id: i32,
    prompt: String,
    answer: Option<String>,
    abandoned: bool,
}

struct SimShared {
    world: Option<Arc<dyn WorldSurface>>,
    /// Bumped every time a different world is installed; 0 on the wire means
    /// "no world".
    world_counter: i32,
    speed: i32,
    error_count: i32,
    user_code_started_at: u64,
    delay_loop_active: bool,
    ready: bool,
    ask: Option<AskState>,
    /// Most recently rendered frame awaiting its trip through the region.
    image_for_sending: Option<RenderedImage>,
    /// Sequence of the most recently processed command.
    last_ack: i32,
    last_paint: Instant,
}

struct SimInner {
    region: SharedRegion,
    shared: Mutex<SimShared>,
    ask_signal: Condvar,
    stop: AtomicBool,
    pool_tx: Sender<Vec<i32>>,
    pool_rx: Receiver<Vec<i32>>,
}

/// Exchange-thread-local sequencing state.
struct SimLoop {
    seq: i32,
    last_paint_seq: i32,
    last_paint_words: usize,
    overflow_reported: bool,
}

impl SimLoop {
    fn new(seq_start: i32) -> Self {
        Self {
            seq: seq_start.max(1),
            last_paint_seq: -1,
            last_paint_words: 0,
            overflow_reported: false,
        }
    }
}

#[derive(Clone)]
pub struct SimulationComms {
    inner: Arc<SimInner>,
    seq_start: i32,
}

impl SimulationComms {
    /// Map the backing file created by the primary. `seq_start` arrives as a
    /// launch parameter so a relaunched process never reuses sequence
    /// numbers the primary may still be holding.
    pub fn open(path: &Path, bytes: usize, seq_start: i32) -> Result<Self, RegionError> {
        let region = SharedRegion::open(path, bytes)?;
        // Idle posture: the simulation holds the consumer lock between
        // exchanges.
        region.lock(LockArea::Consumer)?;
        let (pool_tx, pool_rx) = bounded(IMAGE_POOL_SIZE);
        Ok(Self {
            inner: Arc::new(SimInner {
                region,
                shared: Mutex::new(SimShared {
                    world: None,
                    world_counter: 0,
                    speed: 50,
                    error_count: 0,
                    user_code_started_at: 0,
                    delay_loop_active: false,
                    ready: false,
                    ask: None,
                    image_for_sending: None,
                    last_ack: -1,
                    last_paint: Instant::now(),
                }),
                ask_signal: Condvar::new(),
                stop: AtomicBool::new(false),
                pool_tx,
                pool_rx,
            }),
            seq_start,
        })
    }

    /// Start the exchange loop. The loop never exits on error; it runs until
    /// [`SimulationComms::shutdown`] or process exit.
    pub fn start(&self, mut sink: Box<dyn CommandSink>) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let mut loop_state = SimLoop::new(self.seq_start);
        std::thread::Builder::new()
            .name("vivarium-sim-comms".into())
            .spawn(move || {
                while !inner.stop.load(Ordering::SeqCst) {
                    let _guard = telemetry::PerfGuard::new("simulation.exchange");
                    if let Err(err) = inner.exchange(sink.as_mut(), &mut loop_state) {
                        warn!(%err, "exchange cycle failed; retrying");
                    }
                }
            })
            .expect("spawn sim comms thread")
    }

    pub fn shutdown(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        self.abandon_ask();
    }

    /// Install (or clear) the world to visualise. Installing a different
    /// world bumps the world counter the primary uses to detect changes.
    pub fn set_world(&self, world: Option<Arc<dyn WorldSurface>>) {
        let mut sh = self.inner.shared.lock();
        let changed = match (&sh.world, &world) {
            (Some(current), Some(next)) => !Arc::ptr_eq(current, next),
            (None, None) => false,
            _ => true,
        };
        if changed {
            sh.world_counter += 1;
            sh.world = world;
        }
    }

    /// Render the current world into a pooled buffer for the next exchange.
    /// Runs on the execution thread.
    pub fn paint(&self, when: PaintWhen) {
        let mut sh = self.inner.shared.lock();
        if when == PaintWhen::IfDue && sh.last_paint.elapsed() < MIN_PAINT_INTERVAL {
            return;
        }
        let Some(world) = sh.world.clone() else {
            return;
        };
        sh.last_paint = Instant::now();
        drop(sh);

        let (width, height) = world.dimensions();
        let len = (width as usize) * (height as usize);
        let mut pixels = self.inner.pool_rx.try_recv().unwrap_or_default();
        pixels.clear();
        pixels.resize(len, 0);
        // Rendering can be slow; keep it outside the coarse lock.
        world.render(&mut pixels);

        let mut sh = self.inner.shared.lock();
        let superseded = sh.image_for_sending.replace(RenderedImage {
            width,
            height,
            pixels,
        });
        drop(sh);
        if let Some(old) = superseded {
            // Back into the pool; dropped if the pool is already full.
            let _ = self.inner.pool_tx.try_send(old.pixels);
        }
    }

    /// Block the calling (execution) thread until the primary answers, the
    /// ask is abandoned, or the process shuts down. Abandonment yields an
    /// empty answer, never an error.
    pub fn ask(&self, prompt: &str) -> String {
        let mut sh = self.inner.shared.lock();
        let id = sh.last_ack.max(0) + 1;
        sh.ask = Some(AskState {
            id,
            prompt: prompt.to_owned(),
            answer: None,
            abandoned: false,
        });
        loop {
            let outcome = {
                let state = sh.ask.as_mut().expect("ask in progress");
                if let Some(text) = state.answer.take() {
                    Some(text)
                } else if state.abandoned {
                    Some(String::new())
                } else {
                    None
                }
            };
            if let Some(text) = outcome {
                sh.ask = None;
                return text;
            }
            self.inner.ask_signal.wait(&mut sh);
        }
    }

    /// Unblock a waiting `ask` with an empty answer. Used when the primary
    /// cancels the prompt or the channel is going away.
    pub fn abandon_ask(&self) {
        let mut sh = self.inner.shared.lock();
        if let Some(state) = sh.ask.as_mut() {
            state.abandoned = true;
            self.inner.ask_signal.notify_all();
        }
    }

    /// User code raised an uncaught error; count it and force a paint so the
    /// primary sees the world state that produced it.
    pub fn notify_error(&self) {
        self.inner.shared.lock().error_count += 1;
        self.paint(PaintWhen::Force);
    }

    pub fn user_code_starting(&self) {
        self.inner.shared.lock().user_code_started_at = now_millis();
    }

    pub fn user_code_stopped(&self, suggest_repaint: bool) {
        self.inner.shared.lock().user_code_started_at = 0;
        if suggest_repaint {
            self.paint(PaintWhen::Force);
        }
    }

    pub fn delay_loop_entered(&self) {
        self.inner.shared.lock().delay_loop_active = true;
    }

    pub fn delay_loop_completed(&self) {
        self.inner.shared.lock().delay_loop_active = false;
    }

    /// Mark the process ready for interactive invocations from the primary.
    pub fn mark_ready(&self) {
        self.inner.shared.lock().ready = true;
    }

    /// Record a simulation-initiated speed change (command-driven changes are
    /// recorded during dispatch).
    pub fn set_speed(&self, speed: i32) {
        self.inner.shared.lock().speed = speed;
    }
}

impl SimInner {
    /// One full exchange with the primary. Entered and left holding the
    /// consumer lock; see `region` for the lock choreography.
    fn exchange(&self, sink: &mut dyn CommandSink, ls: &mut SimLoop) -> Result<(), ExchangeError> {
        self.region.lock(LockArea::Producer)?;

        let mut answer = None;
        let mut image_consumable = true;
        if self.region.word(PRODUCER_MARKER) < 0 {
            // Withhold a new image until the previous one was picked up, so
            // the primary never observes a half-superseded frame.
            image_consumable = self.region.word(PRODUCER_LAST_CONSUMED) >= ls.last_paint_seq;
            let decoded = self
                .region
                .with_words(PRODUCER_COMMAND_COUNT..CONSUMER_OFFSET, |words| {
                    decode_commands(words)
                });
            match decoded {
                Ok(batch) => {
                    if let Some(seq) = batch.last_seq {
                        self.shared.lock().last_ack = seq;
                    }
                    for command in batch.commands {
                        self.dispatch(sink, command, &mut answer);
                    }
                }
                Err(err) => warn!(%err, "could not decode command batch"),
            }
        }

        let (mut image, status) = {
            let mut sh = self.shared.lock();
            // Never send a buffered image of a world that has disappeared.
            let image = if sh.world.is_some() && image_consumable {
                sh.image_for_sending.take()
            } else {
                None
            };
            let ask = match (&sh.ask, &answer) {
                (Some(state), None) if state.answer.is_none() && !state.abandoned => {
                    Some(AskRequest {
                        id: state.id,
                        prompt: state.prompt.clone(),
                    })
                }
                _ => None,
            };
            let status = ConsumerStatus {
                last_ack_command: sh.last_ack,
                error_count: sh.error_count,
                user_code_started_at: sh.user_code_started_at,
                speed: sh.speed,
                world_counter: if sh.world.is_some() { sh.world_counter } else { 0 },
                cell_size: sh.world.as_ref().map_or(0, |world| world.cell_size()),
                ask,
                delay_loop_active: sh.delay_loop_active,
                ready_for_invocations: sh.ready,
            };
            (image, status)
        };

        let seq = ls.seq;
        let total_words = self.region.len() / WORD_BYTES;
        let encoded = self
            .region
            .with_words(CONSUMER_OFFSET..total_words, |words| {
                if let Some(img) = &image {
                    let frame = ImageFrame {
                        width: img.width,
                        height: img.height,
                        pixels: &img.pixels,
                    };
                    match encode_consumer_frame(
                        words,
                        seq,
                        Some(frame),
                        ls.last_paint_seq,
                        ls.last_paint_words,
                        &status,
                    ) {
                        Ok(words_written) => return Ok(Some(words_written)),
                        Err(err @ WireError::ProtocolOverflow { .. }) => {
                            // Fatal for this frame only: drop the image and
                            // still publish telemetry. The message names the
                            // remedy; repeat occurrences stay quiet.
                            if !ls.overflow_reported {
                                error!("{err}");
                                ls.overflow_reported = true;
                            }
                        }
                        Err(other) => return Err(other),
                    }
                }
                encode_consumer_frame(words, seq, None, ls.last_paint_seq, ls.last_paint_words, &status)
                    .map(|_| None)
            });

        match encoded {
            Ok(Some(words_written)) => {
                ls.last_paint_seq = seq;
                ls.last_paint_words = words_written;
                ls.overflow_reported = false;
                if let Some(img) = image.take() {
                    let _ = self.pool_tx.try_send(img.pixels);
                }
            }
            Ok(None) => {
                if let Some(img) = image.take() {
                    let _ = self.pool_tx.try_send(img.pixels);
                }
            }
            Err(err) => warn!(%err, "could not encode consumer frame"),
        }
        ls.seq += 1;

        self.region.unlock(LockArea::Consumer)?;
        self.region.lock(LockArea::Sync)?;
        self.region.unlock(LockArea::Producer)?;
        self.region.lock(LockArea::Consumer)?;
        self.region.unlock(LockArea::Sync)?;

        if let Some(text) = answer {
            self.got_ask_answer(text);
        }
        Ok(())
    }

    fn dispatch(&self, sink: &mut dyn CommandSink, command: Command, answer: &mut Option<String>) {
        match command.payload {
            CommandPayload::KeyDown { code, text } => sink.key_down(code, &text),
            CommandPayload::KeyUp { code, text } => sink.key_up(code, &text),
            CommandPayload::KeyTyped { code, text } => sink.key_typed(code, &text),
            CommandPayload::Mouse {
                action,
                x,
                y,
                button,
                click_count,
            } => sink.mouse_event(action, x, y, button, click_count),
            CommandPayload::Run => sink.set_paused(false),
            CommandPayload::Pause => sink.set_paused(true),
            CommandPayload::StepOnce => sink.step_once(),
            CommandPayload::InstantiateWorld { class_name } => sink.instantiate_world(&class_name),
            CommandPayload::DiscardWorld => sink.discard_world(),
            CommandPayload::ContinueDrag { drag_id, x, y } => sink.continue_drag(drag_id, x, y),
            CommandPayload::EndDrag { drag_id } => sink.end_drag(drag_id),
            CommandPayload::AskAnswered { answer: text } => *answer = Some(text),
            CommandPayload::PropertyChanged { key, value } => {
                sink.property_changed(&key, value.as_deref())
            }
            CommandPayload::SetSpeed { speed } => {
                self.shared.lock().speed = speed;
                sink.set_speed(speed);
            }
            CommandPayload::WorldFocusGained => sink.world_focus_changed(true),
            CommandPayload::WorldFocusLost => sink.world_focus_changed(false),
        }
    }

    fn got_ask_answer(&self, text: String) {
        let mut sh = self.shared.lock();
        if let Some(state) = sh.ask.as_mut() {
            state.answer = Some(text);
            self.ask_signal.notify_all();
        }
        // An answer with no ask in flight raced with an abandonment; drop it.
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
