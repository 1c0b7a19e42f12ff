//! Primary-side channel endpoint.
//!
//! Owns the mapped backing file, queues outgoing commands and publishes
//! decoded simulation state to the GUI collaborator through
//! [`PrimaryComms::poll_frame`]. The exchange itself runs on a dedicated
//! thread which parks after every cycle and is woken by `poll_frame`, so the
//! exchange cadence is bounded by the consumer's own poll rate and never
//! spins.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use sim_proto::layout::{CONSUMER_OFFSET, PRODUCER_MARKER};
use sim_proto::{
    decode_consumer_frame, encode_commands, Command, CommandPayload, ConsumerStatus, FrameUpdate,
    MouseAction, WorldImage,
};

use super::region::{LockArea, RegionError, SharedRegion};
use super::ExchangeError;
use crate::telemetry;

/// Sequence-number headroom granted to a relaunched simulation process so
/// its frames can never collide with stale ones still held here.
const RELAUNCH_SEQ_MARGIN: i32 = 1000;

#[derive(Default)]
struct PrimaryState {
    pending: Vec<Command>,
    /// Set-speed commands currently in flight; while non-zero the speed echo
    /// from the simulation is suppressed so the slider does not jitter.
    set_speed_in_flight: usize,
    /// Ask id of the most recent answer we sent; asks at or below it are
    /// already answered and must not be surfaced again.
    last_answer: i32,
    /// Paint sequence of the image most recently handed out by `poll_frame`.
    last_consumed_image: i32,
    /// Latest telemetry decoded from the consumer area.
    status: ConsumerStatus,
    /// Speed value to report, frozen while a set-speed is in flight.
    reported_speed: i32,
    /// A decoded image awaiting pickup by `poll_frame`.
    fresh_image: Option<WorldImage>,
    world_changed: bool,
    world_present_after_change: bool,
    prev_world_counter: i32,
    worker_parked: bool,
}

struct Inner {
    region: SharedRegion,
    state: Mutex<PrimaryState>,
    /// Signalled by `poll_frame` (and shutdown) to release the parked worker.
    wake: Condvar,
    /// Signalled by the worker when it parks; `vm_terminated` waits on it.
    parked: Condvar,
    shutdown: AtomicBool,
    /// Last exchange sequence observed from the simulation side.
    last_seq: AtomicI32,
    next_command_seq: AtomicI32,
    /// Bumped on simulation-process relaunch; the worker resets its
    /// per-process decode state when it notices.
    epoch: AtomicU32,
}

/// Per-cycle state private to the exchange thread.
struct LoopState {
    epoch: u32,
    last_paint_seq: i32,
    last_image_words: usize,
}

impl LoopState {
    fn fresh(epoch: u32) -> Self {
        Self {
            epoch,
            last_paint_seq: -1,
            last_image_words: 0,
        }
    }
}

pub struct PrimaryComms {
    inner: Arc<Inner>,
    io_thread: Option<JoinHandle<()>>,
}

impl PrimaryComms {
    /// Create the backing file, take the producer and sync locks, and start
    /// the exchange thread.
    pub fn new(region_bytes: usize) -> Result<Self, RegionError> {
        let region = SharedRegion::create_temp(region_bytes)?;
        // Idle posture: the primary holds producer and sync between cycles.
        region.lock(LockArea::Producer)?;
        region.lock(LockArea::Sync)?;

        let mut state = PrimaryState::default();
        state.last_consumed_image = -1;
        state.status.last_ack_command = -1;
        state.last_answer = -1;

        let inner = Arc::new(Inner {
            region,
            state: Mutex::new(state),
            wake: Condvar::new(),
            parked: Condvar::new(),
            shutdown: AtomicBool::new(false),
            last_seq: AtomicI32::new(0),
            next_command_seq: AtomicI32::new(0),
            epoch: AtomicU32::new(0),
        });

        let worker = Arc::clone(&inner);
        let io_thread = std::thread::Builder::new()
            .name("vivarium-comms".into())
            .spawn(move || worker.run())
            .expect("spawn comms thread");

        Ok(Self {
            inner,
            io_thread: Some(io_thread),
        })
    }

    /// Path of the backing file, passed to the simulation process at launch.
    pub fn shared_file(&self) -> &std::path::Path {
        self.inner.region.path()
    }

    pub fn shared_file_size(&self) -> usize {
        self.inner.region.len()
    }

    /// Last exchange sequence received; a relaunched simulation process gets
    /// this plus a safety margin as its starting sequence.
    pub fn last_seq(&self) -> i32 {
        self.inner.last_seq.load(Ordering::SeqCst)
    }

    pub fn next_launch_seq(&self) -> i32 {
        self.last_seq() + RELAUNCH_SEQ_MARGIN
    }

    /// Decode whatever the simulation last published into a [`FrameUpdate`]
    /// and wake the exchange thread for another cycle. Never blocks on the
    /// channel itself.
    pub fn poll_frame(&self) -> FrameUpdate {
        let mut st = self.inner.state.lock();

        // Don't hand out an image of a world that has since been discarded.
        let should_draw = !st.world_changed || st.world_present_after_change;
        let image = if should_draw {
            st.fresh_image.take()
        } else {
            st.fresh_image = None;
            None
        };
        if let Some(img) = &image {
            st.last_consumed_image = img.paint_seq;
        }
        st.world_changed = false;

        let mut update = FrameUpdate::from_status(&st.status, image);
        update.speed = st.reported_speed;
        if update
            .ask
            .as_ref()
            .is_some_and(|ask| ask.id <= st.last_answer)
        {
            update.ask = None;
        }

        self.inner.wake.notify_one();
        update
    }

    fn enqueue(&self, payload: CommandPayload) {
        let mut st = self.inner.state.lock();
        // Sequence assignment happens under the queue lock so concurrent
        // senders cannot push records out of sequence order.
        let seq = self.inner.next_command_seq.fetch_add(1, Ordering::SeqCst) + 1;
        if matches!(payload, CommandPayload::SetSpeed { .. }) {
            st.set_speed_in_flight += 1;
        }
        st.pending.push(Command::new(seq, payload));
    }

    pub fn send_command(&self, payload: CommandPayload) {
        self.enqueue(payload);
    }

    pub fn run_simulation(&self) {
        self.enqueue(CommandPayload::Run);
    }

    pub fn pause_simulation(&self) {
        self.enqueue(CommandPayload::Pause);
    }

    pub fn step_once(&self) {
        self.enqueue(CommandPayload::StepOnce);
    }

    pub fn instantiate_world(&self, class_name: &str) {
        self.enqueue(CommandPayload::InstantiateWorld {
            class_name: class_name.to_owned(),
        });
    }

    pub fn discard_world(&self) {
        self.enqueue(CommandPayload::DiscardWorld);
    }

    pub fn continue_drag(&self, drag_id: i32, x: i32, y: i32) {
        self.enqueue(CommandPayload::ContinueDrag { drag_id, x, y });
    }

    pub fn end_drag(&self, drag_id: i32) {
        self.enqueue(CommandPayload::EndDrag { drag_id });
    }

    pub fn set_simulation_speed(&self, speed: i32) {
        self.enqueue(CommandPayload::SetSpeed { speed });
    }

    pub fn world_focus_changed(&self, focused: bool) {
        self.enqueue(if focused {
            CommandPayload::WorldFocusGained
        } else {
            CommandPayload::WorldFocusLost
        });
    }

    pub fn send_key_down(&self, code: i32, text: &str) {
        self.enqueue(CommandPayload::KeyDown {
            code,
            text: text.to_owned(),
        });
    }

    pub fn send_key_up(&self, code: i32, text: &str) {
        self.enqueue(CommandPayload::KeyUp {
            code,
            text: text.to_owned(),
        });
    }

    pub fn send_key_typed(&self, code: i32, text: &str) {
        self.enqueue(CommandPayload::KeyTyped {
            code,
            text: text.to_owned(),
        });
    }

    pub fn send_mouse_event(
        &self,
        action: MouseAction,
        x: i32,
        y: i32,
        button: i32,
        click_count: i32,
    ) {
        self.enqueue(CommandPayload::Mouse {
            action,
            x,
            y,
            button,
            click_count,
        });
    }

    /// Answer a pending ask. Records the id so the same ask is never
    /// surfaced again after the answer is on its way.
    pub fn send_answer(&self, ask_id: i32, answer: &str) {
        {
            let mut st = self.inner.state.lock();
            st.last_answer = ask_id;
        }
        self.enqueue(CommandPayload::AskAnswered {
            answer: answer.to_owned(),
        });
    }

    pub fn send_property(&self, key: &str, value: Option<&str>) {
        self.enqueue(CommandPayload::PropertyChanged {
            key: key.to_owned(),
            value: value.map(str::to_owned),
        });
    }

    /// The simulation process terminated. Reset channel state so a relaunched
    /// process starts from a clean region, with enough sequence headroom that
    /// none of its frames can be mistaken for stale ones.
    pub fn vm_terminated(&self) {
        let mut st = self.inner.state.lock();
        // Only touch the region while the worker is parked; it holds no
        // consistent view mid-cycle.
        while !st.worker_parked {
            self.inner.parked.wait(&mut st);
        }
        self.inner
            .last_seq
            .fetch_add(RELAUNCH_SEQ_MARGIN, Ordering::SeqCst);
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        st.pending.clear();
        st.set_speed_in_flight = 0;
        st.last_answer = -1;
        st.last_consumed_image = -1;
        st.fresh_image = None;
        st.status = ConsumerStatus {
            last_ack_command: -1,
            ..ConsumerStatus::default()
        };
        st.reported_speed = 0;
        st.world_changed = st.prev_world_counter != 0;
        st.world_present_after_change = false;
        st.prev_world_counter = 0;
        self.inner.region.zero();
    }
}

impl Drop for PrimaryComms {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        // Holding the state lock pins the worker either before its shutdown
        // check or inside the wait, so the wakeup cannot fall in between and
        // get lost.
        {
            let _st = self.inner.state.lock();
            self.inner.wake.notify_one();
        }
        if let Some(handle) = self.io_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Inner {
    fn run(self: Arc<Self>) {
        let mut loop_state = LoopState::fresh(self.epoch.load(Ordering::SeqCst));
        while !self.shutdown.load(Ordering::SeqCst) {
            let epoch = self.epoch.load(Ordering::SeqCst);
            if epoch != loop_state.epoch {
                loop_state = LoopState::fresh(epoch);
            }

            {
                let _guard = telemetry::PerfGuard::new("primary.exchange");
                if let Err(err) = self.cycle(&mut loop_state) {
                    warn!(%err, "exchange cycle failed; retrying");
                    self.recover_locks();
                }
            }

            // Park until the GUI collaborator polls, keeping the exchange
            // rate bounded by the consumer instead of spinning.
            let mut st = self.state.lock();
            st.worker_parked = true;
            self.parked.notify_all();
            if !self.shutdown.load(Ordering::SeqCst) {
                self.wake.wait(&mut st);
            }
            st.worker_parked = false;
        }
    }

    /// One full exchange: publish commands, hand the region to the
    /// simulation, read back its payload. Entered and left holding the
    /// producer and sync locks.
    fn cycle(&self, loop_state: &mut LoopState) -> Result<(), ExchangeError> {
        {
            let st = self.state.lock();
            let last_seq = self.last_seq.load(Ordering::SeqCst);
            let encoded = self
                .region
                .with_words(PRODUCER_MARKER..CONSUMER_OFFSET, |words| {
                    words[0] = -last_seq;
                    words[1] = st.last_consumed_image;
                    encode_commands(&mut words[2..], &st.pending)
                });
            if let Err(err) = encoded {
                // Skipping the write must not skip the handshake, or the
                // peer starves waiting on the producer lock.
                warn!(%err, "could not encode pending commands");
            }
        }

        self.region.unlock(LockArea::Producer)?;
        self.region.lock(LockArea::Consumer)?;
        self.region.unlock(LockArea::Sync)?;

        let total_words = self.region.len() / sim_proto::layout::WORD_BYTES;
        let decode_result = self
            .region
            .with_words(CONSUMER_OFFSET..total_words, |words| {
                let frame = decode_consumer_frame(words, loop_state.last_image_words)?;
                let image = frame.image.as_ref().and_then(|(width, height, range)| {
                    (frame.paint_seq != loop_state.last_paint_seq).then(|| WorldImage {
                        paint_seq: frame.paint_seq,
                        width: *width,
                        height: *height,
                        pixels: words[range.clone()].to_vec(),
                    })
                });
                Ok::<_, ExchangeError>((frame, image))
            });

        match decode_result {
            Ok((frame, image)) => {
                if frame.exchange_seq > self.last_seq.load(Ordering::SeqCst) {
                    self.last_seq.store(frame.exchange_seq, Ordering::SeqCst);
                    loop_state.last_image_words = frame.image_words;
                    self.apply(frame.status, image, loop_state);
                }
            }
            Err(err) => {
                // A truncated or torn frame is not fatal: restore the lock
                // posture and pick up the next exchange.
                debug!(%err, "could not decode consumer frame");
            }
        }

        self.region.lock(LockArea::Producer)?;
        self.region.unlock(LockArea::Consumer)?;
        self.region.lock(LockArea::Sync)?;
        Ok(())
    }

    fn apply(&self, status: ConsumerStatus, image: Option<WorldImage>, loop_state: &mut LoopState) {
        let mut st = self.state.lock();

        if let Some(img) = image {
            loop_state.last_paint_seq = img.paint_seq;
            st.fresh_image = Some(img);
        }

        // Drop every pending command the simulation has acknowledged.
        if status.last_ack_command != -1 {
            let ack = status.last_ack_command;
            st.pending.retain(|command| command.seq > ack);
            let speed_pending = st
                .pending
                .iter()
                .filter(|c| matches!(c.payload, CommandPayload::SetSpeed { .. }))
                .count();
            st.set_speed_in_flight = speed_pending;
        }

        if st.set_speed_in_flight == 0 {
            st.reported_speed = status.speed;
        }

        if status.world_counter != st.prev_world_counter {
            st.world_changed = true;
            st.world_present_after_change = status.world_counter != 0;
            st.prev_world_counter = status.world_counter;
        }

        st.status = status;
    }

    /// After a failed cycle the lock posture is unknown; re-establish the
    /// idle state (producer + sync held, consumer released). Errors here are
    /// logged and otherwise ignored, the next cycle retries regardless.
    fn recover_locks(&self) {
        if let Err(err) = self.region.lock(LockArea::Producer) {
            warn!(%err, "lock recovery failed");
        }
        let _ = self.region.unlock(LockArea::Consumer);
        if let Err(err) = self.region.lock(LockArea::Sync) {
            warn!(%err, "lock recovery failed");
        }
    }
}
