/*! The repeater state machine.

Once every poll period the controller samples the port and runs, in this
order:

1. fan control,
2. muting on DTMF and on loss of carrier,
3. keyup on carrier or remote link,
4. the short-key latch,
5. the courtesy tone,
6. the station ID,
7. unkey.

All timers are monotonic wall clock, not tick counts, so a dropped or late
tick only delays a decision, it doesn't change it. Hardware and helper
program errors are logged and the tick carries on with the flags as they
were; nothing in here is retried synchronously.
*/
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::Result;
use crate::config::Timing;
use crate::pins::{Inputs, PinController};
use crate::sequencer::{Sequencer, Slot, SlotStatus};

/// Station ID state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPhase {
    /// Nothing owed yet. Only at startup.
    Idle,
    /// An ID is owed now; forced after the yield time.
    ImmediatePending,
    /// The repeat ID is owed; tucked in after the ID interval, forced after
    /// interval plus yield.
    DelayedPending,
    /// ID played.
    Played,
}

/// Courtesy tone state for the current transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourtesyPhase {
    /// Tone owed once the inputs drop.
    Pending,
    /// Played, or suppressed.
    Played,
}

/// Everything the control loop remembers between ticks.
#[derive(Debug, Clone)]
pub struct ControllerState {
    pub keyed: bool,
    pub muted: bool,
    pub fan_on: bool,

    /// Set once a keyup outlasted the short-key time. Until then a drop of
    /// the inputs unkeys without hang time.
    pub short_key_latched: bool,

    /// The remote link was the last thing to key us.
    pub link_was_key: bool,

    /// A helper program is playing; don't unkey.
    pub force_key_held: bool,

    /// Cleared by activity, set when an ID has played.
    pub id_played: bool,

    pub id_phase: IdPhase,
    pub courtesy_phase: CourtesyPhase,

    pub mute_timer: Instant,
    pub hang_timer: Instant,
    pub courtesy_timer: Instant,
    pub id_timer: Instant,
    pub short_key_timer: Instant,
    pub fan_timer: Instant,
}

impl ControllerState {
    /// Initial state: unkeyed, muted, everything else off, all timers at
    /// `now`.
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            keyed: false,
            muted: true,
            fan_on: false,
            short_key_latched: false,
            link_was_key: false,
            force_key_held: false,
            id_played: false,
            id_phase: IdPhase::Idle,
            courtesy_phase: CourtesyPhase::Played,
            mute_timer: now,
            hang_timer: now,
            courtesy_timer: now,
            id_timer: now,
            short_key_timer: now,
            fan_timer: now,
        }
    }
}

/** A handle to be able to stop the control loop. For example on SIGTERM.

```
use repeater::controller::CancellationToken;
let token = CancellationToken::new();
let tt = token.clone();
assert!(!token.is_canceled());
std::thread::spawn(move || tt.cancel()).join().unwrap();
assert!(token.is_canceled());
```
*/
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create new cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the token cancelled.
    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    /// Check if the token is cancelled.
    pub fn is_canceled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

/// Assign a flag from a pin operation, keeping the old value on error.
fn settle(flag: &mut bool, what: &str, r: Result<bool>) {
    match r {
        Ok(v) => *flag = v,
        Err(e) => warn!("Failed: {what}: {e}"),
    }
}

/// The repeater controller.
pub struct Controller {
    pins: PinController,
    seq: Sequencer,
    timing: Timing,
    inputs: Inputs,
    state: ControllerState,
}

impl Controller {
    /// Create controller, forcing the transmitter unkeyed and the audio
    /// muted.
    pub fn new(mut pins: PinController, seq: Sequencer, timing: Timing, now: Instant) -> Self {
        let mut state = ControllerState::new(now);
        settle(&mut state.keyed, "unkey", pins.unkey());
        settle(&mut state.muted, "mute", pins.mute());
        Self {
            pins,
            seq,
            timing,
            inputs: Inputs::default(),
            state,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Inputs as of the last successful read.
    #[must_use]
    pub fn inputs(&self) -> &Inputs {
        &self.inputs
    }

    /// Sequencer, for looking at the slots.
    #[must_use]
    pub fn sequencer(&self) -> &Sequencer {
        &self.seq
    }

    /// Run one poll cycle at time `now`.
    pub fn tick(&mut self, now: Instant) {
        match self.pins.read_inputs() {
            Ok(i) => self.inputs = i,
            // Carry on with the last inputs.
            Err(e) => warn!("Can't read parallel port: {e}"),
        }
        self.fan(now);
        self.mute(now);
        self.keyup(now);
        self.short_key(now);
        self.courtesy(now);
        self.force_key();
        self.ident(now);
        self.force_key();
        self.unkey(now);
    }

    /// Poll until cancelled, one tick per poll period.
    pub fn run(&mut self, cancel: &CancellationToken) {
        info!("Running, poll period {:?}", self.timing.poll);
        let mut next = Instant::now();
        while !cancel.is_canceled() {
            self.tick(Instant::now());
            log::logger().flush();

            next += self.timing.poll;
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            } else {
                // Overran. Don't try to catch up with a burst of ticks.
                next = now;
            }
        }
    }

    /// Stop helper programs, unkey and mute.
    pub fn shutdown(&mut self) {
        info!("Shutting down");
        self.seq.stop_all();
        self.state.force_key_held = false;
        settle(&mut self.state.keyed, "unkey", self.pins.unkey());
        settle(&mut self.state.muted, "mute", self.pins.mute());
    }

    fn since(now: Instant, t: Instant) -> Duration {
        now.saturating_duration_since(t)
    }

    fn fan(&mut self, now: Instant) {
        let s = &mut self.state;
        if s.keyed && !s.fan_on {
            settle(&mut s.fan_on, "fanon", self.pins.fan_on());
        }
        if !s.keyed && s.fan_on && Self::since(now, s.fan_timer) > self.timing.fan_delay {
            settle(&mut s.fan_on, "fanoff", self.pins.fan_off());
        }
        // Fan delay counts from the last unkey.
        if s.keyed {
            s.fan_timer = now;
        }
    }

    fn mute(&mut self, now: Instant) {
        let s = &mut self.state;
        let i = &self.inputs;
        if i.carrier {
            if i.dtmf_busy() {
                if !s.muted {
                    settle(&mut s.muted, "mute", self.pins.mute());
                }
                s.mute_timer = now;
            } else if s.muted && Self::since(now, s.mute_timer) > self.timing.mute {
                settle(&mut s.muted, "unmute", self.pins.unmute());
            }
        } else if !s.muted {
            // No carrier, no noise burst.
            settle(&mut s.muted, "mute", self.pins.mute());
        }
    }

    fn keyup(&mut self, now: Instant) {
        let s = &mut self.state;
        let i = &self.inputs;
        if !i.active() {
            return;
        }
        if !s.keyed {
            settle(&mut s.keyed, "keyup", self.pins.key());
            s.short_key_timer = now;
        }
        s.hang_timer = now;
        s.courtesy_timer = now;
        s.courtesy_phase = CourtesyPhase::Pending;
        s.id_played = false;
        if i.link_key {
            s.link_was_key = true;
        }
    }

    fn short_key(&mut self, now: Instant) {
        let s = &mut self.state;
        if self.inputs.active()
            && !s.short_key_latched
            && Self::since(now, s.short_key_timer) > self.timing.short_key
        {
            s.short_key_latched = true;
        }
    }

    fn launch(&mut self, slot: Slot) {
        match self.seq.trigger(slot) {
            Ok(true) => self.state.force_key_held = true,
            Ok(false) => {}
            // Left as if never triggered; the next tick tries again.
            Err(e) => warn!("Failed: {slot}: {e}"),
        }
    }

    fn courtesy(&mut self, now: Instant) {
        let s = &self.state;
        if !self.inputs.active()
            && s.keyed
            && s.courtesy_phase == CourtesyPhase::Pending
            && !self.seq.is_live(Slot::Courtesy)
        {
            // The link holds the key a while after it drops, so it gets the
            // shorter delay.
            let delay = if s.link_was_key {
                self.timing.courtesy_link
            } else {
                self.timing.courtesy
            };
            if Self::since(now, s.courtesy_timer) > delay {
                self.launch(Slot::Courtesy);
            }
        }
        if self.seq.poll(Slot::Courtesy) == SlotStatus::Completed {
            self.state.courtesy_phase = CourtesyPhase::Played;
        }
    }

    fn ident(&mut self, now: Instant) {
        let t = &self.timing;
        let s = &mut self.state;
        match s.id_phase {
            IdPhase::Idle => {
                s.id_phase = IdPhase::ImmediatePending;
                s.id_timer = now;
                info!("Trigger: immediate ID");
            }
            IdPhase::Played
                if !s.id_played || Self::since(now, s.id_timer) > t.id_interval + t.id_yield =>
            {
                s.id_phase = IdPhase::DelayedPending;
                s.id_timer = now;
                info!("Trigger: delayed ID");
            }
            _ => {}
        }

        let pending = matches!(
            s.id_phase,
            IdPhase::ImmediatePending | IdPhase::DelayedPending
        );
        if pending && !self.seq.is_live(Slot::Id) {
            let since = Self::since(now, s.id_timer);
            let (tuck_ok, force_after) = match s.id_phase {
                IdPhase::DelayedPending => (since > t.id_interval, t.id_interval + t.id_yield),
                _ => (true, t.id_yield),
            };
            let gap = !self.inputs.active() && s.keyed && s.courtesy_phase == CourtesyPhase::Played;
            if gap && tuck_ok {
                debug!("ID tucked in behind courtesy tone");
                self.launch(Slot::Id);
            } else if since > force_after {
                if !s.keyed {
                    info!("Forcing ID");
                    settle(&mut s.keyed, "keyup", self.pins.key());
                }
                if self.state.keyed {
                    self.launch(Slot::Id);
                }
            }
        }

        if self.seq.poll(Slot::Id) == SlotStatus::Completed {
            self.state.id_played = true;
            self.state.id_phase = IdPhase::Played;
        }
    }

    /// Hold the key for as long as a helper program is live.
    fn force_key(&mut self) {
        self.state.force_key_held = self.seq.is_live(Slot::Courtesy) || self.seq.is_live(Slot::Id);
    }

    fn unkey(&mut self, now: Instant) {
        let s = &mut self.state;
        if self.inputs.active() || s.force_key_held || !s.keyed {
            return;
        }
        if !s.short_key_latched {
            settle(&mut s.keyed, "unkey", self.pins.unkey());
            if !s.keyed {
                // A glitch, not a transmission. No tone, and no ID owed.
                s.courtesy_phase = CourtesyPhase::Played;
                s.id_played = true;
                s.link_was_key = false;
                info!("Shortkey detected");
            }
        } else if Self::since(now, s.hang_timer) > self.timing.hang {
            settle(&mut s.keyed, "unkey", self.pins.unkey());
            if !s.keyed {
                s.link_was_key = false;
                s.short_key_latched = false;
            }
        }
    }
}
