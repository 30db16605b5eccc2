//! End to end runs of the controller against simulated hardware.
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};

use repeater::Result;
use repeater::config::Timing;
use repeater::controller::{Controller, CourtesyPhase, IdPhase};
use repeater::pins::{OutputPin, PinController};
use repeater::port::PortDevice;
use repeater::sequencer::{Sequencer, Slot};
use repeater::sim::{JobsHook, PortHook, SimDevice, SimLock, SimRunner};

const TICK: u64 = 5;

struct Rig {
    ctl: Controller,
    port: PortHook,
    jobs: JobsHook,
    start: Instant,
    now: u64,
    unkeys: Vec<u64>,
}

impl Rig {
    fn new() -> Result<Self> {
        let (dev, port) = SimDevice::new();
        let (runner, jobs) = SimRunner::new();
        let pd = PortDevice::open(Box::new(dev), Box::new(SimLock::new()))?;
        let seq = Sequencer::new(Box::new(runner), "courtesy", "ider");
        let start = Instant::now();
        let ctl = Controller::new(PinController::new(pd), seq, Timing::default(), start);
        Ok(Self {
            ctl,
            port,
            jobs,
            start,
            now: 0,
            unkeys: Vec::new(),
        })
    }

    /// Tick at `ms` after start.
    fn at(&mut self, ms: u64) {
        let was = self.ctl.state().keyed;
        self.ctl.tick(self.start + Duration::from_millis(ms));
        self.now = ms;
        if was && !self.ctl.state().keyed {
            self.unkeys.push(ms);
        }
        self.check_invariants();
    }

    /// Tick every 5ms up to and including `to`.
    fn until(&mut self, to: u64) {
        while self.now + TICK <= to {
            let next = self.now + TICK;
            self.at(next);
        }
    }

    /// Like `until`, but every helper program exits as soon as it started.
    fn drain(&mut self, to: u64) {
        while self.now + TICK <= to {
            self.jobs.finish("courtesy");
            self.jobs.finish("ider");
            let next = self.now + TICK;
            self.at(next);
        }
    }

    fn keyed(&self) -> bool {
        self.ctl.state().keyed
    }

    fn check_invariants(&self) {
        let s = self.ctl.state();
        let seq = self.ctl.sequencer();
        if !s.keyed {
            assert!(
                !seq.is_live(Slot::Courtesy) && !seq.is_live(Slot::Id),
                "unkeyed with a sequence playing at {}ms",
                self.now
            );
        }
        assert!(self.jobs.live("courtesy") <= 1, "at {}ms", self.now);
        assert!(self.jobs.live("ider") <= 1, "at {}ms", self.now);
        assert_eq!(
            OutputPin::Key.is_on(self.port.data()),
            s.keyed,
            "key line disagrees with state at {}ms",
            self.now
        );
    }
}

#[test]
fn scenario_carrier_one_second() -> Result<()> {
    let mut r = Rig::new()?;
    r.port.set_carrier(true);
    r.at(0);
    assert!(r.keyed());
    assert!(r.ctl.state().muted);
    r.until(1000);
    assert!(r.ctl.state().short_key_latched);

    r.port.set_carrier(false);
    r.until(2000);
    assert_eq!(r.jobs.started("courtesy"), 0);
    r.at(2005);
    assert_eq!(r.jobs.started("courtesy"), 1);

    r.until(2100);
    r.jobs.finish("courtesy");
    r.at(2105);
    assert_eq!(r.ctl.state().courtesy_phase, CourtesyPhase::Played);

    // Startup ID is owed, and tucks in right behind the tone.
    assert_eq!(r.jobs.started("ider"), 1);
    r.until(2200);
    r.jobs.finish("ider");
    r.at(2205);
    assert_eq!(r.ctl.state().id_phase, IdPhase::Played);
    assert!(r.keyed());

    r.until(4000);
    assert!(r.keyed());
    r.at(4005);
    assert!(!r.keyed());
    r.until(10_000);
    assert_eq!(r.unkeys, vec![4005]);
    Ok(())
}

#[test]
fn short_pulse_drops_immediately() -> Result<()> {
    let mut r = Rig::new()?;
    r.at(0);
    r.port.set_carrier(true);
    r.at(5);
    assert!(r.keyed());
    r.port.set_carrier(false);
    r.at(10);
    assert!(!r.keyed());
    assert!(!r.ctl.state().short_key_latched);
    r.until(5000);
    assert_eq!(r.unkeys, vec![10]);
    assert_eq!(r.jobs.started("courtesy"), 0);
    Ok(())
}

#[test]
fn hang_time_from_last_activity() -> Result<()> {
    let mut r = Rig::new()?;
    r.port.set_carrier(true);
    r.at(0);
    r.until(500);
    // Conversational pause shorter than hang time.
    r.port.set_carrier(false);
    r.until(1200);
    r.port.set_carrier(true);
    r.until(2000);
    r.port.set_carrier(false);
    let last_active = r.now;

    r.drain(last_active + 10_000);
    assert_eq!(r.unkeys.len(), 1, "{:?}", r.unkeys);
    assert!(r.unkeys[0] > last_active + 3000);
    assert!(r.unkeys[0] <= last_active + 3000 + TICK);
    Ok(())
}

#[test]
fn startup_id_forced_after_yield() -> Result<()> {
    let mut r = Rig::new()?;
    assert_eq!(r.ctl.state().id_phase, IdPhase::Idle);
    r.at(0);
    assert_eq!(r.ctl.state().id_phase, IdPhase::ImmediatePending);

    // Idle channel; sparse ticks are fine, the timers are wall clock.
    let mut ms = 0;
    while ms + 1000 <= 480_000 {
        ms += 1000;
        r.at(ms);
    }
    assert_eq!(r.jobs.started("ider"), 0);
    assert!(!r.keyed());
    r.at(480_005);
    assert!(r.keyed());
    assert_eq!(r.jobs.started("ider"), 1);
    assert!(r.ctl.state().force_key_held);

    r.at(490_000);
    assert!(r.keyed());
    r.jobs.finish("ider");
    r.at(490_005);
    assert_eq!(r.ctl.state().id_phase, IdPhase::Played);
    assert!(r.ctl.state().id_played);
    assert!(!r.keyed());
    assert_eq!(r.jobs.started("courtesy"), 0);

    // Repeat requirement comes back after interval plus yield.
    r.at(1_680_000);
    assert_eq!(r.ctl.state().id_phase, IdPhase::Played);
    r.at(1_680_005);
    assert_eq!(r.ctl.state().id_phase, IdPhase::DelayedPending);
    r.at(1_680_005 + 1_680_000);
    assert_eq!(r.jobs.started("ider"), 1);
    r.at(1_680_010 + 1_680_000);
    assert_eq!(r.jobs.started("ider"), 2);
    assert!(r.keyed());
    Ok(())
}

#[test]
fn delayed_id_tucks_in_after_interval() -> Result<()> {
    let mut r = Rig::new()?;
    r.at(0);

    // A QSO; the startup ID goes out behind its courtesy tone.
    let qso = |r: &mut Rig, from: u64| {
        r.port.set_carrier(true);
        r.until(from + 2000);
        r.port.set_carrier(false);
        r.drain(from + 10_000);
        assert!(!r.keyed());
    };
    r.until(1000);
    qso(&mut r, 1000);
    assert_eq!(r.jobs.started("ider"), 1);
    assert_eq!(r.ctl.state().id_phase, IdPhase::Played);

    // Activity after the ID makes the repeat ID owed.
    r.until(60_000);
    qso(&mut r, 60_000);
    assert_eq!(r.ctl.state().id_phase, IdPhase::DelayedPending);
    assert_eq!(r.jobs.started("ider"), 1);
    let owed_at = 60_000;

    // Not tucked in before the interval is up.
    r.at(owed_at + 600_000);
    qso(&mut r, owed_at + 600_000);
    assert_eq!(r.jobs.started("ider"), 1);

    // After it, the next courtesy tone gets the ID behind it.
    r.at(owed_at + 1_210_000);
    qso(&mut r, owed_at + 1_210_000);
    assert_eq!(r.jobs.started("ider"), 2);
    assert_eq!(r.ctl.state().id_phase, IdPhase::Played);
    Ok(())
}

#[test]
fn link_gets_short_courtesy_delay() -> Result<()> {
    let mut r = Rig::new()?;
    r.at(0);
    r.port.set_link_key(true);
    r.at(5);
    assert!(r.keyed());
    assert!(r.ctl.state().link_was_key);
    r.until(500);
    r.port.set_link_key(false);
    r.until(800);
    assert_eq!(r.jobs.started("courtesy"), 0);
    r.at(805);
    assert_eq!(r.jobs.started("courtesy"), 1);

    r.drain(5000);
    assert!(!r.keyed());
    assert!(!r.ctl.state().link_was_key);

    // Local carrier afterwards is back on the long delay.
    r.port.set_carrier(true);
    r.until(6000);
    r.port.set_carrier(false);
    r.until(7000);
    assert_eq!(r.jobs.started("courtesy"), 1);
    r.at(7005);
    assert_eq!(r.jobs.started("courtesy"), 2);
    Ok(())
}

#[test]
fn idle_is_a_fixed_point() -> Result<()> {
    let mut r = Rig::new()?;
    r.at(0);
    let writes = r.port.writes();
    let claims_per_tick = {
        let before = r.port.claims();
        r.at(5);
        r.port.claims() - before
    };
    assert_eq!(claims_per_tick, 1, "idle tick should only read");
    r.until(100_000);
    assert_eq!(r.port.writes(), writes);
    assert_eq!(r.jobs.started("courtesy") + r.jobs.started("ider"), 0);
    assert!(!r.keyed());
    assert!(r.ctl.state().muted);
    Ok(())
}

#[test]
fn repeated_triggers_never_stack() -> Result<()> {
    let mut r = Rig::new()?;
    r.at(0);
    // Seeded, so a failure can be replayed.
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x1234_5678);
    let mut carrier = false;
    let mut link = false;
    while r.now < 600_000 {
        match rng.random_range(0..400) {
            0 => carrier = !carrier,
            1 => link = !link,
            2 => r.jobs.finish("courtesy"),
            3 => r.jobs.finish("ider"),
            4 => r.port.set_dtmf(rng.random_range(0..16)),
            _ => {}
        }
        r.port.set_carrier(carrier);
        r.port.set_link_key(link);
        let t = r.now + TICK;
        r.at(t);
    }
    assert!(r.jobs.started("courtesy") > 0);
    assert!(r.jobs.started("ider") > 0);
    Ok(())
}

#[test]
fn flaky_port_never_wedges() -> Result<()> {
    let mut r = Rig::new()?;
    r.at(0);
    r.port.set_carrier(true);
    r.until(1000);
    r.port.set_carrier(false);
    r.port.fail_claims(3);
    r.until(1100);
    r.port.fail_writes(2);
    r.drain(20_000);
    assert!(!r.keyed());
    assert!(!r.port.is_claimed());
    Ok(())
}

#[test]
fn unchecked_helper_is_stopped_before_unkey() -> Result<()> {
    let mut r = Rig::new()?;
    r.at(0);
    r.port.set_carrier(true);
    r.until(1000);
    r.port.set_carrier(false);
    r.until(2005);
    assert_eq!(r.jobs.started("courtesy"), 1);

    r.jobs.fail_checks(true);
    r.at(2010);
    assert_eq!(r.jobs.stopped("courtesy"), 1);
    assert_eq!(r.jobs.live("courtesy"), 0);
    r.jobs.fail_checks(false);
    r.drain(10_000);
    assert!(!r.keyed());
    assert_eq!(r.unkeys.len(), 1);
    Ok(())
}
