//! Step sequencer — turns the pattern grid into timed trigger events.
//!
//! Live playback uses a lookahead window: each call to `collect_events`
//! computes the absolute times of the steps falling inside the window and
//! emits their events slightly ahead of their audible time, giving the
//! real-time thread slack. Offline rendering uses `expand_pattern`, which
//! lays out every event of a whole render deterministically.

use crate::pattern::Pattern;

/// What a scheduled event does when its time arrives.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// Start a voice. Accented steps arrive with peak velocity.
    Trigger {
        velocity: f64,
        note: Option<String>,
        slide: bool,
    },
    /// Close a pitched voice's gate.
    GateOff,
}

/// One scheduled event, absolute time in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    pub time: f64,
    pub step: usize,
    pub voice: String,
    pub kind: EventKind,
}

/// Seconds of one step: a sixteenth note.
pub fn step_duration(bpm: f64) -> f64 {
    60.0 / bpm / 4.0
}

/// Fraction of a gated step after which a pitched voice releases, unless the
/// following step slides into it.
const GATE_FRACTION: f64 = 0.9;

fn push_step_events(
    pattern: &Pattern,
    step_index: usize,
    time: f64,
    duration: f64,
    out: &mut Vec<ScheduledEvent>,
) {
    for (voice, track) in &pattern.tracks {
        let Some(step) = pattern.step_at(voice, step_index) else {
            continue;
        };
        // Accent forces peak velocity regardless of the stored value
        let velocity = if step.accent { 1.0 } else { step.velocity };
        out.push(ScheduledEvent {
            time,
            step: step_index % track.len(),
            voice: voice.clone(),
            kind: EventKind::Trigger {
                velocity,
                note: step.note.clone(),
                slide: step.slide,
            },
        });

        // Pitched steps hold their gate into the step; release early unless
        // the next step slides into this voice.
        if step.note.is_some() {
            let next = pattern.step_at(voice, step_index + 1);
            let next_slides = next.is_some_and(|s| s.slide);
            if !next_slides {
                out.push(ScheduledEvent {
                    time: time + duration * GATE_FRACTION,
                    step: step_index % track.len(),
                    voice: voice.clone(),
                    kind: EventKind::GateOff,
                });
            }
        }
    }
}

/// Lay out every event for `bars` bars of a pattern at the given tempo.
/// Events are sorted by time; equal times keep track order.
pub fn expand_pattern(pattern: &Pattern, bpm: f64, bars: usize, swing: f64) -> Vec<ScheduledEvent> {
    let steps_per_bar = crate::pattern::STEPS_PER_BAR;
    let base = step_duration(bpm);
    let swing = swing.clamp(0.0, 1.0);
    let total_steps = bars * steps_per_bar;

    let mut events = Vec::new();
    let mut time = 0.0;
    for step in 0..total_steps {
        let interval = if swing > 1e-4 {
            let factor = swing * 0.5;
            base * if step % 2 == 1 { 1.0 + factor } else { 1.0 - factor }
        } else {
            base
        };
        push_step_events(pattern, step, time, interval, &mut events);
        time += interval;
    }
    events.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(std::cmp::Ordering::Equal));
    events
}

/// Live-mode sequencer with lookahead scheduling.
#[derive(Debug, Clone, Default)]
pub struct StepSequencer {
    pattern: Option<Pattern>,
    bpm: f64,
    swing: f64,
    running: bool,
    current_step: usize,
    next_step_time: f64,
}

impl StepSequencer {
    pub fn new(bpm: f64) -> Self {
        StepSequencer {
            pattern: None,
            bpm: bpm.max(1.0),
            swing: 0.0,
            running: false,
            current_step: 0,
            next_step_time: 0.0,
        }
    }

    pub fn set_pattern(&mut self, pattern: Pattern) {
        self.pattern = Some(pattern);
        self.current_step = 0;
    }

    pub fn pattern(&self) -> Option<&Pattern> {
        self.pattern.as_ref()
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.bpm = bpm.max(1.0);
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn set_swing(&mut self, amount: f64) {
        self.swing = amount.clamp(0.0, 1.0);
    }

    pub fn swing(&self) -> f64 {
        self.swing
    }

    /// Begin playback; the first step lands at `at_time`.
    pub fn start(&mut self, at_time: f64) {
        self.running = true;
        self.current_step = 0;
        self.next_step_time = at_time;
    }

    /// Stop playback and drop any pending scheduled state.
    pub fn stop(&mut self) {
        self.running = false;
        self.current_step = 0;
        self.next_step_time = 0.0;
    }

    pub fn is_playing(&self) -> bool {
        self.running
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    fn step_interval(&self, step: usize) -> f64 {
        let base = step_duration(self.bpm);
        if self.swing <= 1e-4 {
            return base;
        }
        let factor = self.swing * 0.5;
        base * if step % 2 == 1 { 1.0 + factor } else { 1.0 - factor }
    }

    /// Emit events for every step whose time falls before `now + lookahead`.
    /// The step cursor advances past everything emitted, so repeated calls
    /// never duplicate events.
    pub fn collect_events(&mut self, now: f64, lookahead: f64, out: &mut Vec<ScheduledEvent>) {
        if !self.running {
            return;
        }
        let Some(pattern) = self.pattern.clone() else {
            return;
        };
        let steps = pattern.len();
        if steps == 0 {
            return;
        }
        while self.next_step_time < now + lookahead {
            let interval = self.step_interval(self.current_step);
            push_step_events(&pattern, self.current_step, self.next_step_time, interval, out);
            self.next_step_time += interval;
            self.current_step = (self.current_step + 1) % steps;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{Step, STEPS_PER_BAR};

    fn kick_on_step_zero() -> Pattern {
        let mut markers = [0u8; STEPS_PER_BAR];
        markers[0] = 1;
        let mut p = Pattern::new();
        p.set_track("kick", Pattern::track_from_markers(markers));
        p
    }

    fn triggers(events: &[ScheduledEvent]) -> Vec<&ScheduledEvent> {
        events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Trigger { .. }))
            .collect()
    }

    #[test]
    fn single_kick_schedules_one_trigger_at_zero() {
        let events = expand_pattern(&kick_on_step_zero(), 120.0, 1, 0.0);
        let hits = triggers(&events);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].voice, "kick");
        assert_eq!(hits[0].time, 0.0);
        assert_eq!(hits[0].step, 0);
    }

    #[test]
    fn step_times_follow_the_grid() {
        let mut markers = [0u8; STEPS_PER_BAR];
        markers[0] = 1;
        markers[4] = 1;
        markers[8] = 1;
        let mut p = Pattern::new();
        p.set_track("snare", Pattern::track_from_markers(markers));

        let events = expand_pattern(&p, 120.0, 1, 0.0);
        let hits = triggers(&events);
        // At 120 bpm a step is 0.125s
        assert_eq!(hits.len(), 3);
        assert!((hits[0].time - 0.0).abs() < 1e-12);
        assert!((hits[1].time - 0.5).abs() < 1e-12);
        assert!((hits[2].time - 1.0).abs() < 1e-12);
    }

    #[test]
    fn pattern_wraps_across_bars() {
        let events = expand_pattern(&kick_on_step_zero(), 120.0, 2, 0.0);
        let hits = triggers(&events);
        assert_eq!(hits.len(), 2);
        // Bar two starts after 16 steps * 0.125s
        assert!((hits[1].time - 2.0).abs() < 1e-9);
        assert_eq!(hits[1].step, 0);
    }

    #[test]
    fn accent_forces_peak_velocity() {
        let mut p = Pattern::new();
        p.set_track("kick", vec![Step::accent(0.4); 1]);
        let events = expand_pattern(&p, 120.0, 1, 0.0);
        for event in triggers(&events) {
            let EventKind::Trigger { velocity, .. } = &event.kind else {
                unreachable!()
            };
            assert_eq!(*velocity, 1.0, "accent should substitute peak velocity");
        }
    }

    #[test]
    fn silent_steps_schedule_nothing() {
        let mut p = Pattern::new();
        p.set_track("kick", vec![Step::rest(); STEPS_PER_BAR]);
        assert!(expand_pattern(&p, 120.0, 1, 0.0).is_empty());
    }

    #[test]
    fn pitched_steps_get_gate_offs() {
        let mut track = vec![Step::rest(); STEPS_PER_BAR];
        track[0] = Step::note("C2", false, false);
        let mut p = Pattern::new();
        p.set_track("bass", track);

        let events = expand_pattern(&p, 120.0, 1, 0.0);
        let offs: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventKind::GateOff)
            .collect();
        assert_eq!(offs.len(), 1);
        assert!((offs[0].time - 0.125 * 0.9).abs() < 1e-9);
    }

    #[test]
    fn slide_suppresses_the_gate_off() {
        let mut track = vec![Step::rest(); STEPS_PER_BAR];
        track[0] = Step::note("C2", false, false);
        track[1] = Step::note("E2", false, true); // slides into from step 0
        let mut p = Pattern::new();
        p.set_track("bass", track);

        let events = expand_pattern(&p, 120.0, 1, 0.0);
        let offs: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventKind::GateOff)
            .collect();
        // Step 0 holds through (next slides); step 1 releases normally
        assert_eq!(offs.len(), 1);
        assert!(offs[0].time > 0.125);
    }

    #[test]
    fn swing_shifts_offbeat_timing() {
        let mut markers = [0u8; STEPS_PER_BAR];
        markers[1] = 1;
        let mut p = Pattern::new();
        p.set_track("hat", Pattern::track_from_markers(markers));

        let straight = expand_pattern(&p, 120.0, 1, 0.0);
        let swung = expand_pattern(&p, 120.0, 1, 0.6);
        // Step 1 starts after step 0's interval, which swing shortens
        assert!(triggers(&swung)[0].time < triggers(&straight)[0].time);
    }

    #[test]
    fn lookahead_collects_without_duplicates() {
        let mut seq = StepSequencer::new(120.0);
        seq.set_pattern(kick_on_step_zero());
        seq.start(0.0);

        let mut events = Vec::new();
        seq.collect_events(0.0, 0.3, &mut events);
        // Window [0, 0.3) covers steps at 0, 0.125, 0.25 — one kick at 0
        assert_eq!(triggers(&events).len(), 1);
        assert_eq!(seq.current_step(), 3);

        let mut more = Vec::new();
        seq.collect_events(0.0, 0.3, &mut more);
        assert!(more.is_empty(), "window already scheduled");

        // Sliding the window forward picks up the wrap at 2.0s
        let mut next = Vec::new();
        seq.collect_events(1.95, 0.1, &mut next);
        assert_eq!(triggers(&next).len(), 1);
    }

    #[test]
    fn stop_clears_pending_state() {
        let mut seq = StepSequencer::new(120.0);
        seq.set_pattern(kick_on_step_zero());
        seq.start(0.0);
        let mut events = Vec::new();
        seq.collect_events(0.0, 0.2, &mut events);
        assert!(seq.is_playing());

        seq.stop();
        assert!(!seq.is_playing());
        assert_eq!(seq.current_step(), 0);
        let mut after = Vec::new();
        seq.collect_events(10.0, 10.0, &mut after);
        assert!(after.is_empty(), "stopped sequencer schedules nothing");
    }
}
