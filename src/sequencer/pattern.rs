// Pattern - a grid of step events with overlap resolution

use crate::midi::status;
use crate::sequencer::event::StepEvent;
use crate::sequencer::timebase::CLOCKS_PER_BEAT;
use serde::{Deserialize, Serialize};

/// Grid resolutions that divide the 24 MIDI clocks of a beat evenly.
pub const STEPS_PER_BEAT_CHOICES: [u32; 8] = [1, 2, 3, 4, 6, 8, 12, 24];

const DEFAULT_BEATS: u32 = 4;
const DEFAULT_STEPS_PER_BEAT: u32 = 4;
/// Shortest duration a bulk edit may leave behind, in steps.
const MIN_DURATION: f32 = 0.1;

/// An ordered container of step events.
///
/// Events stay sorted by position; equal positions keep insertion order.
/// Adding an event evicts anything of the same `(command, value1)` whose
/// span overlaps the new one, so a step never carries two conflicting
/// messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    beats: u32,
    steps_per_beat: u32,
    scale: u8,
    tonic: u8,
    ref_note: u8,
    events: Vec<StepEvent>,
}

impl Pattern {
    pub fn new(beats: u32, steps_per_beat: u32) -> Self {
        let mut pattern = Self {
            beats,
            steps_per_beat: DEFAULT_STEPS_PER_BEAT,
            scale: 0,
            tonic: 0,
            ref_note: 60,
            events: Vec::new(),
        };
        pattern.set_steps_per_beat(steps_per_beat);
        pattern
    }

    /// Total step count of the grid.
    pub fn steps(&self) -> u32 {
        self.beats * self.steps_per_beat
    }

    /// Musical length in MIDI clocks.
    pub fn length_clocks(&self) -> u32 {
        self.beats * CLOCKS_PER_BEAT
    }

    pub fn clocks_per_step(&self) -> u32 {
        CLOCKS_PER_BEAT / self.steps_per_beat
    }

    pub fn beats(&self) -> u32 {
        self.beats
    }

    pub fn steps_per_beat(&self) -> u32 {
        self.steps_per_beat
    }

    /// Removes events overlapping the new one on `(command, value1)`, then
    /// inserts keeping the position ordering (after equal positions).
    fn add_event(&mut self, event: StepEvent) -> &mut StepEvent {
        let start = event.position();
        let end = event.end();
        self.events.retain(|ev| {
            !(ev.overlaps(start, end)
                && ev.command() == event.command()
                && ev.value1_start() == event.value1_start())
        });
        let idx = self
            .events
            .partition_point(|ev| ev.position() <= event.position());
        self.events.insert(idx, event);
        &mut self.events[idx]
    }

    fn delete_event(&mut self, position: u32, command: u8, value1: u8) {
        if let Some(idx) = self.events.iter().position(|ev| {
            ev.position() == position && ev.command() == command && ev.value1_start() == value1
        }) {
            self.events.remove(idx);
        }
    }

    /// Adds a note at a step. Fails on out-of-range step, note or velocity.
    pub fn add_note(&mut self, step: u32, note: u8, velocity: u8, duration: f32) -> bool {
        if step >= self.steps() || note > 127 || velocity > 127 || duration <= 0.0 {
            return false;
        }
        self.add_event(StepEvent::new(step, status::NOTE_ON, note, velocity, duration));
        true
    }

    pub fn remove_note(&mut self, step: u32, note: u8) {
        self.delete_event(step, status::NOTE_ON, note);
    }

    fn find_note(&self, step: u32, note: u8) -> Option<&StepEvent> {
        self.events.iter().find(|ev| {
            ev.position() == step && ev.command() == status::NOTE_ON && ev.value1_start() == note
        })
    }

    pub fn note_velocity(&self, step: u32, note: u8) -> Option<u8> {
        self.find_note(step, note).map(|ev| ev.value2_start())
    }

    pub fn set_note_velocity(&mut self, step: u32, note: u8, velocity: u8) {
        if velocity > 127 {
            return;
        }
        if let Some(ev) = self.events.iter_mut().find(|ev| {
            ev.position() == step && ev.command() == status::NOTE_ON && ev.value1_start() == note
        }) {
            ev.set_value2_start(velocity);
        }
    }

    pub fn note_duration(&self, step: u32, note: u8) -> Option<f32> {
        if step >= self.steps() {
            return None;
        }
        self.find_note(step, note).map(|ev| ev.duration())
    }

    /// Start step of the note sounding at `step`, looking back through held
    /// notes.
    pub fn note_start(&self, step: u32, note: u8) -> Option<u32> {
        self.events
            .iter()
            .find(|ev| {
                ev.command() == status::NOTE_ON
                    && ev.value1_start() == note
                    && ev.position() <= step
                    && ev.end().ceil() as u32 > step
            })
            .map(|ev| ev.position())
    }

    /// Adds a program change; at most one PC per step.
    pub fn add_program_change(&mut self, step: u32, program: u8) -> bool {
        if step >= self.steps() || program > 127 {
            return false;
        }
        self.remove_program_change(step);
        self.add_event(StepEvent::new(step, status::PROGRAM, program, 0, 1.0));
        true
    }

    pub fn remove_program_change(&mut self, step: u32) -> bool {
        let Some(program) = self.program_change(step) else {
            return false;
        };
        self.delete_event(step, status::PROGRAM, program);
        true
    }

    pub fn program_change(&self, step: u32) -> Option<u8> {
        self.events
            .iter()
            .find(|ev| ev.position() == step && ev.command() == status::PROGRAM)
            .map(|ev| ev.value1_start())
    }

    /// Adds a (possibly ramped) controller event.
    pub fn add_control(
        &mut self,
        step: u32,
        control: u8,
        value_start: u8,
        value_end: u8,
        duration: f32,
    ) -> bool {
        if step >= self.steps()
            || control > 127
            || value_start > 127
            || value_end > 127
            || duration <= 0.0
            || duration > self.steps() as f32
        {
            return false;
        }
        let ev = self.add_event(StepEvent::new(
            step,
            status::CONTROL,
            control,
            value_start,
            duration,
        ));
        ev.set_value2_end(value_end);
        true
    }

    pub fn remove_control(&mut self, step: u32, control: u8) {
        self.delete_event(step, status::CONTROL, control);
    }

    /// Shifts every note by `semitones`. All-or-nothing: if any note would
    /// leave 0..=127 the pattern is left untouched.
    pub fn transpose(&mut self, semitones: i8) {
        let out_of_range = self
            .events
            .iter()
            .filter(|ev| ev.command() == status::NOTE_ON)
            .any(|ev| {
                let note = ev.value1_start() as i32 + semitones as i32;
                !(0..=127).contains(&note)
            });
        if out_of_range {
            return;
        }
        for ev in &mut self.events {
            if ev.command() == status::NOTE_ON {
                let note = (ev.value1_start() as i32 + semitones as i32) as u8;
                ev.set_value1(note);
            }
        }
    }

    /// Adds `delta` to every note velocity, clamped to 1..=127.
    pub fn change_velocity_all(&mut self, delta: i32) {
        for ev in &mut self.events {
            if ev.command() != status::NOTE_ON {
                continue;
            }
            let velocity = (ev.value2_start() as i32 + delta).clamp(1, 127);
            ev.set_value2_start(velocity as u8);
        }
    }

    /// Adds `delta` steps to every note duration. All-or-nothing: a delta
    /// that would drive any duration to zero or below leaves the pattern
    /// unchanged; surviving durations are floored at 0.1 steps.
    pub fn change_duration_all(&mut self, delta: f32) {
        let underflow = self
            .events
            .iter()
            .filter(|ev| ev.command() == status::NOTE_ON)
            .any(|ev| ev.duration() + delta <= 0.0);
        if underflow {
            return;
        }
        for ev in &mut self.events {
            if ev.command() != status::NOTE_ON {
                continue;
            }
            let duration = (ev.duration() + delta).max(MIN_DURATION);
            ev.set_duration(duration);
        }
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Changes the grid resolution, rescaling every event's position and
    /// duration by the ratio of new to old resolution. Rejected values leave
    /// the pattern unchanged.
    pub fn set_steps_per_beat(&mut self, steps_per_beat: u32) -> bool {
        if !STEPS_PER_BEAT_CHOICES.contains(&steps_per_beat) {
            return false;
        }
        let scale = steps_per_beat as f32 / self.steps_per_beat as f32;
        self.steps_per_beat = steps_per_beat;
        for ev in &mut self.events {
            ev.set_position((ev.position() as f32 * scale).round() as u32);
            ev.set_duration(ev.duration() * scale);
        }
        true
    }

    /// Resizes the pattern; shrinking discards events past the new end.
    pub fn set_beats(&mut self, beats: u32) {
        if beats == 0 {
            return;
        }
        self.beats = beats;
        let steps = self.steps();
        self.events.retain(|ev| ev.position() < steps);
    }

    pub fn scale(&self) -> u8 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: u8) {
        self.scale = scale;
    }

    pub fn tonic(&self) -> u8 {
        self.tonic
    }

    pub fn set_tonic(&mut self, tonic: u8) {
        self.tonic = tonic;
    }

    pub fn ref_note(&self) -> u8 {
        self.ref_note
    }

    pub fn set_ref_note(&mut self, note: u8) {
        if note < 128 {
            self.ref_note = note;
        }
    }

    pub fn events(&self) -> &[StepEvent] {
        &self.events
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn event_at(&self, index: usize) -> Option<&StepEvent> {
        self.events.get(index)
    }

    pub fn first_event_at_step(&self, step: u32) -> Option<usize> {
        self.events.iter().position(|ev| ev.position() == step)
    }

    /// Events anchored exactly at a step, in insertion order.
    pub fn events_at_step(&self, step: u32) -> impl Iterator<Item = &StepEvent> {
        self.events.iter().filter(move |ev| ev.position() == step)
    }

    /// Highest occupied step, if any.
    pub fn last_step(&self) -> Option<u32> {
        self.events.iter().map(|ev| ev.position()).max()
    }
}

impl Default for Pattern {
    fn default() -> Self {
        Self::new(DEFAULT_BEATS, DEFAULT_STEPS_PER_BEAT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(pattern: &Pattern) -> Vec<u32> {
        pattern.events().iter().map(|ev| ev.position()).collect()
    }

    #[test]
    fn test_pattern_defaults() {
        let pattern = Pattern::default();
        assert_eq!(pattern.steps(), 16);
        assert_eq!(pattern.length_clocks(), 96);
        assert_eq!(pattern.clocks_per_step(), 6);
    }

    #[test]
    fn test_add_note_validation() {
        let mut pattern = Pattern::default();
        assert!(pattern.add_note(0, 60, 100, 1.0));
        assert!(!pattern.add_note(16, 60, 100, 1.0));
        assert!(!pattern.add_note(0, 128, 100, 1.0));
        assert!(!pattern.add_note(0, 60, 128, 1.0));
        assert!(!pattern.add_note(0, 60, 100, 0.0));
    }

    #[test]
    fn test_events_stay_sorted() {
        let mut pattern = Pattern::default();
        pattern.add_note(8, 60, 100, 1.0);
        pattern.add_note(0, 62, 100, 1.0);
        pattern.add_note(4, 64, 100, 1.0);
        assert_eq!(positions(&pattern), vec![0, 4, 8]);
    }

    #[test]
    fn test_overlapping_note_replaced() {
        let mut pattern = Pattern::default();
        pattern.add_note(0, 60, 80, 4.0);
        pattern.add_note(2, 60, 100, 4.0);
        assert_eq!(pattern.event_count(), 1);
        let ev = pattern.event_at(0).unwrap();
        assert_eq!(ev.position(), 2);
        assert_eq!(ev.value2_start(), 100);
    }

    #[test]
    fn test_add_note_idempotent() {
        let mut pattern = Pattern::default();
        pattern.add_note(3, 60, 100, 1.0);
        pattern.add_note(3, 60, 100, 1.0);
        assert_eq!(pattern.event_count(), 1);
    }

    #[test]
    fn test_different_notes_coexist_on_step() {
        let mut pattern = Pattern::default();
        pattern.add_note(0, 60, 100, 1.0);
        pattern.add_note(0, 64, 100, 1.0);
        pattern.add_note(0, 67, 100, 1.0);
        assert_eq!(pattern.event_count(), 3);
    }

    #[test]
    fn test_note_queries() {
        let mut pattern = Pattern::default();
        pattern.add_note(2, 60, 90, 3.0);
        assert_eq!(pattern.note_velocity(2, 60), Some(90));
        assert_eq!(pattern.note_velocity(2, 61), None);
        assert_eq!(pattern.note_duration(2, 60), Some(3.0));
        assert_eq!(pattern.note_start(4, 60), Some(2));
        assert_eq!(pattern.note_start(5, 60), None);
        pattern.set_note_velocity(2, 60, 127);
        assert_eq!(pattern.note_velocity(2, 60), Some(127));
        pattern.remove_note(2, 60);
        assert_eq!(pattern.note_velocity(2, 60), None);
    }

    #[test]
    fn test_program_change_one_per_step() {
        let mut pattern = Pattern::default();
        assert!(pattern.add_program_change(0, 5));
        assert!(pattern.add_program_change(0, 9));
        assert_eq!(pattern.program_change(0), Some(9));
        assert_eq!(
            pattern
                .events()
                .iter()
                .filter(|ev| ev.command() == status::PROGRAM)
                .count(),
            1
        );
        assert!(pattern.remove_program_change(0));
        assert_eq!(pattern.program_change(0), None);
        assert!(!pattern.remove_program_change(0));
    }

    #[test]
    fn test_control_ramp() {
        let mut pattern = Pattern::default();
        assert!(pattern.add_control(0, 7, 0, 127, 8.0));
        let ev = pattern.event_at(0).unwrap();
        assert_eq!(ev.command(), status::CONTROL);
        assert_eq!(ev.value2_start(), 0);
        assert_eq!(ev.value2_end(), 127);
        pattern.remove_control(0, 7);
        assert_eq!(pattern.event_count(), 0);
    }

    #[test]
    fn test_transpose_all_or_nothing() {
        let mut pattern = Pattern::default();
        pattern.add_note(0, 60, 100, 1.0);
        pattern.add_note(1, 126, 100, 1.0);
        pattern.transpose(4);
        // 126 + 4 is out of range, nothing moves
        assert_eq!(pattern.note_velocity(0, 60), Some(100));
        assert_eq!(pattern.note_velocity(1, 126), Some(100));
        pattern.transpose(-12);
        assert_eq!(pattern.note_velocity(0, 48), Some(100));
        assert_eq!(pattern.note_velocity(1, 114), Some(100));
    }

    #[test]
    fn test_change_velocity_all_clamps() {
        let mut pattern = Pattern::default();
        pattern.add_note(0, 60, 120, 1.0);
        pattern.add_note(1, 62, 10, 1.0);
        pattern.change_velocity_all(20);
        assert_eq!(pattern.note_velocity(0, 60), Some(127));
        assert_eq!(pattern.note_velocity(1, 62), Some(30));
        pattern.change_velocity_all(-100);
        assert_eq!(pattern.note_velocity(1, 62), Some(1));
    }

    #[test]
    fn test_change_duration_all() {
        let mut pattern = Pattern::default();
        pattern.add_note(0, 60, 100, 2.0);
        pattern.add_note(4, 62, 100, 0.5);
        pattern.change_duration_all(-1.0);
        // would push the second note to -0.5, nothing changes
        assert_eq!(pattern.note_duration(0, 60), Some(2.0));
        assert_eq!(pattern.note_duration(4, 62), Some(0.5));
        pattern.change_duration_all(1.0);
        assert_eq!(pattern.note_duration(0, 60), Some(3.0));
        assert_eq!(pattern.note_duration(4, 62), Some(1.5));
    }

    #[test]
    fn test_set_steps_per_beat_rescales() {
        let mut pattern = Pattern::default();
        pattern.add_note(4, 60, 100, 2.0);
        assert!(pattern.set_steps_per_beat(8));
        let ev = pattern.event_at(0).unwrap();
        assert_eq!(ev.position(), 8);
        assert_eq!(ev.duration(), 4.0);
        assert_eq!(pattern.steps(), 32);
    }

    #[test]
    fn test_set_steps_per_beat_rejects_invalid() {
        let mut pattern = Pattern::default();
        pattern.add_note(4, 60, 100, 2.0);
        assert!(!pattern.set_steps_per_beat(5));
        assert_eq!(pattern.steps_per_beat(), 4);
        assert_eq!(pattern.event_at(0).unwrap().position(), 4);
    }

    #[test]
    fn test_set_beats_truncates() {
        let mut pattern = Pattern::default();
        pattern.add_note(0, 60, 100, 1.0);
        pattern.add_note(7, 62, 100, 1.0);
        pattern.add_note(8, 64, 100, 1.0);
        pattern.set_beats(2);
        assert_eq!(pattern.steps(), 8);
        assert_eq!(positions(&pattern), vec![0, 7]);
        pattern.set_beats(0);
        assert_eq!(pattern.beats(), 2);
    }

    #[test]
    fn test_last_step_and_lookup() {
        let mut pattern = Pattern::default();
        assert_eq!(pattern.last_step(), None);
        pattern.add_note(3, 60, 100, 1.0);
        pattern.add_note(11, 64, 100, 1.0);
        assert_eq!(pattern.last_step(), Some(11));
        assert_eq!(pattern.first_event_at_step(11), Some(1));
        assert_eq!(pattern.first_event_at_step(5), None);
        assert_eq!(pattern.events_at_step(3).count(), 1);
    }
}
