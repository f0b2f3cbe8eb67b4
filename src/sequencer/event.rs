// Step events - the atoms a pattern is made of

use serde::{Deserialize, Serialize};

/// One entry in a pattern's grid: a MIDI command anchored at a step with a
/// fractional-step duration.
///
/// `value1`/`value2` carry start and end variants so controllers can ramp;
/// discrete events keep `value1_end == value1_start`. For notes the end pair
/// is `(note, 0)`, so the event's closing message is a note-on with velocity
/// zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    position: u32,
    command: u8,
    value1_start: u8,
    value1_end: u8,
    value2_start: u8,
    value2_end: u8,
    duration: f32,
}

impl StepEvent {
    pub fn new(position: u32, command: u8, value1: u8, value2: u8, duration: f32) -> Self {
        Self {
            position,
            command,
            value1_start: value1,
            value1_end: value1,
            value2_start: value2,
            value2_end: 0,
            duration,
        }
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn set_position(&mut self, position: u32) {
        self.position = position;
    }

    pub fn command(&self) -> u8 {
        self.command
    }

    pub fn value1_start(&self) -> u8 {
        self.value1_start
    }

    pub fn value1_end(&self) -> u8 {
        self.value1_end
    }

    /// Sets both ends of the first data byte (notes keep start == end).
    pub fn set_value1(&mut self, value: u8) {
        self.value1_start = value;
        self.value1_end = value;
    }

    pub fn value2_start(&self) -> u8 {
        self.value2_start
    }

    pub fn set_value2_start(&mut self, value: u8) {
        self.value2_start = value;
    }

    pub fn value2_end(&self) -> u8 {
        self.value2_end
    }

    pub fn set_value2_end(&mut self, value: u8) {
        self.value2_end = value;
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn set_duration(&mut self, duration: f32) {
        self.duration = duration;
    }

    /// End of the event's span in fractional steps.
    pub fn end(&self) -> f32 {
        self.position as f32 + self.duration
    }

    /// Overlap against a span `[start, end)` in steps, inclusive on the
    /// left and exclusive on the right.
    pub fn overlaps(&self, start: u32, end: f32) -> bool {
        let own_start = self.position;
        let own_end = self.end();
        (own_start >= start && (own_start as f32) < end)
            || (own_end > start as f32 && own_end <= end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_event_defaults() {
        let ev = StepEvent::new(2, 0x90, 60, 100, 1.0);
        assert_eq!(ev.value1_start(), 60);
        assert_eq!(ev.value1_end(), 60);
        assert_eq!(ev.value2_start(), 100);
        // closing message is velocity zero
        assert_eq!(ev.value2_end(), 0);
        assert_eq!(ev.end(), 3.0);
    }

    #[test]
    fn test_overlap_left_inclusive_right_exclusive() {
        let ev = StepEvent::new(0, 0x90, 60, 100, 4.0);
        // span starting inside the event
        assert!(ev.overlaps(2, 6.0));
        // span ending exactly at the event start does not overlap
        assert!(!StepEvent::new(4, 0x90, 60, 100, 2.0).overlaps(0, 4.0));
        // identical span overlaps
        assert!(ev.overlaps(0, 4.0));
    }
}
