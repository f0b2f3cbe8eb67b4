// Timebase map - sparse tempo and time-signature changes along a song

use serde::{Deserialize, Serialize};
use std::fmt;

/// MIDI clock pulses per beat (protocol constant).
pub const CLOCKS_PER_BEAT: u32 = 24;
/// Transport tick resolution per beat (design constant).
pub const TICKS_PER_BEAT: f64 = 1920.0;
/// Ticks per MIDI clock pulse.
pub const TICKS_PER_CLOCK: f64 = TICKS_PER_BEAT / CLOCKS_PER_BEAT as f64;
/// Song-level default tempo in BPM.
pub const DEFAULT_TEMPO: u16 = 120;

/// Time signature; packs to a u16 with beats-per-bar in the high byte and
/// beat type in the low byte, the encoding the timebase map stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSig {
    pub beats_per_bar: u8,
    pub beat_type: u8,
}

impl TimeSig {
    pub fn new(beats_per_bar: u8, beat_type: u8) -> Self {
        Self {
            beats_per_bar,
            beat_type,
        }
    }

    pub fn pack(&self) -> u16 {
        ((self.beats_per_bar as u16) << 8) | self.beat_type as u16
    }

    pub fn unpack(value: u16) -> Self {
        Self {
            beats_per_bar: (value >> 8) as u8,
            beat_type: (value & 0xFF) as u8,
        }
    }
}

impl Default for TimeSig {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

impl fmt::Display for TimeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.beats_per_bar, self.beat_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimebaseKind {
    Tempo,
    TimeSig,
}

/// A tempo or time-signature change anchored at (bar, clock-within-bar).
/// Bars are 1-based to match the transport's BBT display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimebaseEvent {
    pub bar: u16,
    pub clock: u32,
    pub kind: TimebaseKind,
    pub value: u16,
}

impl TimebaseEvent {
    fn key(&self) -> (u16, u32) {
        (self.bar, self.clock)
    }
}

/// Ordered collection of timebase events for one song.
///
/// Mutation happens on the control thread only; the realtime driver reads
/// through the published model snapshot and keeps its own cursor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimebaseMap {
    events: Vec<TimebaseEvent>,
}

impl TimebaseMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[TimebaseEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Inserts an event, replacing any event of the same kind at the same
    /// position.
    pub fn insert(&mut self, bar: u16, clock: u32, kind: TimebaseKind, value: u16) {
        self.events
            .retain(|ev| !(ev.bar == bar && ev.clock == clock && ev.kind == kind));
        let event = TimebaseEvent {
            bar,
            clock,
            kind,
            value,
        };
        let idx = self.events.partition_point(|ev| ev.key() <= event.key());
        self.events.insert(idx, event);
    }

    pub fn remove(&mut self, bar: u16, clock: u32, kind: TimebaseKind) -> bool {
        let before = self.events.len();
        self.events
            .retain(|ev| !(ev.bar == bar && ev.clock == clock && ev.kind == kind));
        self.events.len() != before
    }

    fn floor_lookup(&self, bar: u16, clock: u32, kind: TimebaseKind) -> Option<&TimebaseEvent> {
        self.events
            .iter()
            .take_while(|ev| ev.key() <= (bar, clock))
            .filter(|ev| ev.kind == kind)
            .last()
    }

    /// Tempo in effect at a position, or `None` before the first tempo event.
    pub fn tempo_at(&self, bar: u16, clock: u32) -> Option<u16> {
        self.floor_lookup(bar, clock, TimebaseKind::Tempo)
            .map(|ev| ev.value)
    }

    /// Time signature in effect at a position.
    pub fn timesig_at(&self, bar: u16, clock: u32) -> Option<TimeSig> {
        self.floor_lookup(bar, clock, TimebaseKind::TimeSig)
            .map(|ev| TimeSig::unpack(ev.value))
    }

    pub fn first(&self) -> Option<&TimebaseEvent> {
        self.events.first()
    }

    /// First event strictly after the given position.
    pub fn next_after(&self, bar: u16, clock: u32) -> Option<&TimebaseEvent> {
        let idx = self.events.partition_point(|ev| ev.key() <= (bar, clock));
        self.events.get(idx)
    }

    /// Index of the first event at or after the given position; used by the
    /// realtime driver to re-arm its cursor after a reposition.
    pub fn index_at_or_after(&self, bar: u16, clock: u32) -> usize {
        self.events.partition_point(|ev| ev.key() < (bar, clock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timesig_pack_roundtrip() {
        let sig = TimeSig::new(3, 8);
        assert_eq!(TimeSig::unpack(sig.pack()), sig);
        assert_eq!(sig.pack(), 0x0308);
    }

    #[test]
    fn test_insert_sorted() {
        let mut map = TimebaseMap::new();
        map.insert(4, 0, TimebaseKind::Tempo, 90);
        map.insert(1, 0, TimebaseKind::Tempo, 120);
        map.insert(2, 12, TimebaseKind::Tempo, 140);
        let bars: Vec<u16> = map.events().iter().map(|ev| ev.bar).collect();
        assert_eq!(bars, vec![1, 2, 4]);
    }

    #[test]
    fn test_insert_replaces_same_kind_same_position() {
        let mut map = TimebaseMap::new();
        map.insert(2, 0, TimebaseKind::Tempo, 100);
        map.insert(2, 0, TimebaseKind::Tempo, 110);
        map.insert(2, 0, TimebaseKind::TimeSig, TimeSig::new(3, 4).pack());
        assert_eq!(map.len(), 2);
        assert_eq!(map.tempo_at(2, 0), Some(110));
    }

    #[test]
    fn test_floor_lookup() {
        let mut map = TimebaseMap::new();
        map.insert(1, 0, TimebaseKind::Tempo, 120);
        map.insert(3, 0, TimebaseKind::Tempo, 60);
        assert_eq!(map.tempo_at(1, 0), Some(120));
        assert_eq!(map.tempo_at(2, 95), Some(120));
        assert_eq!(map.tempo_at(3, 0), Some(60));
        assert_eq!(map.tempo_at(100, 0), Some(60));
        assert_eq!(map.timesig_at(1, 0), None);
    }

    #[test]
    fn test_next_after() {
        let mut map = TimebaseMap::new();
        map.insert(1, 0, TimebaseKind::Tempo, 120);
        map.insert(3, 0, TimebaseKind::Tempo, 60);
        assert_eq!(map.next_after(1, 0).unwrap().bar, 3);
        assert!(map.next_after(3, 0).is_none());
        assert_eq!(map.index_at_or_after(1, 0), 0);
        assert_eq!(map.index_at_or_after(1, 1), 1);
    }
}
