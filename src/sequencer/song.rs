// Song - a track set bound to one timebase map

use crate::sequencer::timebase::{TimeSig, TimebaseKind, TimebaseMap, DEFAULT_TEMPO};
use crate::sequencer::SequenceId;
use serde::{Deserialize, Serialize};

/// A collection of sequences grouped as tracks, sharing one timebase map.
/// A track is a thin binding of a sequence handle to a display position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    tracks: Vec<SequenceId>,
    timebase: TimebaseMap,
    default_tempo: u16,
    default_time_sig: TimeSig,
}

impl Song {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            timebase: TimebaseMap::new(),
            default_tempo: DEFAULT_TEMPO,
            default_time_sig: TimeSig::default(),
        }
    }

    pub fn tracks(&self) -> &[SequenceId] {
        &self.tracks
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, index: usize) -> Option<SequenceId> {
        self.tracks.get(index).copied()
    }

    pub fn add_track(&mut self, sequence: SequenceId) {
        self.tracks.push(sequence);
    }

    pub fn remove_track(&mut self, index: usize) -> Option<SequenceId> {
        if index < self.tracks.len() {
            Some(self.tracks.remove(index))
        } else {
            None
        }
    }

    pub fn has_track(&self, sequence: SequenceId) -> bool {
        self.tracks.contains(&sequence)
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.timebase = TimebaseMap::new();
    }

    pub fn timebase(&self) -> &TimebaseMap {
        &self.timebase
    }

    pub fn timebase_mut(&mut self) -> &mut TimebaseMap {
        &mut self.timebase
    }

    pub fn set_tempo(&mut self, tempo: u16, bar: u16, clock: u32) {
        self.timebase.insert(bar, clock, TimebaseKind::Tempo, tempo);
    }

    /// Tempo in effect at a position, falling back to the song default.
    pub fn tempo_at(&self, bar: u16, clock: u32) -> u16 {
        self.timebase
            .tempo_at(bar, clock)
            .unwrap_or(self.default_tempo)
    }

    /// Time-signature changes anchor at the start of a bar.
    pub fn set_time_sig(&mut self, sig: TimeSig, bar: u16) {
        self.timebase
            .insert(bar.max(1), 0, TimebaseKind::TimeSig, sig.pack());
    }

    pub fn timesig_at(&self, bar: u16) -> TimeSig {
        self.timebase
            .timesig_at(bar, u32::MAX)
            .unwrap_or(self.default_time_sig)
    }

    pub fn default_tempo(&self) -> u16 {
        self.default_tempo
    }

    pub fn set_default_tempo(&mut self, tempo: u16) {
        if tempo > 0 {
            self.default_tempo = tempo;
        }
    }

    pub fn default_time_sig(&self) -> TimeSig {
        self.default_time_sig
    }

    pub fn set_default_time_sig(&mut self, sig: TimeSig) {
        if sig.beats_per_bar > 0 {
            self.default_time_sig = sig;
        }
    }
}

impl Default for Song {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracks() {
        let mut song = Song::new();
        song.add_track(3);
        song.add_track(7);
        assert_eq!(song.track_count(), 2);
        assert_eq!(song.track(1), Some(7));
        assert!(song.has_track(3));
        assert_eq!(song.remove_track(0), Some(3));
        assert_eq!(song.remove_track(5), None);
        assert_eq!(song.track_count(), 1);
    }

    #[test]
    fn test_tempo_defaults() {
        let mut song = Song::new();
        assert_eq!(song.tempo_at(1, 0), 120);
        song.set_tempo(90, 3, 0);
        assert_eq!(song.tempo_at(2, 95), 120);
        assert_eq!(song.tempo_at(3, 0), 90);
    }

    #[test]
    fn test_timesig_per_bar() {
        let mut song = Song::new();
        assert_eq!(song.timesig_at(1), TimeSig::new(4, 4));
        song.set_time_sig(TimeSig::new(3, 4), 3);
        assert_eq!(song.timesig_at(2), TimeSig::new(4, 4));
        assert_eq!(song.timesig_at(3), TimeSig::new(3, 4));
    }
}
