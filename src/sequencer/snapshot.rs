// Immutable model view published to the realtime engine

use crate::sequencer::pattern::Pattern;
use crate::sequencer::sequence::PlayMode;
use crate::sequencer::timebase::{TimeSig, TimebaseMap};
use crate::sequencer::{SequenceId, SongId};
use std::sync::Arc;

/// Upper bound on sequence handles; the engine keeps a fixed-size play-state
/// slot per handle so the realtime path never allocates.
pub const MAX_SEQUENCES: usize = 64;

/// Playback-relevant view of one sequence, with placements resolved to
/// shared pattern data.
#[derive(Debug, Clone)]
pub struct SequenceSnapshot {
    pub id: SequenceId,
    pub channel: u8,
    pub output: u8,
    pub play_mode: PlayMode,
    pub group: u8,
    pub tally_channel: u8,
    pub trigger_note: u8,
    pub solo: bool,
    pub placements: Vec<(u32, Arc<Pattern>)>,
    pub length_clocks: u32,
}

impl SequenceSnapshot {
    /// Placement (offset, pattern) covering the given sequence clock.
    pub fn placement_covering(&self, clock: u32) -> Option<(u32, &Pattern)> {
        self.placements
            .iter()
            .find(|(offset, pattern)| {
                clock >= *offset && clock < offset + pattern.length_clocks()
            })
            .map(|(offset, pattern)| (*offset, pattern.as_ref()))
    }
}

/// The whole view the engine needs for one song: sequences, timebase,
/// trigger configuration. Built by the manager after every edit batch and
/// handed over through a triple buffer; the engine only ever borrows it for
/// the duration of a cycle.
#[derive(Debug, Clone)]
pub struct ModelSnapshot {
    /// Bumped on every publish; lets the engine notice model changes.
    pub epoch: u64,
    /// Bumped when the timebase map or song selection changes, which forces
    /// the engine to re-arm its timebase cursor.
    pub timebase_epoch: u64,
    pub song: SongId,
    pub sequences: Vec<SequenceSnapshot>,
    pub timebase: Arc<TimebaseMap>,
    pub default_tempo: u16,
    pub default_time_sig: TimeSig,
    pub song_length: u32,
    pub trigger_channel: u8,
    pub input_channel: Option<u8>,
    /// Index into `sequences` of the pattern editor's target lane.
    pub editor_sequence: Option<usize>,
}

impl ModelSnapshot {
    pub fn empty() -> Self {
        Self {
            epoch: 0,
            timebase_epoch: 0,
            song: 0,
            sequences: Vec::new(),
            timebase: Arc::new(TimebaseMap::new()),
            default_tempo: crate::sequencer::timebase::DEFAULT_TEMPO,
            default_time_sig: TimeSig::default(),
            song_length: 0,
            trigger_channel: 15,
            input_channel: None,
            editor_sequence: None,
        }
    }

    pub fn sequence_index(&self, id: SequenceId) -> Option<usize> {
        self.sequences.iter().position(|s| s.id == id)
    }

    /// Sequence bound to a trigger note, if any.
    pub fn trigger_target(&self, note: u8) -> Option<&SequenceSnapshot> {
        self.sequences.iter().find(|s| s.trigger_note == note)
    }
}

impl Default for ModelSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}
