// Sequencer data model: patterns, sequences, songs, timebase

pub mod event;
pub mod manager;
pub mod pattern;
pub mod sequence;
pub mod snapshot;
pub mod song;
pub mod timebase;

pub use event::StepEvent;
pub use manager::{PatternManager, EDITOR_SONG};
pub use pattern::{Pattern, STEPS_PER_BEAT_CHOICES};
pub use sequence::{PlayMode, PlayState, Sequence};
pub use snapshot::{ModelSnapshot, SequenceSnapshot, MAX_SEQUENCES};
pub use song::Song;
pub use timebase::{TimeSig, TimebaseEvent, TimebaseKind, TimebaseMap};

/// Dense integer handles resolved by the manager.
pub type PatternId = u32;
pub type SequenceId = u32;
pub type SongId = u32;
