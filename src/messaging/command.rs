// Control-to-realtime commands, drained at the top of each cycle

use crate::midi::event::MidiMessage;
use crate::sequencer::sequence::PlayState;
use crate::sequencer::SequenceId;

/// A MIDI message sent through the direct interface, scheduled
/// `delay_frames` after the start of the cycle that dequeues it.
#[derive(Debug, Clone, Copy)]
pub struct TimedMessage {
    pub message: MidiMessage,
    pub delay_frames: u64,
}

impl TimedMessage {
    pub fn immediate(message: MidiMessage) -> Self {
        Self {
            message,
            delay_frames: 0,
        }
    }
}

/// Commands the control threads may issue to the engine. Everything that
/// touches live playback state crosses the thread boundary here; model edits
/// travel separately as published snapshots.
#[derive(Debug, Clone, Copy)]
pub enum Command {
    SetPlayState {
        sequence: SequenceId,
        state: PlayState,
    },
    TogglePlayState {
        sequence: SequenceId,
    },
    SetStep {
        sequence: SequenceId,
        step: u32,
    },
    SetPlayPosition {
        sequence: SequenceId,
        clock: u32,
    },
    SetTempo(f64),
    SetSongPosition(u32),
    StartSong {
        fast: bool,
    },
    StopSong,
    PauseSong,
    StopAll,
    Midi(TimedMessage),
}
