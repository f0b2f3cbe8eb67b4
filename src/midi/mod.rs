// MIDI layer: message types, input port, output sinks

pub mod event;
pub mod input;
pub mod output;

pub use event::{status, MidiMessage, CC_ALL_NOTES_OFF};
pub use input::MidiInputPort;
pub use output::{CaptureSink, MidiPortSink, MidiSink};

#[derive(Debug, thiserror::Error)]
pub enum MidiError {
    #[error("no MIDI port available")]
    NoPorts,
    #[error("MIDI init failed: {0}")]
    Init(String),
    #[error("MIDI connect failed: {0}")]
    Connect(String),
}
