// stepseq - step sequencer core with a sample-accurate MIDI schedule

pub mod audio;
pub mod control;
pub mod engine;
pub mod messaging;
pub mod midi;
pub mod project;
pub mod sequencer;

pub use audio::{AudioDriver, DriverError};
pub use control::Controller;
pub use engine::transport::{SharedTransport, TransportState};
pub use engine::{Engine, EngineView};
pub use messaging::channels::MidiInProducer;
pub use midi::{CaptureSink, MidiError, MidiInputPort, MidiMessage, MidiPortSink, MidiSink};
pub use sequencer::{
    PatternManager, PlayMode, PlayState, TimeSig, TimebaseKind,
};

use crate::sequencer::snapshot::ModelSnapshot;
use std::sync::Arc;
use triple_buffer::TripleBuffer;

// Queue capacities, sized well past worst-case MIDI burst rates for periods
// up to ~500 ms.
const COMMAND_QUEUE_CAPACITY: usize = 512;
const MIDI_QUEUE_CAPACITY: usize = 512;
const NOTIFICATION_QUEUE_CAPACITY: usize = 256;

/// Builds a wired controller/engine pair.
///
/// The `Engine` moves into the realtime callback (see `AudioDriver`), the
/// `Controller` stays with the application, and the returned producer feeds
/// parsed MIDI input into the engine (see `MidiInputPort`).
pub fn create_engine(sample_rate: f64) -> (Controller, Engine, MidiInProducer) {
    let manager = PatternManager::new();
    let (model_tx, model_rx) =
        TripleBuffer::new(&Arc::new(ModelSnapshot::empty())).split();
    let (command_tx, command_rx) =
        messaging::channels::create_command_channel(COMMAND_QUEUE_CAPACITY);
    let (midi_tx, midi_rx) = messaging::channels::create_midi_in_channel(MIDI_QUEUE_CAPACITY);
    let (notification_tx, notification_rx) =
        messaging::channels::create_notification_channel(NOTIFICATION_QUEUE_CAPACITY);
    let (view_tx, view_rx) = TripleBuffer::new(&EngineView::default()).split();
    let transport = SharedTransport::new();

    let engine = Engine::new(
        model_rx,
        command_rx,
        midi_rx,
        notification_tx,
        view_tx,
        Arc::clone(&transport),
        sample_rate,
    );
    let controller = Controller::new(
        manager,
        model_tx,
        command_tx,
        notification_rx,
        view_rx,
        transport,
        sample_rate,
    );
    (controller, engine, midi_tx)
}
