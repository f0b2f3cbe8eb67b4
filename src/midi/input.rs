// MIDI input - parses incoming bytes and feeds the realtime queue

use crate::messaging::channels::MidiInProducer;
use crate::midi::event::MidiMessage;
use crate::midi::MidiError;
use midir::{MidiInput as MidirInput, MidiInputConnection};
use ringbuf::traits::Producer;

/// Owns the midir input connection. The midir callback runs on its own
/// thread and pushes parsed messages into the lock-free queue drained by the
/// engine at the top of each cycle.
pub struct MidiInputPort {
    _connection: Option<MidiInputConnection<()>>,
}

impl MidiInputPort {
    pub fn connect(client_name: &str, mut producer: MidiInProducer) -> Result<Self, MidiError> {
        let midi_in =
            MidirInput::new(client_name).map_err(|e| MidiError::Init(e.to_string()))?;

        let ports = midi_in.ports();
        if ports.is_empty() {
            log::warn!("no MIDI input port detected, continuing without input");
            return Ok(Self { _connection: None });
        }

        let port = &ports[0];
        let port_name = midi_in
            .port_name(port)
            .unwrap_or_else(|_| "unknown".to_string());
        log::info!("MIDI input connected to {port_name}");

        let connection = midi_in
            .connect(
                port,
                "stepseq-input",
                move |_timestamp, message, _| {
                    if let Some(event) = MidiMessage::from_bytes(message) {
                        // Queue full: the event is dropped rather than blocking
                        let _ = producer.try_push(event);
                    }
                },
                (),
            )
            .map_err(|e| MidiError::Connect(e.to_string()))?;

        Ok(Self {
            _connection: Some(connection),
        })
    }
}
