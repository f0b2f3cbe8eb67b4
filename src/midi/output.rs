// MIDI output sinks - where the schedule drains each cycle

use crate::midi::event::MidiMessage;
use crate::midi::MidiError;
use midir::{MidiOutput as MidirOutput, MidiOutputConnection};

/// Destination for MIDI bytes produced during one realtime cycle.
///
/// `write` places a message at a sample offset within the current period and
/// returns `false` when the underlying buffer cannot accept it, which halts
/// the cycle's drain; undelivered messages stay scheduled.
pub trait MidiSink {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> bool;
}

/// Production sink backed by a midir output connection.
///
/// midir has no notion of intra-period offsets, so messages are pushed to the
/// OS driver as soon as the drain reaches them; the offset ordering produced
/// by the schedule is preserved.
pub struct MidiPortSink {
    connection: MidiOutputConnection,
}

impl MidiPortSink {
    pub fn connect(client_name: &str) -> Result<Self, MidiError> {
        let midi_out = MidirOutput::new(client_name)
            .map_err(|e| MidiError::Init(e.to_string()))?;
        let ports = midi_out.ports();
        let port = ports.first().ok_or(MidiError::NoPorts)?;
        let port_name = midi_out
            .port_name(port)
            .unwrap_or_else(|_| "unknown".to_string());
        log::info!("MIDI output connected to {port_name}");
        let connection = midi_out
            .connect(port, "stepseq-output")
            .map_err(|e| MidiError::Connect(e.to_string()))?;
        Ok(Self { connection })
    }
}

impl MidiSink for MidiPortSink {
    fn write(&mut self, _offset: u32, bytes: &[u8]) -> bool {
        self.connection.send(bytes).is_ok()
    }
}

/// Capturing sink used by tests and the monitor binary.
///
/// Records `(offset, message)` pairs per cycle; an optional capacity models a
/// host buffer that can fill up mid-drain.
#[derive(Debug, Default)]
pub struct CaptureSink {
    pub events: Vec<(u32, MidiMessage)>,
    pub capacity: Option<usize>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            events: Vec::new(),
            capacity: Some(capacity),
        }
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl MidiSink for CaptureSink {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> bool {
        if let Some(cap) = self.capacity {
            if self.events.len() >= cap {
                return false;
            }
        }
        let msg = MidiMessage::new(
            bytes[0],
            bytes.get(1).copied().unwrap_or(0),
            bytes.get(2).copied().unwrap_or(0),
        );
        self.events.push((offset, msg));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_sink_records_offsets() {
        let mut sink = CaptureSink::new();
        assert!(sink.write(0, &[0x90, 60, 100]));
        assert!(sink.write(10, &[0x90, 60, 0]));
        assert_eq!(sink.events.len(), 2);
        assert_eq!(sink.events[0].0, 0);
        assert_eq!(sink.events[1].1.value2, 0);
    }

    #[test]
    fn test_capture_sink_capacity() {
        let mut sink = CaptureSink::with_capacity_limit(1);
        assert!(sink.write(0, &[0xF8]));
        assert!(!sink.write(1, &[0xF8]));
        assert_eq!(sink.events.len(), 1);
    }
}
