// Schedule - frame-keyed queue of pending MIDI messages

use crate::midi::event::{status, MidiMessage};
use crate::midi::output::MidiSink;

/// Time-ordered queue of MIDI messages keyed by absolute sample frame,
/// owned exclusively by the realtime thread.
///
/// Storage is pre-allocated; `insert` never grows the vector, so the
/// realtime path stays allocation-free. Messages at equal frames keep their
/// insertion order.
pub struct Schedule {
    entries: Vec<(u64, MidiMessage)>,
    capacity: usize,
    dropped: u32,
}

impl Schedule {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queues a message for the given absolute frame. Returns `false` (and
    /// counts the drop) when the schedule is full.
    pub fn insert(&mut self, frame: u64, message: MidiMessage) -> bool {
        if self.entries.len() >= self.capacity {
            self.dropped = self.dropped.saturating_add(1);
            return false;
        }
        let idx = self.entries.partition_point(|(f, _)| *f <= frame);
        self.entries.insert(idx, (frame, message));
        true
    }

    /// Emits every message due in the cycle `[cycle_start, cycle_start +
    /// frames)` into the sink, in frame order.
    ///
    /// Late messages (scheduled before the cycle) go out at the earliest
    /// free offset. Messages are never reordered: when two land on the same
    /// offset the later one is bumped by one sample, and a message bumped
    /// past the cycle end waits for the next cycle. A sink refusing a write
    /// (buffer full) also ends the drain; everything unsent stays queued.
    pub fn drain_into(&mut self, cycle_start: u64, frames: u32, sink: &mut dyn MidiSink) {
        let cycle_end = cycle_start + frames as u64;
        let mut next_offset: u32 = 0;
        let mut sent = 0;
        for (frame, message) in &self.entries {
            if *frame >= cycle_end {
                break;
            }
            let mut offset = if *frame < cycle_start {
                next_offset
            } else {
                (*frame - cycle_start) as u32
            };
            if offset < next_offset {
                offset = next_offset;
            }
            if offset >= frames {
                break;
            }
            let (bytes, len) = message.to_bytes();
            if !sink.write(offset, &bytes[..len]) {
                break;
            }
            next_offset = offset + 1;
            sent += 1;
        }
        self.entries.drain(..sent);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Channels with a pending note-off, as a 16-bit mask. Pending offs are
    /// the bookkeeping for which channels still have sounding notes.
    pub fn pending_note_off_channels(&self) -> u16 {
        let mut mask = 0u16;
        for (_, message) in &self.entries {
            let is_off = message.command() == status::NOTE_OFF
                || (message.command() == status::NOTE_ON && message.value2 == 0);
            if is_off {
                mask |= 1 << message.channel();
            }
        }
        mask
    }

    /// Count of messages dropped on insert since the last call.
    pub fn take_dropped(&mut self) -> u32 {
        std::mem::take(&mut self.dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::output::CaptureSink;

    fn msg(value1: u8) -> MidiMessage {
        MidiMessage::new(0x90, value1, 100)
    }

    #[test]
    fn test_drain_in_frame_order() {
        let mut schedule = Schedule::new(16);
        schedule.insert(500, msg(2));
        schedule.insert(100, msg(1));
        schedule.insert(900, msg(3));
        let mut sink = CaptureSink::new();
        schedule.drain_into(0, 1024, &mut sink);
        let offsets: Vec<u32> = sink.events.iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets, vec![100, 500, 900]);
        assert!(schedule.is_empty());
    }

    #[test]
    fn test_equal_frames_keep_insertion_order() {
        let mut schedule = Schedule::new(16);
        schedule.insert(100, msg(1));
        schedule.insert(100, msg(2));
        schedule.insert(100, msg(3));
        let mut sink = CaptureSink::new();
        schedule.drain_into(0, 1024, &mut sink);
        let notes: Vec<u8> = sink.events.iter().map(|(_, m)| m.value1).collect();
        assert_eq!(notes, vec![1, 2, 3]);
        // bumped by one sample each to avoid collapsing
        let offsets: Vec<u32> = sink.events.iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets, vec![100, 101, 102]);
    }

    #[test]
    fn test_late_messages_sent_first_in_order() {
        let mut schedule = Schedule::new(16);
        schedule.insert(10, msg(1));
        schedule.insert(20, msg(2));
        let mut sink = CaptureSink::new();
        // cycle starts past both messages
        schedule.drain_into(1000, 256, &mut sink);
        let events: Vec<(u32, u8)> = sink.events.iter().map(|(o, m)| (*o, m.value1)).collect();
        assert_eq!(events, vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn test_future_messages_stay_queued() {
        let mut schedule = Schedule::new(16);
        schedule.insert(100, msg(1));
        schedule.insert(5000, msg(2));
        let mut sink = CaptureSink::new();
        schedule.drain_into(0, 1024, &mut sink);
        assert_eq!(sink.events.len(), 1);
        assert_eq!(schedule.len(), 1);
        sink.clear();
        schedule.drain_into(4096, 1024, &mut sink);
        assert_eq!(sink.events[0].0, 904);
        assert!(schedule.is_empty());
    }

    #[test]
    fn test_sink_refusal_halts_drain() {
        let mut schedule = Schedule::new(16);
        schedule.insert(0, msg(1));
        schedule.insert(1, msg(2));
        schedule.insert(2, msg(3));
        let mut sink = CaptureSink::with_capacity_limit(1);
        schedule.drain_into(0, 256, &mut sink);
        assert_eq!(sink.events.len(), 1);
        assert_eq!(schedule.len(), 2);
    }

    #[test]
    fn test_bump_past_cycle_end_waits() {
        let mut schedule = Schedule::new(16);
        schedule.insert(254, msg(1));
        schedule.insert(254, msg(2));
        schedule.insert(255, msg(3));
        let mut sink = CaptureSink::new();
        schedule.drain_into(0, 256, &mut sink);
        // third message bumps to offset 256 which is outside the cycle
        assert_eq!(sink.events.len(), 2);
        assert_eq!(schedule.len(), 1);
    }

    #[test]
    fn test_capacity_overflow_drops() {
        let mut schedule = Schedule::new(2);
        assert!(schedule.insert(0, msg(1)));
        assert!(schedule.insert(1, msg(2)));
        assert!(!schedule.insert(2, msg(3)));
        assert_eq!(schedule.take_dropped(), 1);
        assert_eq!(schedule.take_dropped(), 0);
    }

    #[test]
    fn test_pending_note_off_channels() {
        let mut schedule = Schedule::new(16);
        schedule.insert(10, MidiMessage::new(0x93, 60, 100));
        assert_eq!(schedule.pending_note_off_channels(), 0);
        schedule.insert(20, MidiMessage::note_off(3, 60));
        schedule.insert(30, MidiMessage::new(0x80, 61, 0));
        assert_eq!(schedule.pending_note_off_channels(), (1 << 3) | 1);
    }
}
