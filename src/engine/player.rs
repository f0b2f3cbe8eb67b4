// Per-sequence play head walked by the clock pulse loop

use crate::engine::schedule::Schedule;
use crate::midi::event::{status, MidiMessage};
use crate::sequencer::sequence::PlayState;
use crate::sequencer::snapshot::SequenceSnapshot;

/// Runtime play state for one sequence: the state machine, the clock
/// position within the sequence, and the step the editor sees.
///
/// The sequence content itself lives in the published snapshot; the player
/// only advances through it, so model edits never race the play head.
#[derive(Debug, Clone, Copy)]
pub struct SequencePlayer {
    state: PlayState,
    position: u32,
    step: u32,
}

impl SequencePlayer {
    pub const fn new() -> Self {
        Self {
            state: PlayState::Stopped,
            position: 0,
            step: 0,
        }
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn set_position(&mut self, clock: u32) {
        self.position = clock;
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    /// Manual scrub of the editor step while stopped.
    pub fn set_step(&mut self, step: u32) {
        self.step = step;
    }

    /// Applies a state change request. With the transport stopped a stop
    /// request resolves immediately since no bar boundary will arrive.
    pub fn request_state(&mut self, state: PlayState, rolling: bool) {
        self.state = match state {
            PlayState::Stopping | PlayState::Stopped if !rolling => PlayState::Stopped,
            other => other,
        };
    }

    /// Start/stop toggle used by trigger notes. Returns the new state.
    pub fn toggle(&mut self, rolling: bool) -> PlayState {
        let next = match self.state {
            PlayState::Stopped | PlayState::Stopping => PlayState::Starting,
            PlayState::Playing | PlayState::Starting => PlayState::Stopping,
        };
        self.request_state(next, rolling);
        self.state
    }

    pub fn stop_now(&mut self) {
        self.state = PlayState::Stopped;
    }

    /// Re-seats the play head after a song reposition.
    pub fn locate(&mut self, song_clock: u32, seq: &SequenceSnapshot) {
        let len = seq.length_clocks;
        if len == 0 {
            self.position = 0;
        } else if seq.play_mode.loops() {
            self.position = song_clock % len;
        } else {
            self.position = song_clock.min(len);
        }
    }

    /// Advances one clock pulse, emitting due events into the schedule.
    ///
    /// `sync` marks a bar boundary; bar-gated modes resolve their pending
    /// transitions there, others at any pulse. Returns `true` while the
    /// sequence still occupies the transport (any non-stopped state).
    pub fn clock_tick(
        &mut self,
        seq: &SequenceSnapshot,
        sync: bool,
        frame: u64,
        frames_per_clock: f64,
        schedule: &mut Schedule,
    ) -> bool {
        let gate_open = sync || !seq.play_mode.bar_gated();
        match self.state {
            PlayState::Stopped => return false,
            PlayState::Starting => {
                if !gate_open {
                    return true;
                }
                self.state = PlayState::Playing;
                self.position = 0;
            }
            PlayState::Stopping => {
                if gate_open {
                    self.state = PlayState::Stopped;
                    schedule.insert(frame, MidiMessage::all_notes_off(seq.channel));
                    return false;
                }
                // keep sounding until the bar boundary
            }
            PlayState::Playing => {
                if sync && seq.play_mode.restarts_on_sync() {
                    self.position = 0;
                }
            }
        }

        let len = seq.length_clocks;
        if len == 0 {
            self.state = PlayState::Stopped;
            return false;
        }
        if self.position >= len {
            if seq.play_mode.loops() {
                self.position %= len;
            } else {
                self.state = PlayState::Stopped;
                return false;
            }
        }

        if let Some((offset, pattern)) = seq.placement_covering(self.position) {
            let rel = self.position - offset;
            let clocks_per_step = pattern.clocks_per_step();
            if rel % clocks_per_step == 0 {
                let step = rel / clocks_per_step;
                self.step = step;
                for ev in pattern.events_at_step(step) {
                    schedule.insert(
                        frame,
                        MidiMessage::channel_voice(
                            ev.command(),
                            seq.channel,
                            ev.value1_start(),
                            ev.value2_start(),
                        ),
                    );
                    let has_closing = ev.command() == status::NOTE_ON
                        || (ev.command() == status::CONTROL
                            && ev.value2_end() != ev.value2_start());
                    if has_closing {
                        let duration_clocks = ev.duration() as f64 * clocks_per_step as f64;
                        let delay = (duration_clocks * frames_per_clock) as u64;
                        schedule.insert(
                            frame + delay.max(1),
                            MidiMessage::channel_voice(
                                ev.command(),
                                seq.channel,
                                ev.value1_end(),
                                ev.value2_end(),
                            ),
                        );
                    }
                }
            }
        }

        self.position += 1;
        if self.position >= len && seq.play_mode.loops() {
            self.position = 0;
        }
        true
    }
}

impl Default for SequencePlayer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::output::CaptureSink;
    use crate::sequencer::pattern::Pattern;
    use crate::sequencer::sequence::PlayMode;
    use std::sync::Arc;

    const FPC: f64 = 1000.0;

    fn snapshot_with(pattern: Pattern, mode: PlayMode) -> SequenceSnapshot {
        let length_clocks = pattern.length_clocks();
        SequenceSnapshot {
            id: 0,
            channel: 0,
            output: 0,
            play_mode: mode,
            group: 0,
            tally_channel: 0xFF,
            trigger_note: 0xFF,
            solo: false,
            placements: vec![(0, Arc::new(pattern))],
            length_clocks,
        }
    }

    fn drain(schedule: &mut Schedule) -> Vec<(u32, MidiMessage)> {
        let mut sink = CaptureSink::new();
        schedule.drain_into(0, 1 << 20, &mut sink);
        sink.events
    }

    #[test]
    fn test_note_emission_with_off() {
        let mut pattern = Pattern::new(4, 4);
        pattern.add_note(0, 60, 100, 1.0);
        let seq = snapshot_with(pattern, PlayMode::Loop);
        let mut player = SequencePlayer::new();
        let mut schedule = Schedule::new(64);

        player.request_state(PlayState::Starting, true);
        player.clock_tick(&seq, true, 0, FPC, &mut schedule);
        assert_eq!(player.state(), PlayState::Playing);

        let events = drain(&mut schedule);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], (0, MidiMessage::new(0x90, 60, 100)));
        // one step of six clocks at 1000 frames per clock
        assert_eq!(events[1], (6000, MidiMessage::new(0x90, 60, 0)));
    }

    #[test]
    fn test_events_only_on_step_boundaries() {
        let mut pattern = Pattern::new(1, 4);
        pattern.add_note(1, 60, 100, 1.0);
        let seq = snapshot_with(pattern, PlayMode::Loop);
        let mut player = SequencePlayer::new();
        let mut schedule = Schedule::new(64);
        player.request_state(PlayState::Starting, true);
        for clock in 0..24u64 {
            player.clock_tick(&seq, clock == 0, clock * 1000, FPC, &mut schedule);
        }
        let events = drain(&mut schedule);
        // note-on at clock 6 plus its note-off
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, 6000);
    }

    #[test]
    fn test_bar_gated_start_waits_for_sync() {
        let pattern = Pattern::new(1, 4);
        let seq = snapshot_with(pattern, PlayMode::LoopAll);
        let mut player = SequencePlayer::new();
        let mut schedule = Schedule::new(64);
        player.request_state(PlayState::Starting, true);
        player.clock_tick(&seq, false, 0, FPC, &mut schedule);
        assert_eq!(player.state(), PlayState::Starting);
        player.clock_tick(&seq, true, 1000, FPC, &mut schedule);
        assert_eq!(player.state(), PlayState::Playing);
        assert_eq!(player.position(), 1);
    }

    #[test]
    fn test_immediate_start_without_sync() {
        let pattern = Pattern::new(1, 4);
        let seq = snapshot_with(pattern, PlayMode::Loop);
        let mut player = SequencePlayer::new();
        let mut schedule = Schedule::new(64);
        player.request_state(PlayState::Starting, true);
        player.clock_tick(&seq, false, 0, FPC, &mut schedule);
        assert_eq!(player.state(), PlayState::Playing);
    }

    #[test]
    fn test_stopping_emits_all_notes_off_at_sync() {
        let mut pattern = Pattern::new(1, 4);
        pattern.add_note(0, 60, 100, 8.0);
        let seq = snapshot_with(pattern, PlayMode::LoopAll);
        let mut player = SequencePlayer::new();
        let mut schedule = Schedule::new(64);
        player.request_state(PlayState::Starting, true);
        player.clock_tick(&seq, true, 0, FPC, &mut schedule);
        player.request_state(PlayState::Stopping, true);
        // mid-bar pulse keeps playing
        assert!(player.clock_tick(&seq, false, 1000, FPC, &mut schedule));
        assert_eq!(player.state(), PlayState::Stopping);
        // bar boundary resolves the stop
        assert!(!player.clock_tick(&seq, true, 24000, FPC, &mut schedule));
        assert_eq!(player.state(), PlayState::Stopped);
        let events = drain(&mut schedule);
        let last = events.last().unwrap();
        assert_eq!(last.1, MidiMessage::all_notes_off(0));
    }

    #[test]
    fn test_oneshot_stops_at_end() {
        let pattern = Pattern::new(1, 4);
        let seq = snapshot_with(pattern, PlayMode::OneShot);
        let mut player = SequencePlayer::new();
        let mut schedule = Schedule::new(64);
        player.request_state(PlayState::Starting, true);
        for clock in 0..24u64 {
            assert!(player.clock_tick(&seq, clock == 0, clock * 1000, FPC, &mut schedule));
        }
        // one pulse past the end stops the sequence
        assert!(!player.clock_tick(&seq, true, 24000, FPC, &mut schedule));
        assert_eq!(player.state(), PlayState::Stopped);
    }

    #[test]
    fn test_loop_wraps() {
        let mut pattern = Pattern::new(1, 4);
        pattern.add_note(0, 60, 100, 1.0);
        let seq = snapshot_with(pattern, PlayMode::Loop);
        let mut player = SequencePlayer::new();
        let mut schedule = Schedule::new(256);
        player.request_state(PlayState::Starting, true);
        for clock in 0..48u64 {
            player.clock_tick(&seq, clock % 24 == 0, clock * 1000, FPC, &mut schedule);
        }
        let events = drain(&mut schedule);
        let ons: Vec<u32> = events
            .iter()
            .filter(|(_, m)| m.value2 == 100)
            .map(|(o, _)| *o)
            .collect();
        assert_eq!(ons, vec![0, 24000]);
    }

    #[test]
    fn test_loop_sync_restarts_on_bar() {
        let mut pattern = Pattern::new(2, 4);
        pattern.add_note(0, 60, 100, 1.0);
        let seq = snapshot_with(pattern, PlayMode::LoopSync);
        let mut player = SequencePlayer::new();
        let mut schedule = Schedule::new(256);
        player.request_state(PlayState::Starting, true);
        // two-beat pattern restarted by a sync pulse every 24 clocks
        for clock in 0..48u64 {
            player.clock_tick(&seq, clock % 24 == 0, clock * 1000, FPC, &mut schedule);
        }
        let events = drain(&mut schedule);
        let ons: Vec<u32> = events
            .iter()
            .filter(|(_, m)| m.value2 == 100)
            .map(|(o, _)| *o)
            .collect();
        assert_eq!(ons, vec![0, 24000]);
    }

    #[test]
    fn test_control_ramp_emits_end_value() {
        let mut pattern = Pattern::new(4, 4);
        pattern.add_control(0, 7, 10, 90, 4.0);
        let seq = snapshot_with(pattern, PlayMode::Loop);
        let mut player = SequencePlayer::new();
        let mut schedule = Schedule::new(64);
        player.request_state(PlayState::Starting, true);
        player.clock_tick(&seq, true, 0, FPC, &mut schedule);
        let events = drain(&mut schedule);
        assert_eq!(events[0].1, MidiMessage::new(0xB0, 7, 10));
        assert_eq!(events[1], (24000, MidiMessage::new(0xB0, 7, 90)));
    }

    #[test]
    fn test_program_change_has_no_closing_message() {
        let mut pattern = Pattern::new(4, 4);
        pattern.add_program_change(0, 12);
        let seq = snapshot_with(pattern, PlayMode::Loop);
        let mut player = SequencePlayer::new();
        let mut schedule = Schedule::new(64);
        player.request_state(PlayState::Starting, true);
        player.clock_tick(&seq, true, 0, FPC, &mut schedule);
        let events = drain(&mut schedule);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, MidiMessage::new(0xC0, 12, 0));
    }

    #[test]
    fn test_stop_request_resolves_immediately_when_not_rolling() {
        let mut player = SequencePlayer::new();
        player.request_state(PlayState::Starting, false);
        assert_eq!(player.state(), PlayState::Starting);
        player.request_state(PlayState::Stopping, false);
        assert_eq!(player.state(), PlayState::Stopped);
    }

    #[test]
    fn test_channel_applied_to_emitted_events() {
        let mut pattern = Pattern::new(1, 4);
        pattern.add_note(0, 60, 100, 1.0);
        let mut seq = snapshot_with(pattern, PlayMode::Loop);
        seq.channel = 5;
        let mut player = SequencePlayer::new();
        let mut schedule = Schedule::new(64);
        player.request_state(PlayState::Starting, true);
        player.clock_tick(&seq, true, 0, FPC, &mut schedule);
        let events = drain(&mut schedule);
        assert_eq!(events[0].1.status, 0x95);
    }
}
