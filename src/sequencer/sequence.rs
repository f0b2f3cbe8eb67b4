// Sequence - pattern placements along a clock timeline

use crate::sequencer::PatternId;
use serde::{Deserialize, Serialize};

/// How a sequence behaves at its boundaries.
///
/// `OneShot`/`Loop` start and stop at the next clock pulse; the `All`
/// variants gate both transitions on the next bar boundary; `LoopSync`
/// additionally snaps its position back to zero at every bar boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayMode {
    OneShot,
    Loop,
    OneShotAll,
    LoopAll,
    LoopSync,
}

impl PlayMode {
    /// Whether the sequence wraps at its end instead of stopping.
    pub fn loops(&self) -> bool {
        matches!(self, PlayMode::Loop | PlayMode::LoopAll | PlayMode::LoopSync)
    }

    /// Whether start/stop transitions wait for a bar boundary.
    pub fn bar_gated(&self) -> bool {
        matches!(
            self,
            PlayMode::OneShotAll | PlayMode::LoopAll | PlayMode::LoopSync
        )
    }

    /// Whether the position snaps to zero on every bar boundary.
    pub fn restarts_on_sync(&self) -> bool {
        matches!(self, PlayMode::LoopSync)
    }
}

impl Default for PlayMode {
    fn default() -> Self {
        PlayMode::Loop
    }
}

/// Play state machine: Stopped -> Starting -> Playing -> Stopping -> Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayState {
    Stopped,
    Starting,
    Playing,
    Stopping,
}

impl PlayState {
    pub fn is_active(&self) -> bool {
        !matches!(self, PlayState::Stopped)
    }
}

impl Default for PlayState {
    fn default() -> Self {
        PlayState::Stopped
    }
}

/// A pattern placed at a clock offset within a sequence. The pattern's
/// length is cached here and refreshed by the manager whenever the pattern
/// is resized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub clock_offset: u32,
    pub pattern: PatternId,
    pub length_clocks: u32,
}

impl Placement {
    pub fn end(&self) -> u32 {
        self.clock_offset + self.length_clocks
    }

    pub fn contains(&self, clock: u32) -> bool {
        clock >= self.clock_offset && clock < self.end()
    }
}

/// One playable lane: an ordered list of pattern placements plus output and
/// trigger configuration. Playback position and state live in the engine's
/// per-sequence player, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    channel: u8,
    output: u8,
    play_mode: PlayMode,
    group: u8,
    tally_channel: u8,
    trigger_note: u8,
    solo: bool,
    placements: Vec<Placement>,
    length_clocks: u32,
}

impl Sequence {
    pub fn new() -> Self {
        Self {
            channel: 0,
            output: 0,
            play_mode: PlayMode::default(),
            group: 0,
            tally_channel: 0xFF,
            trigger_note: 0xFF,
            solo: false,
            placements: Vec::new(),
            length_clocks: 0,
        }
    }

    /// Places a pattern at a clock offset. A placement whose span would
    /// overlap an existing one is rejected unless `force`, in which case the
    /// conflicting placements are removed first.
    pub fn add_placement(
        &mut self,
        clock_offset: u32,
        pattern: PatternId,
        length_clocks: u32,
        force: bool,
    ) -> bool {
        let end = clock_offset + length_clocks;
        let conflict = self
            .placements
            .iter()
            .any(|p| p.clock_offset < end && p.end() > clock_offset);
        if conflict {
            if !force {
                return false;
            }
            self.placements
                .retain(|p| !(p.clock_offset < end && p.end() > clock_offset));
        }
        let placement = Placement {
            clock_offset,
            pattern,
            length_clocks,
        };
        let idx = self
            .placements
            .partition_point(|p| p.clock_offset <= clock_offset);
        self.placements.insert(idx, placement);
        self.update_length();
        true
    }

    pub fn remove_placement(&mut self, clock_offset: u32) -> bool {
        let before = self.placements.len();
        self.placements.retain(|p| p.clock_offset != clock_offset);
        let removed = self.placements.len() != before;
        if removed {
            self.update_length();
        }
        removed
    }

    /// Pattern placed exactly at the given offset.
    pub fn pattern_at(&self, clock_offset: u32) -> Option<PatternId> {
        self.placements
            .iter()
            .find(|p| p.clock_offset == clock_offset)
            .map(|p| p.pattern)
    }

    /// Placement whose span covers the given clock.
    pub fn placement_covering(&self, clock: u32) -> Option<&Placement> {
        self.placements.iter().find(|p| p.contains(clock))
    }

    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    pub fn clear(&mut self) {
        self.placements.clear();
        self.length_clocks = 0;
    }

    fn update_length(&mut self) {
        self.length_clocks = self.placements.iter().map(|p| p.end()).max().unwrap_or(0);
    }

    /// Refreshes one placement's cached pattern length, keeping the derived
    /// sequence length current.
    pub fn refresh_placement_length(&mut self, pattern: PatternId, length_clocks: u32) {
        for p in &mut self.placements {
            if p.pattern == pattern {
                p.length_clocks = length_clocks;
            }
        }
        self.update_length();
    }

    pub fn length_clocks(&self) -> u32 {
        self.length_clocks
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn set_channel(&mut self, channel: u8) {
        if channel < 16 {
            self.channel = channel;
        }
    }

    pub fn output(&self) -> u8 {
        self.output
    }

    pub fn set_output(&mut self, output: u8) {
        self.output = output;
    }

    pub fn play_mode(&self) -> PlayMode {
        self.play_mode
    }

    pub fn set_play_mode(&mut self, mode: PlayMode) {
        self.play_mode = mode;
    }

    pub fn group(&self) -> u8 {
        self.group
    }

    pub fn set_group(&mut self, group: u8) {
        self.group = group;
    }

    pub fn tally_channel(&self) -> u8 {
        self.tally_channel
    }

    pub fn set_tally_channel(&mut self, channel: u8) {
        self.tally_channel = channel;
    }

    pub fn trigger_note(&self) -> u8 {
        self.trigger_note
    }

    pub fn set_trigger_note(&mut self, note: u8) {
        self.trigger_note = note;
    }

    pub fn solo(&self) -> bool {
        self.solo
    }

    pub fn set_solo(&mut self, solo: bool) {
        self.solo = solo;
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placement_sorted_and_length() {
        let mut seq = Sequence::new();
        assert!(seq.add_placement(96, 2, 96, false));
        assert!(seq.add_placement(0, 1, 96, false));
        assert_eq!(seq.placements()[0].pattern, 1);
        assert_eq!(seq.placements()[1].pattern, 2);
        assert_eq!(seq.length_clocks(), 192);
    }

    #[test]
    fn test_placement_overlap_rejected() {
        let mut seq = Sequence::new();
        assert!(seq.add_placement(0, 1, 96, false));
        assert!(!seq.add_placement(48, 2, 96, false));
        assert_eq!(seq.placements().len(), 1);
    }

    #[test]
    fn test_placement_force_evicts() {
        let mut seq = Sequence::new();
        seq.add_placement(0, 1, 96, false);
        assert!(seq.add_placement(48, 2, 96, true));
        assert_eq!(seq.placements().len(), 1);
        assert_eq!(seq.pattern_at(48), Some(2));
        assert_eq!(seq.length_clocks(), 144);
    }

    #[test]
    fn test_adjacent_placements_allowed() {
        let mut seq = Sequence::new();
        assert!(seq.add_placement(0, 1, 96, false));
        assert!(seq.add_placement(96, 2, 48, false));
        assert_eq!(seq.length_clocks(), 144);
    }

    #[test]
    fn test_remove_placement() {
        let mut seq = Sequence::new();
        seq.add_placement(0, 1, 96, false);
        seq.add_placement(96, 2, 96, false);
        assert!(seq.remove_placement(96));
        assert!(!seq.remove_placement(96));
        assert_eq!(seq.length_clocks(), 96);
    }

    #[test]
    fn test_placement_covering() {
        let mut seq = Sequence::new();
        seq.add_placement(96, 1, 96, false);
        assert!(seq.placement_covering(95).is_none());
        assert_eq!(seq.placement_covering(96).unwrap().pattern, 1);
        assert_eq!(seq.placement_covering(191).unwrap().pattern, 1);
        assert!(seq.placement_covering(192).is_none());
    }

    #[test]
    fn test_refresh_placement_length() {
        let mut seq = Sequence::new();
        seq.add_placement(0, 1, 96, false);
        seq.refresh_placement_length(1, 48);
        assert_eq!(seq.length_clocks(), 48);
    }

    #[test]
    fn test_play_mode_policies() {
        assert!(PlayMode::Loop.loops());
        assert!(!PlayMode::OneShot.loops());
        assert!(!PlayMode::Loop.bar_gated());
        assert!(PlayMode::LoopAll.bar_gated());
        assert!(PlayMode::LoopSync.restarts_on_sync());
        assert!(!PlayMode::LoopAll.restarts_on_sync());
    }
}
