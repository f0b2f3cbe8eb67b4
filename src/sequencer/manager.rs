// PatternManager - root of the mutable data model

use crate::sequencer::pattern::Pattern;
use crate::sequencer::sequence::Sequence;
use crate::sequencer::snapshot::{ModelSnapshot, SequenceSnapshot, MAX_SEQUENCES};
use crate::sequencer::song::Song;
use crate::sequencer::{PatternId, SequenceId, SongId};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Song handle reserved for the pattern editor; MIDI input on the input
/// channel only programs steps while this song is selected.
pub const EDITOR_SONG: SongId = 0;

/// Owns every pattern, sequence and song, resolves handles, and builds the
/// immutable snapshots the realtime engine plays from.
///
/// All mutation happens on the control thread. Objects are created on first
/// access by handle; patterns are kept behind `Arc` so snapshots share them
/// without deep copies (edits go through `Arc::make_mut`).
pub struct PatternManager {
    patterns: BTreeMap<PatternId, Arc<Pattern>>,
    sequences: BTreeMap<SequenceId, Sequence>,
    songs: BTreeMap<SongId, Song>,
    current_song: SongId,
    trigger_channel: u8,
    input_channel: Option<u8>,
    epoch: u64,
    timebase_epoch: u64,
    timebase_dirty: bool,
}

impl PatternManager {
    pub fn new() -> Self {
        let mut manager = Self {
            patterns: BTreeMap::new(),
            sequences: BTreeMap::new(),
            songs: BTreeMap::new(),
            current_song: 1,
            trigger_channel: 15,
            input_channel: None,
            epoch: 0,
            timebase_epoch: 0,
            timebase_dirty: false,
        };
        // Editor song with a single lane playing pattern 0
        let editor_seq = manager.add_track(EDITOR_SONG).unwrap_or(0);
        let editor_len = manager.pattern_mut(0).length_clocks();
        if let Some(seq) = manager.sequence_mut(editor_seq) {
            seq.add_placement(0, 0, editor_len, true);
        }
        manager
    }

    // -- pattern access ----------------------------------------------------

    pub fn pattern(&self, id: PatternId) -> Option<&Pattern> {
        self.patterns.get(&id).map(|p| p.as_ref())
    }

    /// Resolves a pattern for editing, creating it on first access.
    pub fn pattern_mut(&mut self, id: PatternId) -> &mut Pattern {
        let arc = self
            .patterns
            .entry(id)
            .or_insert_with(|| Arc::new(Pattern::default()));
        Arc::make_mut(arc)
    }

    pub fn pattern_ids(&self) -> impl Iterator<Item = PatternId> + '_ {
        self.patterns.keys().copied()
    }

    pub fn copy_pattern(&mut self, source: PatternId, destination: PatternId) {
        if source == destination {
            return;
        }
        if let Some(pattern) = self.patterns.get(&source).cloned() {
            self.patterns.insert(destination, pattern);
            self.update_all_sequence_lengths();
        }
    }

    // -- sequence access ---------------------------------------------------

    pub fn sequence(&self, id: SequenceId) -> Option<&Sequence> {
        self.sequences.get(&id)
    }

    /// Resolves a sequence for editing, creating it on first access.
    /// Handles at or beyond the fixed engine capacity are refused.
    pub fn sequence_mut(&mut self, id: SequenceId) -> Option<&mut Sequence> {
        if id as usize >= MAX_SEQUENCES {
            return None;
        }
        Some(self.sequences.entry(id).or_default())
    }

    /// Places a pattern in a sequence, resolving the pattern's current
    /// length for overlap checking.
    pub fn add_pattern_to_sequence(
        &mut self,
        sequence: SequenceId,
        clock_offset: u32,
        pattern: PatternId,
        force: bool,
    ) -> bool {
        let length = self.pattern_mut(pattern).length_clocks();
        let Some(seq) = self.sequence_mut(sequence) else {
            return false;
        };
        let added = seq.add_placement(clock_offset, pattern, length, force);
        if added {
            self.update_all_sequence_lengths();
        }
        added
    }

    pub fn remove_pattern_from_sequence(
        &mut self,
        sequence: SequenceId,
        clock_offset: u32,
    ) -> bool {
        let Some(seq) = self.sequences.get_mut(&sequence) else {
            return false;
        };
        let removed = seq.remove_placement(clock_offset);
        if removed {
            self.update_all_sequence_lengths();
        }
        removed
    }

    // -- song access -------------------------------------------------------

    pub fn song(&self, id: SongId) -> Option<&Song> {
        self.songs.get(&id)
    }

    pub fn song_mut(&mut self, id: SongId) -> &mut Song {
        self.songs.entry(id).or_default()
    }

    pub fn current_song(&self) -> SongId {
        self.current_song
    }

    pub fn select_song(&mut self, id: SongId) {
        if self.current_song != id {
            self.current_song = id;
            self.song_mut(id);
            self.timebase_dirty = true;
        }
    }

    /// Adds a track to a song, allocating a fresh sequence for it. Returns
    /// the new sequence handle, or `None` when the handle space is full.
    pub fn add_track(&mut self, song: SongId) -> Option<SequenceId> {
        let id = (0..MAX_SEQUENCES as SequenceId).find(|id| {
            !self.sequences.contains_key(id)
                && !self.songs.values().any(|s| s.has_track(*id))
        })?;
        self.sequences.insert(id, Sequence::new());
        self.song_mut(song).add_track(id);
        Some(id)
    }

    /// Removes a track binding and destroys its sequence.
    pub fn remove_track(&mut self, song: SongId, track: usize) -> Option<SequenceId> {
        let id = self.song_mut(song).remove_track(track)?;
        self.sequences.remove(&id);
        Some(id)
    }

    pub fn clear_song(&mut self, song: SongId) {
        let tracks: Vec<SequenceId> = self.song_mut(song).tracks().to_vec();
        for id in tracks {
            self.sequences.remove(&id);
        }
        self.song_mut(song).clear();
        if song == self.current_song {
            self.timebase_dirty = true;
        }
    }

    /// Deep-copies a song: its timebase, defaults, and fresh sequences
    /// cloned from the source tracks (a sequence plays in one song only).
    pub fn copy_song(&mut self, source: SongId, destination: SongId) {
        if source == destination || !self.songs.contains_key(&source) {
            return;
        }
        self.clear_song(destination);
        let src = self.songs.get(&source).cloned().unwrap_or_default();
        let tracks: Vec<SequenceId> = src.tracks().to_vec();
        {
            let dst = self.song_mut(destination);
            *dst.timebase_mut() = src.timebase().clone();
            dst.set_default_tempo(src.default_tempo());
            dst.set_default_time_sig(src.default_time_sig());
        }
        for track in tracks {
            if let Some(seq) = self.sequences.get(&track).cloned() {
                if let Some(new_id) = self.add_track(destination) {
                    self.sequences.insert(new_id, seq);
                }
            }
        }
        if destination == self.current_song {
            self.timebase_dirty = true;
        }
    }

    // -- timebase ----------------------------------------------------------

    pub fn set_tempo(&mut self, song: SongId, tempo: u16, bar: u16, clock: u32) {
        self.song_mut(song).set_tempo(tempo, bar, clock);
        if song == self.current_song {
            self.timebase_dirty = true;
        }
    }

    pub fn set_time_sig(
        &mut self,
        song: SongId,
        sig: crate::sequencer::timebase::TimeSig,
        bar: u16,
    ) {
        self.song_mut(song).set_time_sig(sig, bar);
        if song == self.current_song {
            self.timebase_dirty = true;
        }
    }

    pub fn remove_timebase_event(
        &mut self,
        song: SongId,
        bar: u16,
        clock: u32,
        kind: crate::sequencer::timebase::TimebaseKind,
    ) -> bool {
        let removed = self.song_mut(song).timebase_mut().remove(bar, clock, kind);
        if removed && song == self.current_song {
            self.timebase_dirty = true;
        }
        removed
    }

    // -- trigger / input configuration -------------------------------------

    pub fn trigger_channel(&self) -> u8 {
        self.trigger_channel
    }

    pub fn set_trigger_channel(&mut self, channel: u8) {
        if channel < 16 {
            self.trigger_channel = channel;
        }
    }

    pub fn trigger_note(&self, sequence: SequenceId) -> u8 {
        self.sequence(sequence)
            .map(|s| s.trigger_note())
            .unwrap_or(0xFF)
    }

    pub fn set_trigger_note(&mut self, sequence: SequenceId, note: u8) {
        if let Some(seq) = self.sequence_mut(sequence) {
            seq.set_trigger_note(note);
        }
    }

    /// Maps a trigger note to the sequence bound to it.
    pub fn trigger(&self, note: u8) -> Option<SequenceId> {
        self.sequences
            .iter()
            .find(|(_, seq)| seq.trigger_note() == note)
            .map(|(id, _)| *id)
    }

    pub fn input_channel(&self) -> Option<u8> {
        self.input_channel
    }

    pub fn set_input_channel(&mut self, channel: Option<u8>) {
        self.input_channel = channel.filter(|c| *c < 16);
    }

    // -- dependent lengths -------------------------------------------------

    /// Refreshes every placement's cached pattern length after a pattern was
    /// resized, then every sequence's derived length.
    pub fn update_all_sequence_lengths(&mut self) {
        let lengths: Vec<(PatternId, u32)> = self
            .patterns
            .iter()
            .map(|(id, p)| (*id, p.length_clocks()))
            .collect();
        for seq in self.sequences.values_mut() {
            for (id, length) in &lengths {
                seq.refresh_placement_length(*id, *length);
            }
        }
    }

    /// Song length in clocks: the longest of its tracks.
    pub fn song_length(&self, song: SongId) -> u32 {
        self.songs
            .get(&song)
            .map(|s| {
                s.tracks()
                    .iter()
                    .filter_map(|id| self.sequences.get(id))
                    .map(|seq| seq.length_clocks())
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    // -- snapshot ----------------------------------------------------------

    /// Builds the immutable view of the current song for the realtime
    /// engine. Call after every edit batch and publish the result.
    pub fn snapshot(&mut self) -> Arc<ModelSnapshot> {
        self.epoch += 1;
        if self.timebase_dirty {
            self.timebase_epoch += 1;
            self.timebase_dirty = false;
        }
        let song = self.song_mut(self.current_song).clone();
        let mut sequences = Vec::with_capacity(song.track_count());
        for id in song.tracks() {
            if sequences.iter().any(|s: &SequenceSnapshot| s.id == *id) {
                continue;
            }
            let Some(seq) = self.sequences.get(id) else {
                continue;
            };
            let placements = seq
                .placements()
                .iter()
                .filter_map(|p| {
                    self.patterns
                        .get(&p.pattern)
                        .map(|pattern| (p.clock_offset, Arc::clone(pattern)))
                })
                .collect();
            sequences.push(SequenceSnapshot {
                id: *id,
                channel: seq.channel(),
                output: seq.output(),
                play_mode: seq.play_mode(),
                group: seq.group(),
                tally_channel: seq.tally_channel(),
                trigger_note: seq.trigger_note(),
                solo: seq.solo(),
                placements,
                length_clocks: seq.length_clocks(),
            });
        }
        let editor_sequence = if self.current_song == EDITOR_SONG && !sequences.is_empty() {
            Some(0)
        } else {
            None
        };
        Arc::new(ModelSnapshot {
            epoch: self.epoch,
            timebase_epoch: self.timebase_epoch,
            song: self.current_song,
            song_length: self.song_length(self.current_song),
            sequences,
            timebase: Arc::new(song.timebase().clone()),
            default_tempo: song.default_tempo(),
            default_time_sig: song.default_time_sig(),
            trigger_channel: self.trigger_channel,
            input_channel: self.input_channel,
            editor_sequence,
        })
    }

    // -- persistence plumbing ----------------------------------------------

    pub(crate) fn patterns(&self) -> &BTreeMap<PatternId, Arc<Pattern>> {
        &self.patterns
    }

    pub(crate) fn sequences(&self) -> &BTreeMap<SequenceId, Sequence> {
        &self.sequences
    }

    pub(crate) fn songs(&self) -> &BTreeMap<SongId, Song> {
        &self.songs
    }

    pub(crate) fn restore(
        &mut self,
        patterns: BTreeMap<PatternId, Pattern>,
        sequences: BTreeMap<SequenceId, Sequence>,
        songs: BTreeMap<SongId, Song>,
        current_song: SongId,
        trigger_channel: u8,
        input_channel: Option<u8>,
    ) {
        self.patterns = patterns
            .into_iter()
            .map(|(id, p)| (id, Arc::new(p)))
            .collect();
        self.sequences = sequences;
        self.songs = songs;
        self.current_song = current_song;
        self.trigger_channel = trigger_channel;
        self.input_channel = input_channel;
        self.update_all_sequence_lengths();
        self.timebase_dirty = true;
    }
}

impl Default for PatternManager {
    fn default() -> Self {
        Self::new()
    }
}
