// Controller - the control-thread surface over the data model and engine

use crate::engine::transport::{SharedTransport, TransportState};
use crate::engine::EngineView;
use crate::messaging::channels::{CommandProducer, NotificationConsumer};
use crate::messaging::command::{Command, TimedMessage};
use crate::messaging::notification::Notification;
use crate::midi::event::{status, MidiMessage};
use crate::project;
use crate::sequencer::manager::PatternManager;
use crate::sequencer::sequence::{PlayMode, PlayState};
use crate::sequencer::snapshot::ModelSnapshot;
use crate::sequencer::timebase::TimeSig;
use crate::sequencer::{PatternId, SequenceId, SongId};
use ringbuf::traits::{Consumer, Producer};
use std::path::Path;
use std::sync::Arc;

/// Everything the application thread holds: the mutable data model, the
/// command/notification channels, and the engine's published view.
///
/// Every model edit republishes an immutable snapshot for the engine, so the
/// realtime thread observes edits atomically between cycles and never shares
/// mutable state with this side.
pub struct Controller {
    manager: PatternManager,
    model_tx: triple_buffer::Input<Arc<ModelSnapshot>>,
    commands: CommandProducer,
    notifications: NotificationConsumer,
    view_rx: triple_buffer::Output<EngineView>,
    transport: Arc<SharedTransport>,
    sample_rate: f64,
    selected_pattern: PatternId,
}

impl Controller {
    pub(crate) fn new(
        manager: PatternManager,
        model_tx: triple_buffer::Input<Arc<ModelSnapshot>>,
        commands: CommandProducer,
        notifications: NotificationConsumer,
        view_rx: triple_buffer::Output<EngineView>,
        transport: Arc<SharedTransport>,
        sample_rate: f64,
    ) -> Self {
        let mut controller = Self {
            manager,
            model_tx,
            commands,
            notifications,
            view_rx,
            transport,
            sample_rate,
            selected_pattern: 0,
        };
        controller.commit();
        controller
    }

    /// Publishes the current model state to the engine.
    fn commit(&mut self) {
        let snapshot = self.manager.snapshot();
        self.model_tx.write(snapshot);
    }

    fn send(&mut self, command: Command) {
        if self.commands.try_push(command).is_err() {
            log::warn!("command queue full, command dropped");
        }
    }

    fn view(&mut self) -> EngineView {
        *self.view_rx.read()
    }

    // -- pattern selection & editing ---------------------------------------

    pub fn select_pattern(&mut self, pattern: PatternId) {
        self.selected_pattern = pattern;
        self.manager.pattern_mut(pattern);
        self.commit();
    }

    pub fn selected_pattern(&self) -> PatternId {
        self.selected_pattern
    }

    pub fn add_note(&mut self, step: u32, note: u8, velocity: u8, duration: f32) -> bool {
        let id = self.selected_pattern;
        let added = self.manager.pattern_mut(id).add_note(step, note, velocity, duration);
        if added {
            self.commit();
        }
        added
    }

    pub fn remove_note(&mut self, step: u32, note: u8) {
        let id = self.selected_pattern;
        self.manager.pattern_mut(id).remove_note(step, note);
        self.commit();
    }

    pub fn note_velocity(&self, step: u32, note: u8) -> Option<u8> {
        self.manager
            .pattern(self.selected_pattern)
            .and_then(|p| p.note_velocity(step, note))
    }

    pub fn set_note_velocity(&mut self, step: u32, note: u8, velocity: u8) {
        let id = self.selected_pattern;
        self.manager.pattern_mut(id).set_note_velocity(step, note, velocity);
        self.commit();
    }

    pub fn note_duration(&self, step: u32, note: u8) -> Option<f32> {
        self.manager
            .pattern(self.selected_pattern)
            .and_then(|p| p.note_duration(step, note))
    }

    pub fn note_start(&self, step: u32, note: u8) -> Option<u32> {
        self.manager
            .pattern(self.selected_pattern)
            .and_then(|p| p.note_start(step, note))
    }

    pub fn add_program_change(&mut self, step: u32, program: u8) -> bool {
        let id = self.selected_pattern;
        let added = self.manager.pattern_mut(id).add_program_change(step, program);
        if added {
            self.commit();
        }
        added
    }

    pub fn remove_program_change(&mut self, step: u32) -> bool {
        let id = self.selected_pattern;
        let removed = self.manager.pattern_mut(id).remove_program_change(step);
        if removed {
            self.commit();
        }
        removed
    }

    pub fn program_change(&self, step: u32) -> Option<u8> {
        self.manager
            .pattern(self.selected_pattern)
            .and_then(|p| p.program_change(step))
    }

    pub fn add_control(
        &mut self,
        step: u32,
        control: u8,
        value_start: u8,
        value_end: u8,
        duration: f32,
    ) -> bool {
        let id = self.selected_pattern;
        let added = self
            .manager
            .pattern_mut(id)
            .add_control(step, control, value_start, value_end, duration);
        if added {
            self.commit();
        }
        added
    }

    pub fn remove_control(&mut self, step: u32, control: u8) {
        let id = self.selected_pattern;
        self.manager.pattern_mut(id).remove_control(step, control);
        self.commit();
    }

    pub fn transpose(&mut self, semitones: i8) {
        let id = self.selected_pattern;
        self.manager.pattern_mut(id).transpose(semitones);
        self.commit();
    }

    pub fn change_velocity_all(&mut self, delta: i32) {
        let id = self.selected_pattern;
        self.manager.pattern_mut(id).change_velocity_all(delta);
        self.commit();
    }

    pub fn change_duration_all(&mut self, delta: f32) {
        let id = self.selected_pattern;
        self.manager.pattern_mut(id).change_duration_all(delta);
        self.commit();
    }

    pub fn clear_pattern(&mut self) {
        let id = self.selected_pattern;
        self.manager.pattern_mut(id).clear();
        self.commit();
    }

    pub fn set_beats(&mut self, beats: u32) {
        let id = self.selected_pattern;
        self.manager.pattern_mut(id).set_beats(beats);
        self.manager.update_all_sequence_lengths();
        self.commit();
    }

    pub fn beats(&self) -> u32 {
        self.manager
            .pattern(self.selected_pattern)
            .map(|p| p.beats())
            .unwrap_or(0)
    }

    pub fn set_steps_per_beat(&mut self, steps_per_beat: u32) -> bool {
        let id = self.selected_pattern;
        let changed = self.manager.pattern_mut(id).set_steps_per_beat(steps_per_beat);
        if changed {
            self.manager.update_all_sequence_lengths();
            self.commit();
        }
        changed
    }

    pub fn steps_per_beat(&self) -> u32 {
        self.manager
            .pattern(self.selected_pattern)
            .map(|p| p.steps_per_beat())
            .unwrap_or(0)
    }

    pub fn steps(&self) -> u32 {
        self.manager
            .pattern(self.selected_pattern)
            .map(|p| p.steps())
            .unwrap_or(0)
    }

    pub fn pattern_length(&self, pattern: PatternId) -> u32 {
        self.manager
            .pattern(pattern)
            .map(|p| p.length_clocks())
            .unwrap_or(0)
    }

    pub fn set_scale(&mut self, scale: u8) {
        let id = self.selected_pattern;
        self.manager.pattern_mut(id).set_scale(scale);
        self.commit();
    }

    pub fn scale(&self) -> u8 {
        self.manager
            .pattern(self.selected_pattern)
            .map(|p| p.scale())
            .unwrap_or(0)
    }

    pub fn set_tonic(&mut self, tonic: u8) {
        let id = self.selected_pattern;
        self.manager.pattern_mut(id).set_tonic(tonic);
        self.commit();
    }

    pub fn tonic(&self) -> u8 {
        self.manager
            .pattern(self.selected_pattern)
            .map(|p| p.tonic())
            .unwrap_or(0)
    }

    pub fn copy_pattern(&mut self, source: PatternId, destination: PatternId) {
        self.manager.copy_pattern(source, destination);
        self.commit();
    }

    // -- sequences ---------------------------------------------------------

    pub fn add_pattern(
        &mut self,
        sequence: SequenceId,
        clock_offset: u32,
        pattern: PatternId,
        force: bool,
    ) -> bool {
        let added = self
            .manager
            .add_pattern_to_sequence(sequence, clock_offset, pattern, force);
        if added {
            self.commit();
        }
        added
    }

    pub fn remove_pattern(&mut self, sequence: SequenceId, clock_offset: u32) -> bool {
        let removed = self.manager.remove_pattern_from_sequence(sequence, clock_offset);
        if removed {
            self.commit();
        }
        removed
    }

    pub fn pattern_at(&self, sequence: SequenceId, clock_offset: u32) -> Option<PatternId> {
        self.manager
            .sequence(sequence)
            .and_then(|s| s.pattern_at(clock_offset))
    }

    pub fn clear_sequence(&mut self, sequence: SequenceId) {
        if let Some(seq) = self.manager.sequence_mut(sequence) {
            seq.clear();
            self.commit();
        }
    }

    pub fn sequence_length(&self, sequence: SequenceId) -> u32 {
        self.manager
            .sequence(sequence)
            .map(|s| s.length_clocks())
            .unwrap_or(0)
    }

    pub fn set_channel(&mut self, sequence: SequenceId, channel: u8) {
        if let Some(seq) = self.manager.sequence_mut(sequence) {
            seq.set_channel(channel);
            self.commit();
        }
    }

    pub fn channel(&self, sequence: SequenceId) -> Option<u8> {
        self.manager.sequence(sequence).map(|s| s.channel())
    }

    pub fn set_output(&mut self, sequence: SequenceId, output: u8) {
        if let Some(seq) = self.manager.sequence_mut(sequence) {
            seq.set_output(output);
            self.commit();
        }
    }

    pub fn set_play_mode(&mut self, sequence: SequenceId, mode: PlayMode) {
        if let Some(seq) = self.manager.sequence_mut(sequence) {
            seq.set_play_mode(mode);
            self.commit();
        }
    }

    pub fn play_mode(&self, sequence: SequenceId) -> Option<PlayMode> {
        self.manager.sequence(sequence).map(|s| s.play_mode())
    }

    pub fn set_group(&mut self, sequence: SequenceId, group: u8) {
        if let Some(seq) = self.manager.sequence_mut(sequence) {
            seq.set_group(group);
            self.commit();
        }
    }

    pub fn group(&self, sequence: SequenceId) -> Option<u8> {
        self.manager.sequence(sequence).map(|s| s.group())
    }

    pub fn set_tally_channel(&mut self, sequence: SequenceId, channel: u8) {
        if let Some(seq) = self.manager.sequence_mut(sequence) {
            seq.set_tally_channel(channel);
            self.commit();
        }
    }

    pub fn tally_channel(&self, sequence: SequenceId) -> Option<u8> {
        self.manager.sequence(sequence).map(|s| s.tally_channel())
    }

    // -- play state --------------------------------------------------------

    pub fn set_play_state(&mut self, sequence: SequenceId, state: PlayState) {
        self.send(Command::SetPlayState { sequence, state });
    }

    pub fn toggle_play_state(&mut self, sequence: SequenceId) {
        self.send(Command::TogglePlayState { sequence });
    }

    pub fn play_state(&mut self, sequence: SequenceId) -> PlayState {
        self.view()
            .play_states
            .get(sequence as usize)
            .copied()
            .unwrap_or(PlayState::Stopped)
    }

    pub fn play_position(&mut self, sequence: SequenceId) -> u32 {
        self.view()
            .positions
            .get(sequence as usize)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_play_position(&mut self, sequence: SequenceId, clock: u32) {
        self.send(Command::SetPlayPosition { sequence, clock });
    }

    pub fn step(&mut self, sequence: SequenceId) -> u32 {
        self.view().steps.get(sequence as usize).copied().unwrap_or(0)
    }

    pub fn set_step(&mut self, sequence: SequenceId, step: u32) {
        self.send(Command::SetStep { sequence, step });
    }

    // -- songs ---------------------------------------------------------------

    pub fn select_song(&mut self, song: SongId) {
        self.manager.select_song(song);
        self.commit();
    }

    pub fn current_song(&self) -> SongId {
        self.manager.current_song()
    }

    pub fn add_track(&mut self, song: SongId) -> Option<SequenceId> {
        let added = self.manager.add_track(song);
        if added.is_some() {
            self.commit();
        }
        added
    }

    pub fn remove_track(&mut self, song: SongId, track: usize) -> Option<SequenceId> {
        let removed = self.manager.remove_track(song, track);
        if removed.is_some() {
            self.commit();
        }
        removed
    }

    pub fn track_count(&self, song: SongId) -> usize {
        self.manager.song(song).map(|s| s.track_count()).unwrap_or(0)
    }

    pub fn track_sequence(&self, song: SongId, track: usize) -> Option<SequenceId> {
        self.manager.song(song).and_then(|s| s.track(track))
    }

    pub fn clear_song(&mut self, song: SongId) {
        self.manager.clear_song(song);
        self.commit();
    }

    pub fn copy_song(&mut self, source: SongId, destination: SongId) {
        self.manager.copy_song(source, destination);
        self.commit();
    }

    /// Solos a track: every other track in the song is stopped and un-soloed;
    /// when the song is playing the soloed track is forced on.
    pub fn solo(&mut self, song: SongId, track: usize, solo: bool) {
        let tracks: Vec<SequenceId> = self
            .manager
            .song(song)
            .map(|s| s.tracks().to_vec())
            .unwrap_or_default();
        for id in &tracks {
            if let Some(seq) = self.manager.sequence_mut(*id) {
                seq.set_solo(false);
            }
            self.send(Command::SetPlayState {
                sequence: *id,
                state: PlayState::Stopped,
            });
        }
        if let Some(id) = self.manager.song(song).and_then(|s| s.track(track)) {
            if let Some(seq) = self.manager.sequence_mut(id) {
                seq.set_solo(solo);
            }
            if solo && self.is_song_playing() {
                self.send(Command::SetPlayState {
                    sequence: id,
                    state: PlayState::Playing,
                });
            }
        }
        self.commit();
    }

    // -- timebase ------------------------------------------------------------

    pub fn set_tempo(&mut self, song: SongId, tempo: u16, bar: u16, clock: u32) {
        self.manager.set_tempo(song, tempo, bar, clock);
        self.commit();
    }

    pub fn tempo(&mut self, song: SongId, bar: u16, clock: u32) -> u16 {
        self.manager
            .song(song)
            .map(|s| s.tempo_at(bar, clock))
            .unwrap_or(crate::sequencer::timebase::DEFAULT_TEMPO)
    }

    pub fn set_time_sig(&mut self, song: SongId, sig: TimeSig, bar: u16) {
        self.manager.set_time_sig(song, sig, bar);
        self.commit();
    }

    pub fn time_sig(&self, song: SongId, bar: u16) -> TimeSig {
        self.manager
            .song(song)
            .map(|s| s.timesig_at(bar))
            .unwrap_or_default()
    }

    pub fn remove_timebase_event(
        &mut self,
        song: SongId,
        bar: u16,
        clock: u32,
        kind: crate::sequencer::timebase::TimebaseKind,
    ) -> bool {
        let removed = self.manager.remove_timebase_event(song, bar, clock, kind);
        if removed {
            self.commit();
        }
        removed
    }

    // -- song transport ------------------------------------------------------

    pub fn start_song(&mut self, fast: bool) {
        self.send(Command::StartSong { fast });
    }

    pub fn stop_song(&mut self) {
        self.send(Command::StopSong);
    }

    pub fn pause_song(&mut self) {
        self.send(Command::PauseSong);
    }

    pub fn toggle_song(&mut self) {
        if self.is_song_playing() {
            self.pause_song();
        } else {
            self.start_song(false);
        }
    }

    pub fn is_song_playing(&mut self) -> bool {
        self.view().song_status == PlayState::Playing
    }

    pub fn song_position(&mut self) -> u32 {
        self.view().song_position
    }

    pub fn set_song_position(&mut self, clock: u32) {
        self.send(Command::SetSongPosition(clock));
    }

    pub fn stop_all(&mut self) {
        self.send(Command::StopAll);
    }

    // -- transport -----------------------------------------------------------

    pub fn transport_start(&mut self) {
        self.transport.start();
    }

    pub fn transport_stop(&mut self) {
        self.transport.stop();
    }

    pub fn transport_toggle(&mut self) {
        self.transport.toggle();
    }

    pub fn transport_locate(&mut self, frame: u64) {
        self.transport.locate(frame);
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport.query()
    }

    pub fn set_transport_tempo(&mut self, tempo: f64) {
        self.send(Command::SetTempo(tempo));
    }

    pub fn transport_tempo(&mut self) -> f64 {
        self.view().tempo
    }

    /// Time signature currently in effect at the transport position.
    pub fn transport_time_sig(&mut self) -> TimeSig {
        self.view().time_sig
    }

    /// Current bar, beat and tick of the transport.
    pub fn bbt(&mut self) -> (u32, u32, u32) {
        let view = self.view();
        (view.bar, view.beat, view.tick)
    }

    // -- trigger & input configuration ---------------------------------------

    pub fn set_trigger_channel(&mut self, channel: u8) {
        self.manager.set_trigger_channel(channel);
        self.commit();
    }

    pub fn trigger_channel(&self) -> u8 {
        self.manager.trigger_channel()
    }

    pub fn set_trigger_note(&mut self, sequence: SequenceId, note: u8) {
        self.manager.set_trigger_note(sequence, note);
        self.commit();
    }

    pub fn trigger_note(&self, sequence: SequenceId) -> u8 {
        self.manager.trigger_note(sequence)
    }

    pub fn set_input_channel(&mut self, channel: Option<u8>) {
        self.manager.set_input_channel(channel);
        self.commit();
    }

    pub fn input_channel(&self) -> Option<u8> {
        self.manager.input_channel()
    }

    // -- direct MIDI ---------------------------------------------------------

    /// Plays a note immediately; the note-off is scheduled `duration_ms`
    /// later through the same frame-keyed schedule as sequenced notes.
    pub fn play_note(&mut self, note: u8, velocity: u8, channel: u8, duration_ms: u32) {
        if note > 127 || velocity > 127 || channel > 15 || duration_ms > 60_000 {
            return;
        }
        self.send(Command::Midi(TimedMessage::immediate(
            MidiMessage::channel_voice(status::NOTE_ON, channel, note, velocity),
        )));
        if duration_ms > 0 {
            let delay_frames = (duration_ms as f64 / 1000.0 * self.sample_rate) as u64;
            self.send(Command::Midi(TimedMessage {
                message: MidiMessage::note_off(channel, note),
                delay_frames,
            }));
        }
    }

    pub fn send_midi_start(&mut self) {
        self.send_realtime(status::START);
    }

    pub fn send_midi_stop(&mut self) {
        self.send_realtime(status::STOP);
    }

    pub fn send_midi_continue(&mut self) {
        self.send_realtime(status::CONTINUE);
    }

    pub fn send_midi_clock(&mut self) {
        self.send_realtime(status::CLOCK);
    }

    fn send_realtime(&mut self, status: u8) {
        self.send(Command::Midi(TimedMessage::immediate(
            MidiMessage::realtime(status),
        )));
    }

    pub fn send_midi_song_position(&mut self, position: u16) {
        self.send(Command::Midi(TimedMessage::immediate(MidiMessage::new(
            status::SONG_POSITION,
            (position & 0x7F) as u8,
            ((position >> 7) & 0x7F) as u8,
        ))));
    }

    pub fn send_midi_song_select(&mut self, song: u8) {
        if song > 127 {
            return;
        }
        self.send(Command::Midi(TimedMessage::immediate(MidiMessage::new(
            status::SONG_SELECT,
            song,
            0,
        ))));
    }

    // -- notifications -------------------------------------------------------

    /// Drains engine notifications, applying the model edits they request.
    /// Call periodically from the application loop.
    pub fn process_notifications(&mut self) {
        while let Some(notification) = self.notifications.try_pop() {
            match notification {
                Notification::ToggleStep {
                    step,
                    note,
                    velocity,
                } => {
                    if self.note_velocity(step, note).is_some() {
                        self.remove_note(step, note);
                    } else {
                        self.add_note(step, note, velocity, 1.0);
                    }
                }
                Notification::SongSelect(song) => self.select_song(song),
                Notification::TransportStopped => {
                    log::debug!("transport stopped, nothing left playing");
                }
                Notification::ScheduleOverflow(count) => {
                    log::warn!("schedule overflow, {count} messages dropped");
                }
            }
        }
    }

    // -- persistence ---------------------------------------------------------

    /// Saves the model to a RON project file.
    pub fn save(&mut self, path: &Path) -> bool {
        match project::save(&self.manager, path) {
            Ok(()) => true,
            Err(err) => {
                log::error!("save failed: {err}");
                false
            }
        }
    }

    /// Loads a project file, stopping playback first so the swap never races
    /// the realtime thread.
    pub fn load(&mut self, path: &Path) -> bool {
        let file = match project::load(path) {
            Ok(file) => file,
            Err(err) => {
                log::error!("load failed: {err}");
                return false;
            }
        };
        self.transport.stop();
        self.send(Command::StopAll);
        file.apply(&mut self.manager);
        self.commit();
        true
    }
}
