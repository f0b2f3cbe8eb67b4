// Engine - the realtime cycle: commands, MIDI input, clock walk, drain

pub mod player;
pub mod schedule;
pub mod transport;

use crate::messaging::channels::{CommandConsumer, MidiInConsumer, NotificationProducer};
use crate::messaging::command::Command;
use crate::messaging::notification::Notification;
use crate::midi::event::{status, MidiMessage};
use crate::midi::output::MidiSink;
use crate::sequencer::sequence::PlayState;
use crate::sequencer::snapshot::{ModelSnapshot, MAX_SEQUENCES};
use crate::sequencer::timebase::{TimeSig, CLOCKS_PER_BEAT, TICKS_PER_CLOCK};
use crate::sequencer::EDITOR_SONG;
use player::SequencePlayer;
use ringbuf::traits::{Consumer, Producer};
use schedule::Schedule;
use std::sync::Arc;
use transport::{
    bbt_of_clock, clock_of_bbt, frame_of_bbt, frames_per_clock, position_from_frame,
    SharedTransport,
};

/// Pending messages the schedule can hold; inserts beyond this are dropped
/// and counted.
pub const SCHEDULE_CAPACITY: usize = 1024;

/// Snapshot of the engine's playback state published every cycle for
/// control-side getters.
#[derive(Debug, Clone, Copy)]
pub struct EngineView {
    pub frame: u64,
    pub rolling: bool,
    pub bar: u32,
    pub beat: u32,
    pub tick: u32,
    pub bar_start_tick: f64,
    pub tempo: f64,
    pub time_sig: TimeSig,
    pub song_position: u32,
    pub song_status: PlayState,
    pub play_states: [PlayState; MAX_SEQUENCES],
    pub positions: [u32; MAX_SEQUENCES],
    pub steps: [u32; MAX_SEQUENCES],
}

impl Default for EngineView {
    fn default() -> Self {
        Self {
            frame: 0,
            rolling: false,
            bar: 1,
            beat: 1,
            tick: 0,
            bar_start_tick: 0.0,
            tempo: crate::sequencer::timebase::DEFAULT_TEMPO as f64,
            time_sig: TimeSig::default(),
            song_position: 0,
            song_status: PlayState::Stopped,
            play_states: [PlayState::Stopped; MAX_SEQUENCES],
            positions: [0; MAX_SEQUENCES],
            steps: [0; MAX_SEQUENCES],
        }
    }
}

/// The realtime half of the sequencer. The host hands it a period once per
/// cycle; everything it needs is owned here or arrives through lock-free
/// channels, so the cycle never blocks or allocates.
pub struct Engine {
    model_rx: triple_buffer::Output<Arc<ModelSnapshot>>,
    core: EngineCore,
}

impl Engine {
    pub(crate) fn new(
        model_rx: triple_buffer::Output<Arc<ModelSnapshot>>,
        commands: CommandConsumer,
        midi_in: MidiInConsumer,
        notifications: NotificationProducer,
        view_tx: triple_buffer::Input<EngineView>,
        transport: Arc<SharedTransport>,
        sample_rate: f64,
    ) -> Self {
        Self {
            model_rx,
            core: EngineCore::new(commands, midi_in, notifications, view_tx, transport, sample_rate),
        }
    }

    /// Runs one realtime cycle of `frames` samples, draining due MIDI into
    /// the sink.
    pub fn process_cycle(&mut self, frames: u32, sink: &mut dyn MidiSink) {
        let snapshot = self.model_rx.read();
        self.core.run(snapshot, frames, sink);
    }

    pub fn sample_rate(&self) -> f64 {
        self.core.sample_rate
    }

    /// Host sample-rate change; clock intervals are recomputed.
    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.core.sample_rate = sample_rate;
        self.core.frames_per_clock = frames_per_clock(self.core.tempo, sample_rate);
    }
}

struct EngineCore {
    commands: CommandConsumer,
    midi_in: MidiInConsumer,
    notifications: NotificationProducer,
    view_tx: triple_buffer::Input<EngineView>,
    transport: Arc<SharedTransport>,
    schedule: Schedule,
    players: [SequencePlayer; MAX_SEQUENCES],
    sample_rate: f64,

    /// Monotonic frame counter; cycle N starts at `frame`.
    frame: u64,
    /// Song-position frame; frozen while the transport is stopped.
    song_frame: u64,
    rolling: bool,

    tempo: f64,
    time_sig: TimeSig,
    bar: u32,
    beat: u32,
    clock_in_beat: u32,
    bar_start_tick: f64,
    frames_per_clock: f64,
    frames_to_next_clock: f64,
    next_timebase_idx: usize,

    song_status: PlayState,
    song_position: u32,

    last_epoch: u64,
    last_timebase_epoch: u64,
    needs_recompute: bool,
    reposition: Option<u64>,
}

impl EngineCore {
    fn new(
        commands: CommandConsumer,
        midi_in: MidiInConsumer,
        notifications: NotificationProducer,
        view_tx: triple_buffer::Input<EngineView>,
        transport: Arc<SharedTransport>,
        sample_rate: f64,
    ) -> Self {
        let tempo = crate::sequencer::timebase::DEFAULT_TEMPO as f64;
        Self {
            commands,
            midi_in,
            notifications,
            view_tx,
            transport,
            schedule: Schedule::new(SCHEDULE_CAPACITY),
            players: [SequencePlayer::new(); MAX_SEQUENCES],
            sample_rate,
            frame: 0,
            song_frame: 0,
            rolling: false,
            tempo,
            time_sig: TimeSig::default(),
            bar: 1,
            beat: 1,
            clock_in_beat: 0,
            bar_start_tick: 0.0,
            frames_per_clock: frames_per_clock(tempo, sample_rate),
            frames_to_next_clock: 0.0,
            next_timebase_idx: 0,
            song_status: PlayState::Stopped,
            song_position: 0,
            last_epoch: 0,
            last_timebase_epoch: 0,
            needs_recompute: true,
            reposition: None,
        }
    }

    fn run(&mut self, snap: &ModelSnapshot, frames: u32, sink: &mut dyn MidiSink) {
        self.refresh_model(snap);
        self.drain_commands(snap);
        self.drain_midi_input(snap);
        self.apply_transport_requests();

        if let Some(frame) = self.reposition.take() {
            self.recompute_from_frame(snap, frame);
        } else if self.needs_recompute {
            self.recompute_from_frame(snap, self.song_frame);
        }
        self.needs_recompute = false;

        if self.rolling {
            self.walk_clock_pulses(snap, frames);
            self.song_frame += frames as u64;
        }

        self.schedule.drain_into(self.frame, frames, sink);
        self.frame += frames as u64;

        self.report_overflow();
        self.publish_view();
    }

    // -- model / configuration --------------------------------------------

    fn refresh_model(&mut self, snap: &ModelSnapshot) {
        if snap.epoch == self.last_epoch {
            return;
        }
        self.last_epoch = snap.epoch;
        if snap.timebase_epoch != self.last_timebase_epoch {
            self.last_timebase_epoch = snap.timebase_epoch;
            // The map behind the current position may have changed; re-derive
            // BBT, tempo and the event cursor from the song frame.
            self.needs_recompute = true;
        }
    }

    // -- command handling --------------------------------------------------

    fn drain_commands(&mut self, snap: &ModelSnapshot) {
        while let Some(command) = self.commands.try_pop() {
            match command {
                Command::SetPlayState { sequence, state } => {
                    self.apply_play_state(snap, sequence, state);
                }
                Command::TogglePlayState { sequence } => {
                    if let Some(player) = self.players.get_mut(sequence as usize) {
                        let state = player.toggle(self.rolling);
                        self.after_state_change(snap, sequence, state);
                    }
                }
                Command::SetStep { sequence, step } => {
                    if let Some(player) = self.players.get_mut(sequence as usize) {
                        player.set_step(step);
                    }
                }
                Command::SetPlayPosition { sequence, clock } => {
                    if let Some(player) = self.players.get_mut(sequence as usize) {
                        player.set_position(clock);
                    }
                }
                Command::SetTempo(tempo) => {
                    if tempo > 0.0 {
                        self.tempo = tempo;
                        self.frames_per_clock = frames_per_clock(tempo, self.sample_rate);
                    }
                }
                Command::SetSongPosition(clock) => self.set_song_position(snap, clock),
                Command::StartSong { fast } => self.start_song(snap, fast),
                Command::StopSong => {
                    self.pause_song();
                    self.set_song_position(snap, 0);
                }
                Command::PauseSong => self.pause_song(),
                Command::StopAll => {
                    self.pause_song();
                    self.set_song_position(snap, 0);
                    self.flush_pending_notes();
                }
                Command::Midi(timed) => {
                    self.schedule
                        .insert(self.frame + timed.delay_frames, timed.message);
                }
            }
        }
    }

    fn apply_play_state(&mut self, snap: &ModelSnapshot, sequence: u32, state: PlayState) {
        let Some(player) = self.players.get_mut(sequence as usize) else {
            return;
        };
        player.request_state(state, self.rolling);
        let state = player.state();
        self.after_state_change(snap, sequence, state);
    }

    /// Group choke and transport auto-start after a sequence was asked to
    /// start.
    fn after_state_change(&mut self, snap: &ModelSnapshot, sequence: u32, state: PlayState) {
        if state != PlayState::Starting && state != PlayState::Playing {
            return;
        }
        if let Some(idx) = snap.sequence_index(sequence) {
            let group = snap.sequences[idx].group;
            if group != 0 {
                for other in &snap.sequences {
                    if other.id != sequence && other.group == group {
                        let player = &mut self.players[other.id as usize];
                        if player.state().is_active() {
                            player.request_state(PlayState::Stopping, self.rolling);
                        }
                    }
                }
            }
        }
        if !self.rolling {
            self.start_transport_at_bar(snap);
        }
    }

    // -- MIDI input dispatch -----------------------------------------------

    fn drain_midi_input(&mut self, snap: &ModelSnapshot) {
        while let Some(message) = self.midi_in.try_pop() {
            match message.status {
                status::START => {
                    self.pause_song();
                    self.set_song_position(snap, 0);
                    self.start_song(snap, false);
                }
                status::CONTINUE => self.start_song(snap, false),
                status::STOP => self.pause_song(),
                status::SONG_POSITION => {
                    self.set_song_position(snap, message.song_position_clocks());
                }
                status::SONG_SELECT => {
                    let _ = self
                        .notifications
                        .try_push(Notification::SongSelect(message.value1 as u32 + 1));
                }
                _ => {}
            }
            if message.command() == status::NOTE_ON && message.value2 > 0 {
                if message.channel() == snap.trigger_channel {
                    self.handle_trigger(snap, message.value1);
                }
                if snap.song == EDITOR_SONG && Some(message.channel()) == snap.input_channel {
                    self.handle_editor_note(snap, message.value1, message.value2);
                }
            }
        }
    }

    fn handle_trigger(&mut self, snap: &ModelSnapshot, note: u8) {
        let Some(seq) = snap.trigger_target(note) else {
            return;
        };
        let id = seq.id;
        let state = self.players[id as usize].toggle(self.rolling);
        self.after_state_change(snap, id, state);
    }

    /// Note-on on the input channel programs the editor pattern: the toggle
    /// itself is a model edit, so it is forwarded to the control thread; the
    /// step advance while stopped happens here.
    fn handle_editor_note(&mut self, snap: &ModelSnapshot, note: u8, velocity: u8) {
        let Some(idx) = snap.editor_sequence else {
            return;
        };
        let seq = &snap.sequences[idx];
        let player = &mut self.players[seq.id as usize];
        let step = player.step();
        let _ = self.notifications.try_push(Notification::ToggleStep {
            step,
            note,
            velocity,
        });
        if !self.rolling {
            if let Some((_, pattern)) = seq.placements.first() {
                let steps = pattern.steps().max(1);
                player.set_step((step + 1) % steps);
            }
        }
    }

    // -- transport ---------------------------------------------------------

    fn apply_transport_requests(&mut self) {
        if self.transport.take_stop() {
            self.stop_transport();
        }
        if self.transport.take_start() && !self.rolling {
            self.rolling = true;
            self.transport.set_rolling(true);
            // fire the next pulse at the cycle start
            self.frames_to_next_clock = 0.0;
        }
        if let Some(frame) = self.transport.take_relocate() {
            self.reposition = Some(frame);
        }
    }

    fn stop_transport(&mut self) {
        self.flush_pending_notes();
        self.rolling = false;
        self.transport.set_rolling(false);
    }

    /// Drops every pending message and closes the channels that still had
    /// note-offs outstanding.
    fn flush_pending_notes(&mut self) {
        let mask = self.schedule.pending_note_off_channels();
        self.schedule.clear();
        for channel in 0..16u8 {
            if mask & (1 << channel) != 0 {
                self.schedule
                    .insert(self.frame, MidiMessage::all_notes_off(channel));
            }
        }
    }

    /// Rolls the transport from the top of the current bar so the first
    /// pulse is a sync pulse.
    fn start_transport_at_bar(&mut self, snap: &ModelSnapshot) {
        self.beat = 1;
        self.clock_in_beat = 0;
        self.frames_to_next_clock = 0.0;
        self.song_frame = frame_of_bbt(
            self.bar,
            1,
            0,
            &snap.timebase,
            snap.default_tempo as f64,
            snap.default_time_sig,
            self.sample_rate,
        );
        self.song_position = clock_of_bbt(self.bar, 1, 0, &snap.timebase, snap.default_time_sig);
        self.rolling = true;
        self.transport.set_rolling(true);
    }

    // -- song layer ---------------------------------------------------------

    fn start_song(&mut self, snap: &ModelSnapshot, fast: bool) {
        let state = if fast {
            PlayState::Playing
        } else {
            PlayState::Starting
        };
        self.song_status = state;
        for seq in &snap.sequences {
            self.players[seq.id as usize].request_state(state, self.rolling);
        }
        if !self.rolling {
            self.start_transport_at_bar(snap);
        }
    }

    fn pause_song(&mut self) {
        self.song_status = PlayState::Stopped;
        for player in &mut self.players {
            player.stop_now();
        }
        self.flush_pending_notes();
    }

    // -- position ----------------------------------------------------------

    /// Re-derives BBT, tempo, time signature, the timebase cursor and every
    /// play head from a song frame.
    fn recompute_from_frame(&mut self, snap: &ModelSnapshot, frame: u64) {
        let pos = position_from_frame(
            frame,
            &snap.timebase,
            snap.default_tempo as f64,
            snap.default_time_sig,
            self.sample_rate,
        );
        self.song_frame = frame;
        self.bar = pos.bar;
        self.beat = pos.beat;
        self.tempo = pos.tempo;
        self.time_sig = pos.time_sig;
        self.bar_start_tick = pos.bar_start_tick;
        self.clock_in_beat = (pos.tick as f64 / TICKS_PER_CLOCK) as u32;
        self.frames_per_clock = frames_per_clock(self.tempo, self.sample_rate);
        let tick_in_clock = pos.tick as f64 % TICKS_PER_CLOCK;
        self.frames_to_next_clock = if tick_in_clock == 0.0 {
            0.0
        } else {
            self.frames_per_clock
                - tick_in_clock * transport::frames_per_tick(self.tempo, self.sample_rate)
        };
        self.song_position = clock_of_bbt(
            self.bar,
            self.beat,
            self.clock_in_beat,
            &snap.timebase,
            snap.default_time_sig,
        );
        self.rearm_timebase_cursor(snap);
        self.locate_players(snap);
    }

    /// Repositions the song to a clock count (song position pointer).
    fn set_song_position(&mut self, snap: &ModelSnapshot, clock: u32) {
        let (bar, beat, clock_in_beat) = bbt_of_clock(clock, &snap.timebase, snap.default_time_sig);
        self.bar = bar;
        self.beat = beat;
        self.clock_in_beat = clock_in_beat;
        self.song_position = clock;
        self.song_frame = frame_of_bbt(
            bar,
            beat,
            (clock_in_beat as f64 * TICKS_PER_CLOCK) as u32,
            &snap.timebase,
            snap.default_tempo as f64,
            snap.default_time_sig,
            self.sample_rate,
        );
        self.frames_to_next_clock = 0.0;
        let pos_tempo = snap
            .timebase
            .tempo_at(bar as u16, self.clock_in_bar())
            .map(|t| t as f64)
            .unwrap_or(snap.default_tempo as f64);
        self.tempo = pos_tempo;
        self.time_sig = snap
            .timebase
            .timesig_at(bar as u16, self.clock_in_bar())
            .unwrap_or(snap.default_time_sig);
        self.frames_per_clock = frames_per_clock(self.tempo, self.sample_rate);
        self.rearm_timebase_cursor(snap);
        self.locate_players(snap);
    }

    fn clock_in_bar(&self) -> u32 {
        (self.beat - 1) * CLOCKS_PER_BEAT + self.clock_in_beat
    }

    fn rearm_timebase_cursor(&mut self, snap: &ModelSnapshot) {
        let key = (self.bar as u16, self.clock_in_bar());
        self.next_timebase_idx = snap
            .timebase
            .events()
            .partition_point(|ev| (ev.bar, ev.clock) <= key);
    }

    fn locate_players(&mut self, snap: &ModelSnapshot) {
        for seq in &snap.sequences {
            self.players[seq.id as usize].locate(self.song_position, seq);
        }
    }

    /// Applies timebase events that the play position has reached.
    fn consume_due_timebase_events(&mut self, snap: &ModelSnapshot) {
        let key = (self.bar as u16, self.clock_in_bar());
        while let Some(ev) = snap.timebase.events().get(self.next_timebase_idx) {
            if (ev.bar, ev.clock) > key {
                break;
            }
            match ev.kind {
                crate::sequencer::timebase::TimebaseKind::Tempo => {
                    self.tempo = ev.value as f64;
                    self.frames_per_clock = frames_per_clock(self.tempo, self.sample_rate);
                }
                crate::sequencer::timebase::TimebaseKind::TimeSig => {
                    self.time_sig = TimeSig::unpack(ev.value);
                    if self.beat > self.time_sig.beats_per_bar as u32 {
                        self.beat = 1;
                    }
                }
            }
            self.next_timebase_idx += 1;
        }
    }

    // -- the clock walk ----------------------------------------------------

    fn walk_clock_pulses(&mut self, snap: &ModelSnapshot, frames: u32) {
        let mut remaining = frames as f64;
        let mut last_sync = false;
        let mut any_active = false;

        while self.frames_to_next_clock < remaining {
            // Events anchored at this pulse's position shape every interval
            // from this pulse onward
            self.consume_due_timebase_events(snap);
            let offset = frames as f64 - remaining + self.frames_to_next_clock;
            let pulse_frame = self.frame + offset as u64;
            let sync = self.clock_in_beat == 0 && self.beat == 1;
            last_sync = sync;

            if sync && self.song_status == PlayState::Starting {
                self.song_status = PlayState::Playing;
            }

            any_active = false;
            for seq in &snap.sequences {
                let active = self.players[seq.id as usize].clock_tick(
                    seq,
                    sync,
                    pulse_frame,
                    self.frames_per_clock,
                    &mut self.schedule,
                );
                any_active = any_active || active;
            }

            if self.song_status == PlayState::Playing {
                self.song_position += 1;
                if snap.song_length > 0 && self.song_position > snap.song_length {
                    self.song_status = PlayState::Stopped;
                }
            }

            remaining -= self.frames_to_next_clock;
            self.clock_in_beat += 1;
            if self.clock_in_beat >= CLOCKS_PER_BEAT {
                self.clock_in_beat = 0;
                self.beat += 1;
                if self.beat > self.time_sig.beats_per_bar as u32 {
                    self.beat = 1;
                    self.bar += 1;
                    self.bar_start_tick +=
                        crate::sequencer::timebase::TICKS_PER_BEAT * self.time_sig.beats_per_bar as f64;
                }
            }
            self.frames_to_next_clock = self.frames_per_clock;
        }
        self.frames_to_next_clock -= remaining;

        if last_sync && !any_active && self.song_status != PlayState::Playing {
            self.stop_transport();
            self.reposition = Some(0);
            let _ = self.notifications.try_push(Notification::TransportStopped);
        }
    }

    // -- reporting ---------------------------------------------------------

    fn report_overflow(&mut self) {
        let dropped = self.schedule.take_dropped();
        if dropped > 0 {
            let _ = self
                .notifications
                .try_push(Notification::ScheduleOverflow(dropped));
        }
    }

    fn publish_view(&mut self) {
        let mut view = EngineView {
            frame: self.song_frame,
            rolling: self.rolling,
            bar: self.bar,
            beat: self.beat,
            tick: self.current_tick(),
            bar_start_tick: self.bar_start_tick,
            tempo: self.tempo,
            time_sig: self.time_sig,
            song_position: self.song_position,
            song_status: self.song_status,
            ..EngineView::default()
        };
        for (idx, player) in self.players.iter().enumerate() {
            view.play_states[idx] = player.state();
            view.positions[idx] = player.position();
            view.steps[idx] = player.step();
        }
        self.transport.publish_frame(self.song_frame);
        self.view_tx.write(view);
    }

    /// Tick within the current beat, interpolated from the clock phase.
    fn current_tick(&self) -> u32 {
        let through = if self.frames_per_clock > 0.0 {
            (1.0 - self.frames_to_next_clock / self.frames_per_clock).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let tick = self.clock_in_beat as f64 * TICKS_PER_CLOCK + through * TICKS_PER_CLOCK;
        (tick as u32).min(crate::sequencer::timebase::TICKS_PER_BEAT as u32 - 1)
    }
}
