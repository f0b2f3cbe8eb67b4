// Transport state and bar/beat/tick arithmetic under a timebase map

use crate::sequencer::timebase::{
    TimeSig, TimebaseKind, TimebaseMap, CLOCKS_PER_BEAT, TICKS_PER_BEAT, TICKS_PER_CLOCK,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Rolling,
}

impl TransportState {
    pub fn is_rolling(&self) -> bool {
        matches!(self, TransportState::Rolling)
    }
}

/// Transport flags shared between control threads and the engine.
///
/// Control threads request transitions; the engine is the only writer of the
/// actual rolling state and consumes requests at the top of each cycle.
#[derive(Debug, Default)]
pub struct SharedTransport {
    rolling: AtomicBool,
    start_requested: AtomicBool,
    stop_requested: AtomicBool,
    relocate_requested: AtomicBool,
    relocate_frame: AtomicU64,
    frame: AtomicU64,
}

impl SharedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // control side

    pub fn start(&self) {
        self.start_requested.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn toggle(&self) {
        if self.rolling.load(Ordering::Acquire) {
            self.stop();
        } else {
            self.start();
        }
    }

    pub fn locate(&self, frame: u64) {
        self.relocate_frame.store(frame, Ordering::Release);
        self.relocate_requested.store(true, Ordering::Release);
    }

    pub fn query(&self) -> TransportState {
        if self.rolling.load(Ordering::Acquire) {
            TransportState::Rolling
        } else {
            TransportState::Stopped
        }
    }

    /// Song-position frame last published by the engine.
    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    // engine side

    pub fn take_start(&self) -> bool {
        self.start_requested.swap(false, Ordering::AcqRel)
    }

    pub fn take_stop(&self) -> bool {
        self.stop_requested.swap(false, Ordering::AcqRel)
    }

    pub fn take_relocate(&self) -> Option<u64> {
        if self.relocate_requested.swap(false, Ordering::AcqRel) {
            Some(self.relocate_frame.load(Ordering::Acquire))
        } else {
            None
        }
    }

    pub fn set_rolling(&self, rolling: bool) {
        self.rolling.store(rolling, Ordering::Release);
    }

    pub fn publish_frame(&self, frame: u64) {
        self.frame.store(frame, Ordering::Release);
    }
}

/// A transport position: song frame plus the BBT fields in effect there.
/// Bars and beats are 1-based, ticks 0-based within the beat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub frame: u64,
    pub bar: u32,
    pub beat: u32,
    pub tick: u32,
    pub bar_start_tick: f64,
    pub time_sig: TimeSig,
    pub tempo: f64,
}

impl Position {
    pub fn zero(tempo: f64, time_sig: TimeSig) -> Self {
        Self {
            frame: 0,
            bar: 1,
            beat: 1,
            tick: 0,
            bar_start_tick: 0.0,
            time_sig,
            tempo,
        }
    }
}

pub fn frames_per_tick(tempo: f64, sample_rate: f64) -> f64 {
    60.0 * sample_rate / (tempo * TICKS_PER_BEAT)
}

pub fn frames_per_clock(tempo: f64, sample_rate: f64) -> f64 {
    60.0 * sample_rate / (tempo * CLOCKS_PER_BEAT as f64)
}

/// Applies one timebase event to the running (tempo, time_sig) pair.
fn apply_event(ev: &crate::sequencer::timebase::TimebaseEvent, tempo: &mut f64, sig: &mut TimeSig) {
    match ev.kind {
        TimebaseKind::Tempo => *tempo = ev.value as f64,
        TimebaseKind::TimeSig => *sig = TimeSig::unpack(ev.value),
    }
}

/// Computes BBT for a song frame by walking the timebase map section by
/// section, each section delimited by a tempo or time-signature change.
pub fn position_from_frame(
    frame: u64,
    map: &TimebaseMap,
    default_tempo: f64,
    default_sig: TimeSig,
    sample_rate: f64,
) -> Position {
    let mut tempo = default_tempo;
    let mut sig = default_sig;
    let mut frames = 0.0; // frames from song start to the anchor
    let mut ticks = 0.0; // ticks from song start to the anchor
    let mut anchor_bar = 1u32;
    let mut anchor_tick_in_bar = 0.0;

    for ev in map.events() {
        let ticks_per_bar = TICKS_PER_BEAT * sig.beats_per_bar as f64;
        let delta_ticks = (ev.bar as f64 - anchor_bar as f64) * ticks_per_bar
            + ev.clock as f64 * TICKS_PER_CLOCK
            - anchor_tick_in_bar;
        let ev_frames = frames + delta_ticks * frames_per_tick(tempo, sample_rate);
        if ev_frames > frame as f64 {
            break;
        }
        frames = ev_frames;
        ticks += delta_ticks;
        anchor_bar = ev.bar as u32;
        anchor_tick_in_bar = ev.clock as f64 * TICKS_PER_CLOCK;
        apply_event(ev, &mut tempo, &mut sig);
    }

    let ticks_per_bar = TICKS_PER_BEAT * sig.beats_per_bar as f64;
    let remaining_ticks = (frame as f64 - frames) / frames_per_tick(tempo, sample_rate);
    let tick_from_anchor_bar = anchor_tick_in_bar + remaining_ticks;
    let bars_forward = (tick_from_anchor_bar / ticks_per_bar) as u32;
    let tick_in_bar = tick_from_anchor_bar - bars_forward as f64 * ticks_per_bar;
    let beat = (tick_in_bar / TICKS_PER_BEAT) as u32 + 1;
    let tick = (tick_in_bar - (beat - 1) as f64 * TICKS_PER_BEAT) as u32;
    let bar_start_tick = (ticks - anchor_tick_in_bar) + bars_forward as f64 * ticks_per_bar;

    Position {
        frame,
        bar: anchor_bar + bars_forward,
        beat: beat.min(sig.beats_per_bar as u32),
        tick: (tick as f64).min(TICKS_PER_BEAT - 1.0) as u32,
        bar_start_tick,
        time_sig: sig,
        tempo,
    }
}

/// Computes the song frame of a BBT position, the inverse of
/// `position_from_frame` over the same sectioned walk.
pub fn frame_of_bbt(
    bar: u32,
    beat: u32,
    tick: u32,
    map: &TimebaseMap,
    default_tempo: f64,
    default_sig: TimeSig,
    sample_rate: f64,
) -> u64 {
    let bar = bar.max(1);
    let beat = beat.max(1);
    let target_tick_in_bar = (beat - 1) as f64 * TICKS_PER_BEAT + tick as f64;
    let target_clock = (target_tick_in_bar / TICKS_PER_CLOCK) as u32;

    let mut tempo = default_tempo;
    let mut sig = default_sig;
    let mut frames = 0.0;
    let mut anchor_bar = 1u32;
    let mut anchor_tick_in_bar = 0.0;

    for ev in map.events() {
        if (ev.bar as u32, ev.clock) > (bar, target_clock) {
            break;
        }
        let ticks_per_bar = TICKS_PER_BEAT * sig.beats_per_bar as f64;
        let delta_ticks = (ev.bar as f64 - anchor_bar as f64) * ticks_per_bar
            + ev.clock as f64 * TICKS_PER_CLOCK
            - anchor_tick_in_bar;
        frames += delta_ticks * frames_per_tick(tempo, sample_rate);
        anchor_bar = ev.bar as u32;
        anchor_tick_in_bar = ev.clock as f64 * TICKS_PER_CLOCK;
        apply_event(ev, &mut tempo, &mut sig);
    }

    let ticks_per_bar = TICKS_PER_BEAT * sig.beats_per_bar as f64;
    let delta_ticks = (bar as f64 - anchor_bar as f64) * ticks_per_bar + target_tick_in_bar
        - anchor_tick_in_bar;
    frames += delta_ticks * frames_per_tick(tempo, sample_rate);
    frames.max(0.0).round() as u64
}

/// Converts a song position in clocks to (bar, beat, clock-in-beat) under
/// the map's time-signature changes.
pub fn bbt_of_clock(
    clock: u32,
    map: &TimebaseMap,
    default_sig: TimeSig,
) -> (u32, u32, u32) {
    let mut sig = default_sig;
    let mut anchor_bar = 1u32;
    let mut anchor_clock = 0u64;

    for ev in map.events() {
        if ev.kind != TimebaseKind::TimeSig {
            continue;
        }
        let clocks_per_bar = sig.beats_per_bar as u64 * CLOCKS_PER_BEAT as u64;
        let ev_clock = anchor_clock + (ev.bar as u64 - anchor_bar as u64) * clocks_per_bar;
        if ev_clock > clock as u64 {
            break;
        }
        anchor_clock = ev_clock;
        anchor_bar = ev.bar as u32;
        sig = TimeSig::unpack(ev.value);
    }

    let clocks_per_bar = sig.beats_per_bar as u32 * CLOCKS_PER_BEAT;
    let from_anchor = clock - anchor_clock as u32;
    let bar = anchor_bar + from_anchor / clocks_per_bar;
    let in_bar = from_anchor % clocks_per_bar;
    let beat = in_bar / CLOCKS_PER_BEAT + 1;
    let clock_in_beat = in_bar % CLOCKS_PER_BEAT;
    (bar, beat, clock_in_beat)
}

/// Inverse of `bbt_of_clock`: song clock count of a (bar, beat,
/// clock-in-beat) position under the map's time-signature changes.
pub fn clock_of_bbt(bar: u32, beat: u32, clock_in_beat: u32, map: &TimebaseMap, default_sig: TimeSig) -> u32 {
    let mut sig = default_sig;
    let mut anchor_bar = 1u32;
    let mut anchor_clock = 0u64;

    for ev in map.events() {
        if ev.kind != TimebaseKind::TimeSig || ev.bar as u32 > bar {
            continue;
        }
        let clocks_per_bar = sig.beats_per_bar as u64 * CLOCKS_PER_BEAT as u64;
        anchor_clock += (ev.bar as u64 - anchor_bar as u64) * clocks_per_bar;
        anchor_bar = ev.bar as u32;
        sig = TimeSig::unpack(ev.value);
    }

    let clocks_per_bar = sig.beats_per_bar as u64 * CLOCKS_PER_BEAT as u64;
    let clock = anchor_clock
        + (bar.max(1) as u64 - anchor_bar as u64) * clocks_per_bar
        + (beat.max(1) as u64 - 1) * CLOCKS_PER_BEAT as u64
        + clock_in_beat as u64;
    clock as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::timebase::TimebaseKind;

    const SR: f64 = 48000.0;

    #[test]
    fn test_frames_per_clock() {
        assert_eq!(frames_per_clock(120.0, SR), 1000.0);
        assert_eq!(frames_per_clock(60.0, SR), 2000.0);
        assert!((frames_per_tick(120.0, SR) - 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_transport_requests() {
        let transport = SharedTransport::new();
        assert_eq!(transport.query(), TransportState::Stopped);
        transport.start();
        assert!(transport.take_start());
        assert!(!transport.take_start());
        transport.set_rolling(true);
        assert_eq!(transport.query(), TransportState::Rolling);
        transport.toggle();
        assert!(transport.take_stop());
        transport.locate(1234);
        assert_eq!(transport.take_relocate(), Some(1234));
        assert_eq!(transport.take_relocate(), None);
    }

    #[test]
    fn test_position_from_frame_no_map() {
        let map = TimebaseMap::new();
        let sig = TimeSig::default();
        // 120 BPM, 4/4: one beat = 24000 frames, one bar = 96000
        let pos = position_from_frame(0, &map, 120.0, sig, SR);
        assert_eq!((pos.bar, pos.beat, pos.tick), (1, 1, 0));
        let pos = position_from_frame(24000, &map, 120.0, sig, SR);
        assert_eq!((pos.bar, pos.beat, pos.tick), (1, 2, 0));
        let pos = position_from_frame(96000, &map, 120.0, sig, SR);
        assert_eq!((pos.bar, pos.beat, pos.tick), (2, 1, 0));
        assert_eq!(pos.bar_start_tick, 4.0 * TICKS_PER_BEAT);
    }

    #[test]
    fn test_position_from_frame_with_tempo_change() {
        let mut map = TimebaseMap::new();
        // bar 2 slows to 60 BPM: bar 1 spans 96000 frames, bars from 2 span 192000
        map.insert(2, 0, TimebaseKind::Tempo, 60);
        let sig = TimeSig::default();
        let pos = position_from_frame(96000, &map, 120.0, sig, SR);
        assert_eq!((pos.bar, pos.beat), (2, 1));
        assert_eq!(pos.tempo, 60.0);
        let pos = position_from_frame(96000 + 48000, &map, 120.0, sig, SR);
        assert_eq!((pos.bar, pos.beat), (2, 2));
        let pos = position_from_frame(96000 + 192000, &map, 120.0, sig, SR);
        assert_eq!((pos.bar, pos.beat), (3, 1));
    }

    #[test]
    fn test_position_from_frame_with_timesig_change() {
        let mut map = TimebaseMap::new();
        map.insert(3, 0, TimebaseKind::TimeSig, TimeSig::new(3, 4).pack());
        let sig = TimeSig::default();
        // bars 1-2 are 4/4 (96000 each), bar 3 onward 3/4 (72000 each)
        let pos = position_from_frame(192000, &map, 120.0, sig, SR);
        assert_eq!((pos.bar, pos.beat), (3, 1));
        assert_eq!(pos.time_sig.beats_per_bar, 3);
        let pos = position_from_frame(192000 + 72000, &map, 120.0, sig, SR);
        assert_eq!((pos.bar, pos.beat), (4, 1));
    }

    #[test]
    fn test_frame_of_bbt_round_trip() {
        let mut map = TimebaseMap::new();
        map.insert(2, 0, TimebaseKind::Tempo, 60);
        map.insert(3, 0, TimebaseKind::TimeSig, TimeSig::new(3, 4).pack());
        let sig = TimeSig::default();
        for (bar, beat, tick) in [(1, 1, 0), (1, 3, 960), (2, 1, 0), (3, 2, 480), (5, 1, 0)] {
            let frame = frame_of_bbt(bar, beat, tick, &map, 120.0, sig, SR);
            let pos = position_from_frame(frame, &map, 120.0, sig, SR);
            assert_eq!((pos.bar, pos.beat, pos.tick), (bar, beat, tick));
        }
    }

    #[test]
    fn test_bbt_of_clock() {
        let map = TimebaseMap::new();
        let sig = TimeSig::default();
        assert_eq!(bbt_of_clock(0, &map, sig), (1, 1, 0));
        assert_eq!(bbt_of_clock(24, &map, sig), (1, 2, 0));
        assert_eq!(bbt_of_clock(96, &map, sig), (2, 1, 0));
        assert_eq!(bbt_of_clock(100, &map, sig), (2, 1, 4));

        let mut map = TimebaseMap::new();
        map.insert(2, 0, TimebaseKind::TimeSig, TimeSig::new(3, 4).pack());
        // bar 1 is 96 clocks, bars from 2 are 72
        assert_eq!(bbt_of_clock(96, &map, sig), (2, 1, 0));
        assert_eq!(bbt_of_clock(96 + 72, &map, sig), (3, 1, 0));
    }
}
