// Realtime-to-control notifications

use crate::sequencer::SongId;

/// Events the realtime thread reports back to the control side. The control
/// thread drains these between cycles; model edits requested from the
/// realtime path (step toggling from MIDI input) are applied there.
#[derive(Debug, Clone, Copy)]
pub enum Notification {
    /// Note-on received on the input channel while the editor song is
    /// selected: toggle the note at this step of the editor pattern.
    ToggleStep { step: u32, note: u8, velocity: u8 },
    /// MIDI song select received.
    SongSelect(SongId),
    /// Transport stopped itself because nothing was left playing.
    TransportStopped,
    /// Messages dropped because the schedule was full since the last report.
    ScheduleOverflow(u32),
}
