// Thread-boundary message types and channel constructors

pub mod channels;
pub mod command;
pub mod notification;

pub use channels::{
    create_command_channel, create_midi_in_channel, create_notification_channel,
};
pub use command::{Command, TimedMessage};
pub use notification::Notification;
