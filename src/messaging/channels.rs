// Lock-free channels between the control threads and the engine

use crate::messaging::command::Command;
use crate::messaging::notification::Notification;
use crate::midi::event::MidiMessage;
use ringbuf::{traits::Split, HeapRb};

pub type CommandProducer = ringbuf::HeapProd<Command>;
pub type CommandConsumer = ringbuf::HeapCons<Command>;

pub fn create_command_channel(capacity: usize) -> (CommandProducer, CommandConsumer) {
    let rb = HeapRb::<Command>::new(capacity);
    rb.split()
}

pub type MidiInProducer = ringbuf::HeapProd<MidiMessage>;
pub type MidiInConsumer = ringbuf::HeapCons<MidiMessage>;

pub fn create_midi_in_channel(capacity: usize) -> (MidiInProducer, MidiInConsumer) {
    let rb = HeapRb::<MidiMessage>::new(capacity);
    rb.split()
}

pub type NotificationProducer = ringbuf::HeapProd<Notification>;
pub type NotificationConsumer = ringbuf::HeapCons<Notification>;

pub fn create_notification_channel(
    capacity: usize,
) -> (NotificationProducer, NotificationConsumer) {
    let rb = HeapRb::<Notification>::new(capacity);
    rb.split()
}
