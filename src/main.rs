use stepseq::{AudioDriver, MidiInputPort, MidiPortSink, PlayState};

const CLIENT_NAME: &str = "stepseq";

fn main() {
    env_logger::init();

    let (mut controller, engine, midi_tx) = stepseq::create_engine(48_000.0);

    // Seed a small demo loop on song 1
    controller.select_pattern(1);
    controller.add_note(0, 36, 110, 1.0);
    controller.add_note(4, 38, 90, 1.0);
    controller.add_note(8, 36, 110, 1.0);
    controller.add_note(12, 38, 90, 2.0);
    let track = controller.add_track(1).expect("sequence handles available");
    controller.add_pattern(track, 0, 1, false);
    controller.select_song(1);
    controller.set_trigger_note(track, 36);

    let sink = match MidiPortSink::connect(CLIENT_NAME) {
        Ok(sink) => sink,
        Err(err) => {
            log::error!("cannot open MIDI output: {err}");
            std::process::exit(1);
        }
    };
    let _midi_in = match MidiInputPort::connect(CLIENT_NAME, midi_tx) {
        Ok(port) => port,
        Err(err) => {
            log::error!("cannot open MIDI input: {err}");
            std::process::exit(1);
        }
    };
    let _driver = match AudioDriver::start(engine, Box::new(sink)) {
        Ok(driver) => driver,
        Err(err) => {
            log::error!("cannot start audio driver: {err}");
            std::process::exit(1);
        }
    };

    controller.set_play_state(track, PlayState::Starting);
    println!("playing; press enter for position, q + enter to quit");

    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        line.clear();
        if stdin.read_line(&mut line).is_err() || line.trim() == "q" {
            break;
        }
        controller.process_notifications();
        let (bar, beat, tick) = controller.bbt();
        println!("position {bar}:{beat:02}:{tick:04}");
    }

    controller.transport_stop();
}
