use anyhow::{Result, anyhow, bail};
use crossbeam::channel;
use looppedal::audio::stream::enumerate_device_names;
use looppedal::audio::{
    AudioEvent, AudioStream, MixEngine, RecordingSession, SessionEvent, default_click, load_click,
};
use looppedal::config::{LoggingSettings, Settings};
use looppedal::ui::TerminalUI;
use std::path::PathBuf;
use std::sync::Arc;

fn print_help() {
    println!("Looppedal - Terminal loop pedal");
    println!();
    println!("USAGE:");
    println!("    looppedal [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help            Print this help message");
    println!("    --debug               Enable debug logging");
    println!("    --config <PATH>       Load settings from a TOML file");
    println!("    --input <NAME>        Use the named input device");
    println!("    --output <NAME>       Use the named output device");
    println!("    --list-devices        List audio devices and exit");
    println!();
    println!("DESCRIPTION:");
    println!("    Record a take, then mix it into a single looping track that plays");
    println!("    continuously. Takes of different lengths are tiled so the loop");
    println!("    stays seamless. An optional metronome click can be overlaid.");
    println!();
    println!("CONTROLS:");
    println!("    R      Start recording a take");
    println!("    S      Stop and discard the take");
    println!("    M      Stop and mix the take into the loop");
    println!("    X      Clear the loop");
    println!("    T      Set BPM");
    println!("    N      Toggle metronome");
    println!("    G      Toggle beat sync");
    println!("    H      Toggle half clip");
    println!("    E      Export mix as WAV");
    println!("    Q      Quit");
}

#[derive(Debug, Default)]
struct Args {
    help: bool,
    debug: bool,
    list_devices: bool,
    config: Option<PathBuf>,
    input_device: Option<String>,
    output_device: Option<String>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => parsed.help = true,
            "--debug" => parsed.debug = true,
            "--list-devices" => parsed.list_devices = true,
            "--config" => {
                let path = args.next().ok_or_else(|| anyhow!("--config needs a path"))?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--input" => {
                parsed.input_device = Some(
                    args.next()
                        .ok_or_else(|| anyhow!("--input needs a device name"))?,
                );
            }
            "--output" => {
                parsed.output_device = Some(
                    args.next()
                        .ok_or_else(|| anyhow!("--output needs a device name"))?,
                );
            }
            other => bail!("unknown argument '{}' (try --help)", other),
        }
    }

    Ok(parsed)
}

fn init_logging(settings: &LoggingSettings, debug: bool) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&settings.file)?;

    let mut builder = env_logger::Builder::new();
    builder.parse_filters(&settings.level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    if debug {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder
        .format_timestamp_millis()
        .target(env_logger::Target::Pipe(Box::new(file)))
        .try_init()?;
    Ok(())
}

fn main() -> Result<()> {
    let args = parse_args(std::env::args().skip(1))?;

    if args.help {
        print_help();
        return Ok(());
    }

    if args.list_devices {
        let (inputs, outputs) = enumerate_device_names()?;
        println!("Available input devices:");
        for (i, name) in inputs.iter().enumerate() {
            println!("  {}: {}", i, name);
        }
        println!("\nAvailable output devices:");
        for (i, name) in outputs.iter().enumerate() {
            println!("  {}: {}", i, name);
        }
        return Ok(());
    }

    let settings = Settings::load_or_default(args.config.as_deref())?;
    init_logging(&settings.logging, args.debug)?;

    if args.debug {
        println!(
            "Starting Looppedal in DEBUG mode (logging to {})...",
            settings.logging.file.display()
        );
    } else {
        println!("Starting Looppedal...");
    }

    let config = settings.audio.clone();
    log::info!(
        "audio config: {}Hz, {} frame buffers, {}s session",
        config.sample_rate,
        config.buffer_size,
        config.session_seconds
    );

    let click = match &settings.metronome.click_path {
        Some(path) => load_click(path, config.sample_rate)?,
        None => default_click(config.sample_rate),
    };

    let engine = Arc::new(MixEngine::new(config.clone()));
    let audio_stream = AudioStream::new(
        &config,
        args.input_device.as_deref(),
        args.output_device.as_deref(),
    )?;

    let (event_sender, event_receiver) = channel::unbounded::<AudioEvent>();
    let (capture_stream, _output_stream) =
        audio_stream.start(Arc::clone(&engine), event_sender)?;

    let mut session = RecordingSession::new(engine, capture_stream, click);
    if let Some(bpm) = settings.metronome.bpm {
        session.handle(SessionEvent::SetTempo(Some(bpm)))?;
    }
    if settings.mixing.beat_sync {
        session.handle(SessionEvent::SetBeatSync(true))?;
    }
    if settings.mixing.clip_half {
        session.handle(SessionEvent::SetClipHalf(true))?;
    }

    let mut ui = TerminalUI::new(
        session,
        event_receiver,
        audio_stream.get_input_device_name(),
        audio_stream.get_output_device_name(),
    )
    .map_err(|e| anyhow!("UI creation failed: {}", e))?;
    ui.run().map_err(|e| anyhow!("UI run failed: {}", e))?;
    drop(ui);

    println!("Looppedal stopped.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_flags() {
        let parsed = args(&["--debug", "--config", "pedal.toml", "--input", "USB Mic"]).unwrap();
        assert!(parsed.debug);
        assert!(!parsed.help);
        assert_eq!(parsed.config, Some(PathBuf::from("pedal.toml")));
        assert_eq!(parsed.input_device.as_deref(), Some("USB Mic"));
        assert_eq!(parsed.output_device, None);
    }

    #[test]
    fn test_parse_rejects_unknown_and_missing_values() {
        assert!(args(&["--loud"]).is_err());
        assert!(args(&["--config"]).is_err());
        assert!(args(&["-h"]).unwrap().help);
    }
}
