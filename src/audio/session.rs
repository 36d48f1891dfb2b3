use std::path::PathBuf;
use std::sync::Arc;

use super::error::{LooperError, Result};
use super::io::export_wav;
use super::metronome::{Metronome, validate_bpm};
use super::mix_engine::MixEngine;

/// Starts and stops the hardware capture stream.
pub trait CaptureControl {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    ReadyToRecord,
    Recording,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SetTempo(Option<u32>),
    SetMetronome(bool),
    SetBeatSync(bool),
    SetClipHalf(bool),
    StartRecord,
    Stop,
    Mix,
    Reset,
    Export(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Applied,
    /// The event made no sense in the current state; nothing changed.
    Ignored(&'static str),
}

/// Sequences engine operations in response to control events.
pub struct RecordingSession<C: CaptureControl> {
    engine: Arc<MixEngine>,
    capture: C,
    state: SessionState,
    tempo: Option<u32>,
    metronome_on: bool,
    beat_sync: bool,
    click: Vec<i16>,
}

impl<C: CaptureControl> RecordingSession<C> {
    pub fn new(engine: Arc<MixEngine>, capture: C, click: Vec<i16>) -> Self {
        Self {
            engine,
            capture,
            state: SessionState::ReadyToRecord,
            tempo: None,
            metronome_on: false,
            beat_sync: false,
            click,
        }
    }

    pub fn handle(&mut self, event: SessionEvent) -> Result<EventOutcome> {
        if let SessionEvent::Export(path) = event {
            let samples = self.engine.mixed_samples();
            export_wav(path, &samples, self.engine.config().sample_rate)?;
            return Ok(EventOutcome::Applied);
        }

        let outcome = match self.state {
            SessionState::ReadyToRecord => self.handle_ready(event)?,
            SessionState::Recording => self.handle_recording(event)?,
        };
        if let EventOutcome::Ignored(reason) = outcome {
            log::warn!("session: {}", reason);
        }
        Ok(outcome)
    }

    fn handle_ready(&mut self, event: SessionEvent) -> Result<EventOutcome> {
        match event {
            SessionEvent::SetTempo(tempo) => self.set_tempo(tempo)?,
            SessionEvent::SetMetronome(true) => {
                let bpm = self.tempo.ok_or(LooperError::TempoRequired)?;
                self.install_metronome(bpm)?;
                self.metronome_on = true;
            }
            SessionEvent::SetMetronome(false) => {
                self.engine.stop_metronome();
                self.metronome_on = false;
            }
            SessionEvent::SetBeatSync(true) => {
                let bpm = self.tempo.ok_or(LooperError::TempoRequired)?;
                self.engine.set_bpm(Some(bpm))?;
                self.beat_sync = true;
            }
            SessionEvent::SetBeatSync(false) => {
                self.engine.set_bpm(None)?;
                self.beat_sync = false;
            }
            SessionEvent::SetClipHalf(enabled) => self.engine.set_clip_half(enabled),
            SessionEvent::Reset => self.engine.reset(),
            SessionEvent::StartRecord => {
                self.engine.reset_capture();
                self.capture.start()?;
                self.transition(SessionState::Recording);
            }
            SessionEvent::Stop | SessionEvent::Mix => {
                return Ok(EventOutcome::Ignored("not recording"));
            }
            SessionEvent::Export(_) => unreachable!("export is handled before dispatch"),
        }
        Ok(EventOutcome::Applied)
    }

    fn handle_recording(&mut self, event: SessionEvent) -> Result<EventOutcome> {
        match event {
            SessionEvent::SetTempo(_) => return Err(LooperError::NotWhileRecording("change tempo")),
            SessionEvent::SetMetronome(_) => {
                return Err(LooperError::NotWhileRecording("toggle the metronome"));
            }
            SessionEvent::SetBeatSync(_) => {
                return Err(LooperError::NotWhileRecording("toggle beat sync"));
            }
            SessionEvent::SetClipHalf(_) => {
                return Err(LooperError::NotWhileRecording("toggle half clip"));
            }
            SessionEvent::StartRecord => return Ok(EventOutcome::Ignored("already recording")),
            SessionEvent::Stop => {
                self.capture.stop()?;
                self.engine.reset_capture();
            }
            SessionEvent::Reset => {
                self.capture.stop()?;
                self.engine.reset();
            }
            SessionEvent::Mix => {
                self.capture.stop()?;
                if !self.engine.mix() {
                    log::info!("session: nothing recorded, mix skipped");
                }
            }
            SessionEvent::Export(_) => unreachable!("export is handled before dispatch"),
        }
        self.transition(SessionState::ReadyToRecord);
        Ok(EventOutcome::Applied)
    }

    fn set_tempo(&mut self, tempo: Option<u32>) -> Result<()> {
        let sample_rate = self.engine.config().sample_rate;
        let tempo = tempo.map(|bpm| validate_bpm(sample_rate, bpm)).transpose()?;
        self.tempo = tempo;

        match tempo {
            Some(bpm) => {
                // An existing metronome is rebuilt at the new tempo and restarted.
                if self.engine.metronome_enabled().is_some() {
                    self.install_metronome(bpm)?;
                    self.metronome_on = true;
                }
                if self.beat_sync {
                    self.engine.set_bpm(Some(bpm))?;
                }
            }
            None => {
                self.engine.stop_metronome();
                self.engine.set_bpm(None)?;
                self.metronome_on = false;
                self.beat_sync = false;
            }
        }
        log::info!("session: tempo {:?}", tempo);
        Ok(())
    }

    fn install_metronome(&mut self, bpm: u32) -> Result<()> {
        let metronome = Metronome::synthesize(&self.click, bpm, self.engine.config())?;
        self.engine.add_metronome(metronome);
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        log::info!("session: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn tempo(&self) -> Option<u32> {
        self.tempo
    }

    pub fn metronome_on(&self) -> bool {
        self.metronome_on
    }

    pub fn beat_sync(&self) -> bool {
        self.beat_sync
    }

    pub fn engine(&self) -> &Arc<MixEngine> {
        &self.engine
    }

    pub fn capture(&self) -> &C {
        &self.capture
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioConfig;

    #[derive(Default)]
    struct FakeCapture {
        running: bool,
        starts: usize,
        fail_stop: bool,
    }

    impl CaptureControl for FakeCapture {
        fn start(&mut self) -> Result<()> {
            self.running = true;
            self.starts += 1;
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            if self.fail_stop {
                return Err(LooperError::Capture("device gone".to_string()));
            }
            self.running = false;
            Ok(())
        }
    }

    fn session() -> RecordingSession<FakeCapture> {
        let engine = Arc::new(MixEngine::new(AudioConfig {
            sample_rate: 100,
            buffer_size: 10,
            session_seconds: 4,
        }));
        RecordingSession::new(engine, FakeCapture::default(), vec![1000; 5])
    }

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn record(session: &RecordingSession<FakeCapture>, samples: &[i16]) {
        session
            .engine()
            .capture_callback(&pcm(samples), samples.len());
    }

    #[test]
    fn test_record_then_mix() {
        let mut session = session();
        assert_eq!(session.state(), SessionState::ReadyToRecord);

        session.handle(SessionEvent::StartRecord).unwrap();
        assert_eq!(session.state(), SessionState::Recording);
        assert!(session.capture().running);

        record(&session, &[5; 50]);
        session.handle(SessionEvent::Mix).unwrap();
        assert_eq!(session.state(), SessionState::ReadyToRecord);
        assert!(!session.capture().running);
        assert_eq!(session.engine().mixed_samples(), vec![5; 50]);
    }

    #[test]
    fn test_stop_discards_take_only() {
        let mut session = session();
        session.handle(SessionEvent::StartRecord).unwrap();
        record(&session, &[5; 50]);
        session.handle(SessionEvent::Mix).unwrap();

        session.handle(SessionEvent::StartRecord).unwrap();
        record(&session, &[7; 20]);
        session.handle(SessionEvent::Stop).unwrap();

        assert_eq!(session.state(), SessionState::ReadyToRecord);
        assert_eq!(session.engine().capture().filled_bytes(), 0);
        assert_eq!(session.engine().mixed_samples(), vec![5; 50]);
    }

    #[test]
    fn test_reset_while_recording_wipes_session() {
        let mut session = session();
        session.handle(SessionEvent::StartRecord).unwrap();
        record(&session, &[5; 50]);
        session.handle(SessionEvent::Mix).unwrap();
        session.handle(SessionEvent::StartRecord).unwrap();
        record(&session, &[7; 20]);

        session.handle(SessionEvent::Reset).unwrap();
        assert_eq!(session.state(), SessionState::ReadyToRecord);
        assert!(!session.capture().running);
        assert_eq!(session.engine().mixed_filled_bytes(), 0);
        assert_eq!(session.engine().capture().filled_bytes(), 0);
    }

    #[test]
    fn test_second_start_is_ignored() {
        let mut session = session();
        session.handle(SessionEvent::StartRecord).unwrap();
        let outcome = session.handle(SessionEvent::StartRecord).unwrap();
        assert_eq!(outcome, EventOutcome::Ignored("already recording"));
        assert_eq!(session.state(), SessionState::Recording);
        assert_eq!(session.capture().starts, 1);
    }

    #[test]
    fn test_stop_and_mix_ignored_when_idle() {
        let mut session = session();
        assert_eq!(
            session.handle(SessionEvent::Stop).unwrap(),
            EventOutcome::Ignored("not recording")
        );
        assert_eq!(
            session.handle(SessionEvent::Mix).unwrap(),
            EventOutcome::Ignored("not recording")
        );
    }

    #[test]
    fn test_settings_rejected_while_recording() {
        let mut session = session();
        session.handle(SessionEvent::SetTempo(Some(120))).unwrap();
        session.handle(SessionEvent::StartRecord).unwrap();

        for event in [
            SessionEvent::SetTempo(Some(90)),
            SessionEvent::SetMetronome(true),
            SessionEvent::SetBeatSync(true),
            SessionEvent::SetClipHalf(true),
        ] {
            assert!(matches!(
                session.handle(event),
                Err(LooperError::NotWhileRecording(_))
            ));
        }
        assert_eq!(session.state(), SessionState::Recording);
        assert_eq!(session.tempo(), Some(120));
        assert_eq!(session.engine().metronome_enabled(), None);
    }

    #[test]
    fn test_metronome_and_beat_sync_need_tempo() {
        let mut session = session();
        assert!(matches!(
            session.handle(SessionEvent::SetMetronome(true)),
            Err(LooperError::TempoRequired)
        ));
        assert!(matches!(
            session.handle(SessionEvent::SetBeatSync(true)),
            Err(LooperError::TempoRequired)
        ));
        assert!(matches!(
            session.handle(SessionEvent::SetTempo(Some(0))),
            Err(LooperError::InvalidTempo(0))
        ));
        assert_eq!(session.tempo(), None);
    }

    #[test]
    fn test_tempo_change_rebuilds_metronome() {
        let mut session = session();
        session.handle(SessionEvent::SetTempo(Some(120))).unwrap();
        session.handle(SessionEvent::SetMetronome(true)).unwrap();
        assert_eq!(session.engine().metronome_bpm(), Some(120));
        assert_eq!(session.engine().metronome_enabled(), Some(true));

        session.handle(SessionEvent::SetTempo(Some(60))).unwrap();
        assert_eq!(session.engine().metronome_bpm(), Some(60));
        assert_eq!(session.engine().metronome_enabled(), Some(true));
        // 60 BPM at 100 Hz: one click every 100 samples over 4 seconds
        assert_eq!(session.engine().playback().filled_bytes(), 800);
    }

    #[test]
    fn test_tempo_change_restarts_stopped_metronome() {
        let mut session = session();
        session.handle(SessionEvent::SetTempo(Some(120))).unwrap();
        session.handle(SessionEvent::SetMetronome(true)).unwrap();
        session.handle(SessionEvent::SetMetronome(false)).unwrap();
        assert!(!session.metronome_on());
        assert_eq!(session.engine().playback().filled_bytes(), 0);

        session.handle(SessionEvent::SetTempo(Some(90))).unwrap();
        assert_eq!(session.engine().metronome_bpm(), Some(90));
        assert_eq!(session.engine().metronome_enabled(), Some(true));
        assert!(session.metronome_on());
        // 90 BPM at 100 Hz: 66 samples per beat, six whole beats in 400 samples
        assert_eq!(session.engine().playback().filled_bytes(), 6 * 66 * 2);
    }

    #[test]
    fn test_tempo_change_without_metronome_installs_none() {
        let mut session = session();
        session.handle(SessionEvent::SetTempo(Some(120))).unwrap();
        session.handle(SessionEvent::SetTempo(Some(90))).unwrap();
        assert_eq!(session.engine().metronome_enabled(), None);
        assert!(!session.metronome_on());
    }

    #[test]
    fn test_beat_sync_follows_tempo() {
        let mut session = session();
        session.handle(SessionEvent::SetTempo(Some(120))).unwrap();
        session.handle(SessionEvent::SetBeatSync(true)).unwrap();
        assert_eq!(session.engine().bpm(), Some(120));

        session.handle(SessionEvent::SetTempo(Some(60))).unwrap();
        assert_eq!(session.engine().bpm(), Some(60));

        session.handle(SessionEvent::SetBeatSync(false)).unwrap();
        assert_eq!(session.engine().bpm(), None);
    }

    #[test]
    fn test_clearing_tempo_stops_metronome_and_sync() {
        let mut session = session();
        session.handle(SessionEvent::SetTempo(Some(120))).unwrap();
        session.handle(SessionEvent::SetMetronome(true)).unwrap();
        session.handle(SessionEvent::SetBeatSync(true)).unwrap();

        session.handle(SessionEvent::SetTempo(None)).unwrap();
        assert!(!session.metronome_on());
        assert!(!session.beat_sync());
        assert_eq!(session.engine().bpm(), None);
        assert_eq!(session.engine().metronome_enabled(), Some(false));
    }

    #[test]
    fn test_failed_stop_leaves_state_unchanged() {
        let mut session = session();
        session.handle(SessionEvent::StartRecord).unwrap();
        record(&session, &[5; 50]);
        session.capture.fail_stop = true;

        assert!(session.handle(SessionEvent::Mix).is_err());
        assert_eq!(session.state(), SessionState::Recording);
        assert_eq!(session.engine().mixed_filled_bytes(), 0);
    }

    #[test]
    fn test_export_writes_mix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loop.wav");
        let mut session = session();
        session.handle(SessionEvent::StartRecord).unwrap();
        record(&session, &[5; 50]);
        session.handle(SessionEvent::Mix).unwrap();

        session.handle(SessionEvent::Export(path.clone())).unwrap();
        assert_eq!(crate::audio::load_click(&path, 100).unwrap(), vec![5; 50]);
    }
}
