use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph},
};
use std::{
    io,
    path::PathBuf,
    time::{Duration, Instant},
};

use crate::audio::{
    AudioConfig, AudioEvent, CaptureControl, EventOutcome, RecordingSession, SessionEvent,
    SessionState,
};

/// Key bindings outside of a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Record,
    Stop,
    Mix,
    Reset,
    ToggleMetronome,
    ToggleBeatSync,
    ToggleClipHalf,
    PromptBpm,
    PromptExport,
    Quit,
}

pub fn map_key(code: KeyCode) -> Option<Action> {
    let KeyCode::Char(c) = code else {
        return match code {
            KeyCode::Esc => Some(Action::Quit),
            _ => None,
        };
    };

    match c.to_ascii_lowercase() {
        'r' => Some(Action::Record),
        's' => Some(Action::Stop),
        'm' => Some(Action::Mix),
        'x' => Some(Action::Reset),
        'n' => Some(Action::ToggleMetronome),
        'g' => Some(Action::ToggleBeatSync),
        'h' => Some(Action::ToggleClipHalf),
        't' => Some(Action::PromptBpm),
        'e' => Some(Action::PromptExport),
        'q' => Some(Action::Quit),
        _ => None,
    }
}

/// An empty prompt clears the tempo.
fn parse_bpm_input(input: &str) -> Result<Option<u32>, String> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }
    input
        .parse::<u32>()
        .map(Some)
        .map_err(|_| format!("'{}' is not a whole number of beats per minute", input))
}

fn ensure_wav_extension(filename: &str) -> String {
    if filename.to_lowercase().ends_with(".wav") {
        filename.to_string()
    } else {
        format!("{}.wav", filename)
    }
}

fn validate_export_path(input: &str) -> Result<PathBuf, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("Export file name is empty".to_string());
    }

    let path = PathBuf::from(ensure_wav_extension(input));
    if path.exists() {
        return Err("File already exists - choose a different name".to_string());
    }
    Ok(path)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
    SetBpm,
    ExportWav,
}

#[derive(Debug, Clone, PartialEq)]
enum HeaderStatus {
    InputPrompt(String, String), // (prompt, current_input)
    Success(String),
    Failure(String),
    Cancelled,
}

/// Everything the panels show, read once per frame.
#[derive(Debug, Clone)]
struct SessionSnapshot {
    state: SessionState,
    tempo: Option<u32>,
    metronome_on: bool,
    beat_sync: bool,
    clip_half: bool,
    take_bytes: usize,
    take_full: bool,
    loop_bytes: usize,
    loop_cursor: usize,
    config: AudioConfig,
    dropped_chunks: u64,
    muted_chunks: u64,
}

impl SessionSnapshot {
    fn capture<C: CaptureControl>(session: &RecordingSession<C>) -> Self {
        let engine = session.engine();
        let (loop_cursor, loop_bytes) = engine.playback().position();
        Self {
            state: session.state(),
            tempo: session.tempo(),
            metronome_on: session.metronome_on(),
            beat_sync: session.beat_sync(),
            clip_half: engine.clip_half(),
            take_bytes: engine.capture().filled_bytes(),
            take_full: engine.capture().is_full(),
            loop_bytes,
            loop_cursor,
            config: engine.config().clone(),
            dropped_chunks: engine.dropped_capture_chunks(),
            muted_chunks: engine.muted_playback_chunks(),
        }
    }

    fn ratio(part: usize, whole: usize) -> f64 {
        if whole == 0 {
            0.0
        } else {
            (part as f64 / whole as f64).clamp(0.0, 1.0)
        }
    }
}

pub struct TerminalUI<C: CaptureControl> {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    session: RecordingSession<C>,
    event_receiver: crossbeam::channel::Receiver<AudioEvent>,
    is_running: bool,
    last_update: Instant,
    input_device_name: String,
    output_device_name: String,
    input_mode: Option<InputMode>,
    input_buffer: String,
    header_status: Option<HeaderStatus>,
    status_timer: Option<Instant>,
}

impl<C: CaptureControl> TerminalUI<C> {
    pub fn new(
        session: RecordingSession<C>,
        event_receiver: crossbeam::channel::Receiver<AudioEvent>,
        input_device_name: &str,
        output_device_name: &str,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;

        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;

        Ok(Self {
            terminal,
            session,
            event_receiver,
            is_running: true,
            last_update: Instant::now(),
            input_device_name: input_device_name.to_string(),
            output_device_name: output_device_name.to_string(),
            input_mode: None,
            input_buffer: String::new(),
            header_status: None,
            status_timer: None,
        })
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        while self.is_running {
            self.process_events()?;
            self.check_status_timer();

            if self.last_update.elapsed() >= Duration::from_millis(50) {
                self.draw()?;
                self.last_update = Instant::now();
            }

            std::thread::sleep(Duration::from_millis(1));
        }

        // Leave the device idle on the way out.
        if self.session.state() == SessionState::Recording
            && let Err(e) = self.session.handle(SessionEvent::Stop)
        {
            log::error!("stopping capture on exit failed: {}", e);
        }
        Ok(())
    }

    fn process_events(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if event::poll(Duration::from_millis(0))?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            self.handle_key_event(key);
        }

        while let Ok(event) = self.event_receiver.try_recv() {
            self.handle_audio_event(event);
        }

        Ok(())
    }

    fn handle_key_event(&mut self, key: KeyEvent) {
        if let Some(mode) = self.input_mode {
            self.handle_input_key(key, mode);
            return;
        }

        let Some(action) = map_key(key.code) else {
            return;
        };

        match action {
            Action::Quit => self.is_running = false,
            Action::Record => self.apply(SessionEvent::StartRecord, "Recording"),
            Action::Stop => self.apply(SessionEvent::Stop, "Take discarded"),
            Action::Mix => self.apply(SessionEvent::Mix, "Take mixed into loop"),
            Action::Reset => self.apply(SessionEvent::Reset, "Loop cleared"),
            Action::ToggleMetronome => {
                let on = !self.session.metronome_on();
                self.apply(
                    SessionEvent::SetMetronome(on),
                    if on { "Metronome ON" } else { "Metronome OFF" },
                );
            }
            Action::ToggleBeatSync => {
                let on = !self.session.beat_sync();
                self.apply(
                    SessionEvent::SetBeatSync(on),
                    if on { "Beat Sync ON" } else { "Beat Sync OFF" },
                );
            }
            Action::ToggleClipHalf => {
                let on = !self.session.engine().clip_half();
                self.apply(
                    SessionEvent::SetClipHalf(on),
                    if on { "Half Clip ON" } else { "Half Clip OFF" },
                );
            }
            Action::PromptBpm => {
                self.start_input_mode(InputMode::SetBpm, "Set BPM (empty clears): ")
            }
            Action::PromptExport => self.start_input_mode(InputMode::ExportWav, "Export mix as: "),
        }
    }

    fn handle_input_key(&mut self, key: KeyEvent, mode: InputMode) {
        match key.code {
            KeyCode::Enter => {
                let input = std::mem::take(&mut self.input_buffer);
                self.exit_input_mode();
                self.finish_input(mode, &input);
            }
            KeyCode::Esc => {
                self.exit_input_mode();
                self.show_cancelled();
            }
            KeyCode::Backspace => {
                self.input_buffer.pop();
                self.update_input_display();
            }
            KeyCode::Char(c) => {
                let accepted = match mode {
                    InputMode::SetBpm => c.is_ascii_digit(),
                    InputMode::ExportWav => !c.is_control(),
                };
                if accepted {
                    self.input_buffer.push(c);
                    self.update_input_display();
                }
            }
            _ => {}
        }
    }

    fn finish_input(&mut self, mode: InputMode, input: &str) {
        match mode {
            InputMode::SetBpm => match parse_bpm_input(input) {
                Ok(Some(bpm)) => {
                    self.apply(SessionEvent::SetTempo(Some(bpm)), &format!("BPM: {}", bpm))
                }
                Ok(None) => self.apply(SessionEvent::SetTempo(None), "Tempo cleared"),
                Err(msg) => self.show_failure(&msg),
            },
            InputMode::ExportWav => match validate_export_path(input) {
                Ok(path) => {
                    let message = format!("Exported: {}", path.display());
                    self.apply(SessionEvent::Export(path), &message);
                }
                Err(msg) => self.show_failure(&msg),
            },
        }
    }

    fn apply(&mut self, event: SessionEvent, success: &str) {
        match self.session.handle(event) {
            Ok(EventOutcome::Applied) => self.show_success(success),
            Ok(EventOutcome::Ignored(reason)) => {
                self.show_failure(&format!("Ignored: {}", reason))
            }
            Err(e) => {
                log::error!("session event failed: {}", e);
                self.show_failure(&e.to_string());
            }
        }
    }

    fn handle_audio_event(&mut self, event: AudioEvent) {
        match event {
            AudioEvent::StreamError(msg) => {
                log::error!("{}", msg);
                self.show_failure(&msg);
            }
            AudioEvent::DevicesUpdated(input, output) => {
                if let Some(name) = input {
                    self.input_device_name = name;
                }
                if let Some(name) = output {
                    self.output_device_name = name;
                }
                self.show_success("Devices updated");
            }
        }
    }

    fn start_input_mode(&mut self, mode: InputMode, prompt: &str) {
        self.input_mode = Some(mode);
        self.input_buffer.clear();
        self.header_status = Some(HeaderStatus::InputPrompt(prompt.to_string(), String::new()));
        self.status_timer = None;
    }

    fn exit_input_mode(&mut self) {
        self.input_mode = None;
        self.input_buffer.clear();
    }

    fn update_input_display(&mut self) {
        if let Some(HeaderStatus::InputPrompt(ref prompt, _)) = self.header_status {
            let display_input = match self.input_mode {
                Some(InputMode::ExportWav) if !self.input_buffer.is_empty() => {
                    ensure_wav_extension(&self.input_buffer)
                }
                _ => self.input_buffer.clone(),
            };
            self.header_status = Some(HeaderStatus::InputPrompt(prompt.clone(), display_input));
        }
    }

    fn show_success(&mut self, message: &str) {
        self.header_status = Some(HeaderStatus::Success(message.to_string()));
        self.status_timer = Some(Instant::now());
    }

    fn show_failure(&mut self, message: &str) {
        self.header_status = Some(HeaderStatus::Failure(message.to_string()));
        self.status_timer = Some(Instant::now());
    }

    fn show_cancelled(&mut self) {
        self.header_status = Some(HeaderStatus::Cancelled);
        self.status_timer = Some(Instant::now());
    }

    fn check_status_timer(&mut self) {
        if let Some(timer) = self.status_timer
            && timer.elapsed() >= Duration::from_secs(3)
        {
            self.header_status = None;
            self.status_timer = None;
        }
    }

    fn draw(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let snapshot = SessionSnapshot::capture(&self.session);
        let input_device_name = self.input_device_name.clone();
        let output_device_name = self.output_device_name.clone();
        let header_status = self.header_status.clone();

        self.terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(3), // Header
                    Constraint::Min(0),    // Session
                    Constraint::Length(5), // Footer
                ])
                .split(f.area());

            Self::draw_header_static(
                f,
                chunks[0],
                &input_device_name,
                &output_device_name,
                &header_status,
            );
            Self::draw_session_static(f, chunks[1], &snapshot);
            Self::draw_footer_static(f, chunks[2], &snapshot);
        })?;
        Ok(())
    }

    fn draw_header_static(
        f: &mut Frame,
        area: Rect,
        input_device_name: &str,
        output_device_name: &str,
        header_status: &Option<HeaderStatus>,
    ) {
        let (header_text, color) = match header_status {
            Some(HeaderStatus::InputPrompt(prompt, current_input)) => {
                (format!("{} {}", prompt, current_input), Color::Yellow)
            }
            Some(HeaderStatus::Success(message)) => (format!("✓ {}", message), Color::Green),
            Some(HeaderStatus::Failure(message)) => (format!("✗ {}", message), Color::Red),
            Some(HeaderStatus::Cancelled) => ("✗ Cancelled".to_string(), Color::DarkGray),
            None => (
                format!(
                    "Input: {} | Output: {}",
                    input_device_name, output_device_name
                ),
                Color::White,
            ),
        };

        let header = Paragraph::new(header_text)
            .style(Style::default().fg(color).add_modifier(Modifier::BOLD))
            .alignment(ratatui::layout::Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title("Looppedal"));
        f.render_widget(header, area);
    }

    fn draw_session_static(f: &mut Frame, area: Rect, snapshot: &SessionSnapshot) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Min(0),
            ])
            .split(area);

        let (take_title, take_color) = match (snapshot.state, snapshot.take_full) {
            (SessionState::Recording, true) => ("Take (buffer full)", Color::Red),
            (SessionState::Recording, false) => ("Take (recording)", Color::Red),
            (SessionState::ReadyToRecord, _) => ("Take", Color::DarkGray),
        };
        let take_gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title(take_title))
            .gauge_style(Style::default().fg(take_color))
            .ratio(SessionSnapshot::ratio(
                snapshot.take_bytes,
                snapshot.config.capacity_bytes(),
            ))
            .label(format!(
                "{:.1}s / {:.0}s",
                snapshot.config.bytes_to_seconds(snapshot.take_bytes),
                snapshot.config.session_seconds
            ));

        let loop_gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Loop"))
            .gauge_style(Style::default().fg(Color::Green))
            .ratio(SessionSnapshot::ratio(
                snapshot.loop_cursor,
                snapshot.loop_bytes,
            ))
            .label(format!(
                "{:.1}s / {:.1}s",
                snapshot.config.bytes_to_seconds(snapshot.loop_cursor),
                snapshot.config.bytes_to_seconds(snapshot.loop_bytes)
            ));

        let on_off = |on: bool| if on { "on" } else { "off" };
        let details = Paragraph::new(format!(
            "State: {}\n\
            Tempo: {}\n\
            Metronome: {}\n\
            Beat sync: {}\n\
            Half clip: {}\n\
            Dropped capture chunks: {}\n\
            Muted playback chunks: {}",
            match snapshot.state {
                SessionState::ReadyToRecord => "Ready to record",
                SessionState::Recording => "Recording",
            },
            snapshot
                .tempo
                .map_or_else(|| "not set".to_string(), |bpm| format!("{} BPM", bpm)),
            on_off(snapshot.metronome_on),
            on_off(snapshot.beat_sync),
            on_off(snapshot.clip_half),
            snapshot.dropped_chunks,
            snapshot.muted_chunks,
        ))
        .block(Block::default().borders(Borders::ALL).title("Session"));

        f.render_widget(take_gauge, chunks[0]);
        f.render_widget(loop_gauge, chunks[1]);
        f.render_widget(details, chunks[2]);
    }

    fn draw_footer_static(f: &mut Frame, area: Rect, snapshot: &SessionSnapshot) {
        let key_color = Color::Yellow;
        let desc_color = Color::White;
        let sep_color = Color::DarkGray;

        let key_desc = |key: &str, desc: &str| -> Vec<Span<'static>> {
            vec![
                Span::styled(
                    key.to_string(),
                    Style::default().fg(key_color).add_modifier(Modifier::BOLD),
                ),
                Span::styled("=".to_string(), Style::default().fg(sep_color)),
                Span::styled(desc.to_string(), Style::default().fg(desc_color)),
            ]
        };
        let separator = || Span::styled(" | ".to_string(), Style::default().fg(sep_color));

        let mut line1_spans = Vec::new();
        line1_spans.extend(key_desc("R", "Record"));
        line1_spans.push(separator());
        line1_spans.extend(key_desc("S", "Stop"));
        line1_spans.push(separator());
        line1_spans.extend(key_desc("M", "Mix"));
        line1_spans.push(separator());
        line1_spans.extend(key_desc("X", "Reset"));
        line1_spans.push(separator());
        line1_spans.extend(key_desc("E", "Export"));
        line1_spans.push(separator());
        line1_spans.extend(key_desc("Q", "Quit"));

        let mut line2_spans = Vec::new();
        line2_spans.extend(key_desc("T", "BPM"));
        line2_spans.push(separator());
        line2_spans.extend(key_desc(
            "N",
            if snapshot.metronome_on {
                "Metronome On"
            } else {
                "Metronome Off"
            },
        ));
        line2_spans.push(separator());
        line2_spans.extend(key_desc(
            "G",
            if snapshot.beat_sync {
                "Sync On"
            } else {
                "Sync Off"
            },
        ));
        line2_spans.push(separator());
        line2_spans.extend(key_desc(
            "H",
            if snapshot.clip_half {
                "Half On"
            } else {
                "Half Off"
            },
        ));

        let status_line = Line::from(vec![Span::styled(
            match snapshot.tempo {
                Some(bpm) => format!(" BPM: {} ", bpm),
                None => " BPM: -- ".to_string(),
            },
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )]);

        let footer = Paragraph::new(vec![
            Line::from(line1_spans),
            Line::from(line2_spans),
            status_line,
        ])
        .block(Block::default().borders(Borders::ALL).title("Controls"));

        f.render_widget(footer, area);
    }
}

impl<C: CaptureControl> Drop for TerminalUI<C> {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(
            self.terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        );
    }
}
