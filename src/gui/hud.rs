use std::io::{stdout, Stdout};

use ratatui::{
    prelude::*,
    widgets::{
        block::{Position, Title},
        *,
    },
    Terminal,
};

use crate::gui::error::HudError;
use crate::recorder::CameraView;

/// What the status view shows, refreshed by the recorder every tick.
#[derive(Debug, Clone, PartialEq)]
pub struct HudStatus {
    pub recording: bool,
    pub session: Option<u32>,
    pub elapsed: f64,
    pub frames: usize,
    pub actions: usize,
    pub dropped: u64,
    pub fps: f32,
    pub fps_warning: f32,
    pub camera: CameraView,
    pub command: String,
    pub saved: usize,
    pub pending: usize,
}

impl Default for HudStatus {
    fn default() -> Self {
        Self {
            recording: false,
            session: None,
            elapsed: 0.0,
            frames: 0,
            actions: 0,
            dropped: 0,
            fps: 0.0,
            fps_warning: 0.0,
            camera: CameraView::FirstPerson,
            command: "NONE".to_owned(),
            saved: 0,
            pending: 0,
        }
    }
}

fn status_lines(status: &HudStatus) -> Vec<Line<'static>> {
    let state = if status.recording {
        match status.session {
            Some(index) => format!(" ● REC  session {} ", index).red().bold(),
            None => " ● REC ".red().bold(),
        }
    } else {
        " ■ IDLE ".white().bold()
    };

    let fps = format!("{:.1}", status.fps);
    let fps = if status.recording && status.fps < status.fps_warning {
        fps.yellow().bold()
    } else {
        fps.into()
    };

    let mut lines = vec![
        Line::from(state),
        Line::from(""),
        Line::from(vec![
            " Elapsed  ".into(),
            format!("{:.1}s", status.elapsed).bold(),
        ]),
        Line::from(vec![
            " Frames   ".into(),
            status.frames.to_string().bold(),
            format!("  ({} dropped)", status.dropped).dark_gray(),
        ]),
        Line::from(vec![" Actions  ".into(), status.actions.to_string().bold()]),
        Line::from(vec![" FPS      ".into(), fps]),
        Line::from(vec![" Camera   ".into(), status.camera.to_string().into()]),
        Line::from(vec![" Input    ".into(), status.command.clone().cyan()]),
        Line::from(""),
        Line::from(vec![
            " Saved sessions ".into(),
            status.saved.to_string().bold(),
        ]),
    ];

    if status.pending > 0 {
        lines.push(Line::from(
            format!(" {} session(s) not yet saved, will retry ", status.pending)
                .yellow()
                .bold(),
        ));
    }
    lines
}

/// The recorder's status view.
pub struct Hud<B: Backend> {
    terminal: Terminal<B>,
}

impl Hud<CrosstermBackend<Stdout>> {
    /// Draws on stdout. The terminal should already be in raw mode on the
    /// alternate screen.
    pub fn stdout() -> Result<Self, HudError> {
        Self::new(CrosstermBackend::new(stdout()))
    }
}

impl<B: Backend> Hud<B> {
    pub fn new(backend: B) -> Result<Self, HudError> {
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;
        Ok(Self { terminal })
    }

    pub fn draw(&mut self, status: &HudStatus) -> Result<(), HudError> {
        let title = Title::from(" DriveGrape ".magenta().bold());
        let instructions = Title::from(Line::from(vec![
            " Drive ".into(),
            "<WASD>".magenta().bold(),
            " Reverse ".into(),
            "<X>".magenta().bold(),
            " Handbrake ".into(),
            "<Space>".magenta().bold(),
            " Record ".into(),
            "<R>".magenta().bold(),
            " Camera ".into(),
            "<C>".magenta().bold(),
            " Quit ".into(),
            "<Q> ".magenta().bold(),
        ]));
        let block = Block::default()
            .title(title.alignment(Alignment::Center))
            .title(
                instructions
                    .alignment(Alignment::Center)
                    .position(Position::Bottom),
            )
            .borders(Borders::ALL);
        let text = Paragraph::new(status_lines(status)).block(block);

        self.terminal.draw(|frame| {
            let area = frame.size();
            frame.render_widget(text, area);
        })?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn backend(&self) -> &B {
        self.terminal.backend()
    }
}
