//! # Diagnostic Monitor
//!
//! Terminal view of a finished bus session: engine statistics, the tail of
//! the transaction stream and a scrollable hex view of the emulated store.
//! Strictly a non-timing-critical surface; it renders from a session report
//! and never runs alongside the bus loop.

use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame, Terminal,
};
use std::io;
use std::time::Duration;

use crate::engine::{BusTransaction, EngineStats};

/// Everything the monitor shows about one finished session.
pub struct SessionReport {
    pub title: String,
    pub stats: EngineStats,
    pub events: Vec<BusTransaction>,
    /// Store contents, when the session ran store-backed.
    pub store: Option<Vec<u8>>,
}

const BYTES_PER_LINE: usize = 16;
const EVENT_PANE_LINES: usize = 32;

/// Monitor UI state.
pub struct MonitorApp {
    report: SessionReport,
    store_offset: usize,
    running: bool,
}

impl MonitorApp {
    pub fn new(report: SessionReport) -> Self {
        MonitorApp {
            report,
            store_offset: 0,
            running: false,
        }
    }

    pub fn run(&mut self) -> Result<(), String> {
        enable_raw_mode().map_err(|e| format!("Failed to enable raw mode: {}", e))?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)
            .map_err(|e| format!("Failed to enter alternate screen: {}", e))?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal =
            Terminal::new(backend).map_err(|e| format!("Failed to create terminal: {}", e))?;

        self.running = true;
        while self.running {
            terminal
                .draw(|f| self.draw_ui(f))
                .map_err(|e| format!("Failed to draw UI: {}", e))?;

            if let Ok(true) = event::poll(Duration::from_millis(50)) {
                if let Ok(Event::Key(key)) = event::read() {
                    self.handle_key_event(key.code);
                }
            }
        }

        disable_raw_mode().map_err(|e| format!("Failed to disable raw mode: {}", e))?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)
            .map_err(|e| format!("Failed to leave alternate screen: {}", e))?;
        terminal
            .show_cursor()
            .map_err(|e| format!("Failed to show cursor: {}", e))?;

        Ok(())
    }

    fn max_store_offset(&self) -> usize {
        match &self.report.store {
            Some(store) => store.len().saturating_sub(BYTES_PER_LINE),
            None => 0,
        }
    }

    fn handle_key_event(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => {
                self.running = false;
            }
            KeyCode::Down => {
                self.store_offset =
                    (self.store_offset + BYTES_PER_LINE).min(self.max_store_offset());
            }
            KeyCode::Up => {
                self.store_offset = self.store_offset.saturating_sub(BYTES_PER_LINE);
            }
            KeyCode::PageDown => {
                self.store_offset =
                    (self.store_offset + 16 * BYTES_PER_LINE).min(self.max_store_offset());
            }
            KeyCode::PageUp => {
                self.store_offset = self.store_offset.saturating_sub(16 * BYTES_PER_LINE);
            }
            KeyCode::Home => {
                self.store_offset = 0;
            }
            KeyCode::End => {
                self.store_offset = self.max_store_offset();
            }
            _ => {}
        }
    }

    fn draw_ui(&self, f: &mut Frame) {
        let size = f.size();

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(5), // Title and stats
                Constraint::Min(8),    // Main content
            ])
            .split(size);

        self.draw_header(f, chunks[0]);

        let content_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
            .split(chunks[1]);

        self.draw_events(f, content_chunks[0]);
        self.draw_store(f, content_chunks[1]);
    }

    fn draw_header(&self, f: &mut Frame, area: Rect) {
        let stats = self.report.stats;
        let header_text = vec![
            Line::from(vec![Span::styled(
                self.report.title.clone(),
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            )]),
            Line::from(vec![Span::raw(format!(
                "Row strobes: {}   Reads: {}   Writes: {}   Transactions: {}",
                stats.row_strobes,
                stats.reads,
                stats.writes,
                stats.transactions()
            ))]),
            Line::from(vec![
                Span::raw("Keys: "),
                Span::styled("q", Style::default().fg(Color::Yellow)),
                Span::raw("=quit, "),
                Span::styled("Up/Down/PgUp/PgDn", Style::default().fg(Color::Yellow)),
                Span::raw("=scroll store"),
            ]),
        ];

        let header = Paragraph::new(header_text)
            .block(Block::default().borders(Borders::ALL).title("Session"))
            .wrap(Wrap { trim: true });
        f.render_widget(header, area);
    }

    fn draw_events(&self, f: &mut Frame, area: Rect) {
        let mut lines = Vec::new();
        let start = self.report.events.len().saturating_sub(EVENT_PANE_LINES);

        for (i, event) in self.report.events.iter().enumerate().skip(start) {
            lines.push(Line::from(vec![Span::raw(format!("{:06}: {}", i, event))]));
        }
        if self.report.events.is_empty() {
            lines.push(Line::from(vec![Span::raw("No transactions recorded")]));
        }

        let events = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("Transactions"))
            .wrap(Wrap { trim: true });
        f.render_widget(events, area);
    }

    fn draw_store(&self, f: &mut Frame, area: Rect) {
        let mut lines = Vec::new();

        match &self.report.store {
            Some(store) => {
                let visible = (area.height as usize).saturating_sub(2);
                for line_index in 0..visible {
                    let offset = self.store_offset + line_index * BYTES_PER_LINE;
                    if offset >= store.len() {
                        break;
                    }

                    let end = (offset + BYTES_PER_LINE).min(store.len());
                    let mut text = format!("{:04X}: ", offset);
                    for byte in &store[offset..end] {
                        text.push_str(&format!("{:02X} ", byte));
                    }
                    lines.push(Line::from(vec![Span::raw(text)]));
                }
            }
            None => {
                lines.push(Line::from(vec![Span::raw(
                    "No store in this session (trace capture)",
                )]));
            }
        }

        let store = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("Store"))
            .wrap(Wrap { trim: true });
        f.render_widget(store, area);
    }
}

/// Opens the monitor over a finished session.
pub fn run_monitor(report: SessionReport) -> Result<(), String> {
    let mut app = MonitorApp::new(report);
    app.run()
}
