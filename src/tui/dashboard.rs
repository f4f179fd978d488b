//! Live dashboard for a running validation

use crate::proxy::{ProbeOutcome, ProgressSnapshot, Protocol};
use crate::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use std::collections::VecDeque;
use std::io;
use tokio::sync::{mpsc, watch};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// Maximum number of recent outcomes to keep per list
const MAX_RECENT: usize = 100;

/// Dashboard state
pub struct ValidationDashboard {
    protocol: Protocol,
    progress_rx: watch::Receiver<ProgressSnapshot>,
    outcome_rx: mpsc::UnboundedReceiver<ProbeOutcome>,
    /// Fired when the user quits before the run is over
    cancel: CancellationToken,
    progress: ProgressSnapshot,
    /// Recent good outcomes (VecDeque for O(1) eviction)
    recent_good: VecDeque<ProbeOutcome>,
    recent_bad: VecDeque<ProbeOutcome>,
    /// Selected list (0 = good, 1 = bad)
    selected_list: usize,
    list_state: ListState,
    status_message: String,
    is_complete: bool,
    should_quit: bool,
}

impl ValidationDashboard {
    pub fn new(
        protocol: Protocol,
        progress_rx: watch::Receiver<ProgressSnapshot>,
        outcome_rx: mpsc::UnboundedReceiver<ProbeOutcome>,
        cancel: CancellationToken,
    ) -> Self {
        let mut list_state = ListState::default();
        list_state.select(Some(0));

        Self {
            protocol,
            progress_rx,
            outcome_rx,
            cancel,
            progress: ProgressSnapshot::default(),
            recent_good: VecDeque::new(),
            recent_bad: VecDeque::new(),
            selected_list: 0,
            list_state,
            status_message: "Starting validation... Press 'q' to quit.".to_string(),
            is_complete: false,
            should_quit: false,
        }
    }

    /// Run the dashboard until the user quits
    pub async fn run(&mut self) -> Result<()> {
        // Setup terminal
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.run_app(&mut terminal).await;

        // Restore terminal
        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        )?;
        terminal.show_cursor()?;

        result
    }

    async fn run_app<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        loop {
            terminal.draw(|f| self.ui(f))?;

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_input(key.code);
                        if self.should_quit {
                            if !self.is_complete {
                                self.cancel.cancel();
                            }
                            break;
                        }
                    }
                }
            }

            self.drain_outcomes();
            self.progress = *self.progress_rx.borrow();
            self.refresh_status();

            tokio::task::yield_now().await;
        }

        Ok(())
    }

    fn drain_outcomes(&mut self) {
        loop {
            match self.outcome_rx.try_recv() {
                Ok(outcome) => self.push_outcome(outcome),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    // Dispatcher dropped its tap, the run is over.
                    self.is_complete = true;
                    break;
                }
            }
        }
    }

    fn push_outcome(&mut self, outcome: ProbeOutcome) {
        let list = if outcome.is_success() {
            &mut self.recent_good
        } else {
            &mut self.recent_bad
        };
        list.push_back(outcome);
        if list.len() > MAX_RECENT {
            list.pop_front();
        }
    }

    fn refresh_status(&mut self) {
        let p = self.progress;
        if p.total > 0 && p.is_done() {
            self.is_complete = true;
        }

        self.status_message = if self.is_complete {
            format!(
                "Complete! Checked: {} | Valid: {} | Failed: {} | Press 'q' to quit",
                p.completed,
                p.succeeded,
                p.failed()
            )
        } else {
            format!(
                "Validating... {}% ({}/{}) | Valid: {} | Failed: {} | {:.1}s",
                p.percent(),
                p.completed,
                p.total,
                p.succeeded,
                p.failed(),
                p.elapsed.as_secs_f64()
            )
        };
    }

    fn handle_input(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
            }
            KeyCode::Tab => {
                self.selected_list = (self.selected_list + 1) % 2;
                self.list_state.select(Some(0));
            }
            KeyCode::Down => {
                let len = self.selected_len();
                let i = match self.list_state.selected() {
                    Some(i) if i >= len.saturating_sub(1) => 0,
                    Some(i) => i + 1,
                    None => 0,
                };
                self.list_state.select(Some(i));
            }
            KeyCode::Up => {
                let len = self.selected_len();
                let i = match self.list_state.selected() {
                    Some(0) => len.saturating_sub(1),
                    Some(i) => i - 1,
                    None => 0,
                };
                self.list_state.select(Some(i));
            }
            _ => {}
        }
    }

    fn selected_len(&self) -> usize {
        if self.selected_list == 0 {
            self.recent_good.len()
        } else {
            self.recent_bad.len()
        }
    }

    fn ui(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(3), // Title
                Constraint::Length(3), // Progress bar
                Constraint::Min(0),    // Outcome lists
                Constraint::Length(3), // Status bar
            ])
            .split(f.size());

        let title = Paragraph::new(format!("Proxy Validation ({})", self.protocol))
            .style(Style::default().fg(Color::Cyan))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(title, chunks[0]);

        let percent = self.progress.percent().min(100);
        let progress_label = format!(
            "{}/{} ({}%)",
            self.progress.completed, self.progress.total, percent
        );
        let gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Progress"))
            .gauge_style(Style::default().fg(Color::Green).bg(Color::Black))
            .percent(percent)
            .label(progress_label);
        f.render_widget(gauge, chunks[1]);

        let list_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(chunks[2]);

        Self::render_outcome_list(
            f,
            list_chunks[0],
            "Valid",
            &self.recent_good,
            self.progress.succeeded,
            Color::Green,
            if self.selected_list == 0 { Some(&mut self.list_state) } else { None },
        );

        Self::render_outcome_list(
            f,
            list_chunks[1],
            "Failed",
            &self.recent_bad,
            self.progress.failed(),
            Color::Red,
            if self.selected_list == 1 { Some(&mut self.list_state) } else { None },
        );

        let status = Paragraph::new(self.status_message.clone())
            .style(if self.is_complete {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::Yellow)
            })
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("Status"));
        f.render_widget(status, chunks[3]);
    }

    fn render_outcome_list(
        f: &mut Frame,
        area: Rect,
        title: &str,
        outcomes: &VecDeque<ProbeOutcome>,
        total_count: usize,
        color: Color,
        list_state: Option<&mut ListState>,
    ) {
        let items: Vec<ListItem> = outcomes
            .iter()
            .rev() // Show newest first
            .map(|outcome| ListItem::new(outcome_line(outcome)).style(Style::default().fg(color)))
            .collect();

        let border_style = if list_state.is_some() {
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };

        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!("{} ({})", title, total_count))
                    .border_style(border_style),
            )
            .highlight_style(Style::default().bg(Color::DarkGray))
            .highlight_symbol(">> ");

        if let Some(state) = list_state {
            f.render_stateful_widget(list, area, state);
        } else {
            f.render_widget(list, area);
        }
    }
}

/// One list row for an outcome
fn outcome_line(outcome: &ProbeOutcome) -> String {
    let mut line = outcome.endpoint.clone();
    if let Some(kind) = outcome.failure_kind {
        line.push_str(&format!(" [{}]", kind));
    }
    if let Some(code) = outcome.http_status.filter(|_| !outcome.is_success()) {
        line.push_str(&format!(" HTTP {}", code));
    }
    if let Some(ms) = outcome.response_time_ms {
        line.push_str(&format!(" ({}ms)", ms));
    }
    line
}
