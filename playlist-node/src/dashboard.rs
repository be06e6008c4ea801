//! Terminal dashboard for a playlist session

use crate::commands::{self, Command};
use crate::session::{self, BoxError, Options};
use crate::status::{describe_song, truncate_peer_id, LogLevel, SessionStatus, Status};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use parking_lot::RwLock;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState},
    Frame, Terminal,
};
use std::io::stdout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long to wait for the session to discard or leave on exit
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Dashboard state for scrolling and input
struct DashboardState {
    /// Log scroll position (0 = most recent at bottom)
    log_scroll: usize,
    /// Whether auto-scroll is enabled (follows new logs)
    auto_scroll: bool,
    /// Command being typed
    input: String,
}

impl DashboardState {
    fn scroll_up(&mut self, lines: usize, log_count: usize) {
        if log_count > 0 {
            self.log_scroll = (self.log_scroll + lines).min(log_count.saturating_sub(1));
            self.auto_scroll = false;
        }
    }

    fn scroll_down(&mut self, lines: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(lines);
        if self.log_scroll == 0 {
            self.auto_scroll = true;
        }
    }
}

/// Run the dashboard
pub async fn run(
    status: Arc<RwLock<Status>>,
    options: Options,
) -> Result<(), BoxError> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Start the session in background
    let (command_tx, command_rx) = mpsc::unbounded_channel::<Command>();
    let session = tokio::spawn(session::run(options, Arc::clone(&status), command_rx));

    let mut state = DashboardState {
        log_scroll: 0,
        auto_scroll: true,
        input: String::new(),
    };

    // Main loop
    let tick_rate = Duration::from_millis(100);
    let mut should_quit = false;
    let mut seen_logs = 0;

    while !should_quit {
        // New entries came in, scroll to bottom if auto-scroll enabled
        let log_count = status.read().logs.len();
        if log_count != seen_logs {
            seen_logs = log_count;
            if state.auto_scroll {
                state.log_scroll = 0;
            }
        }

        terminal.draw(|f| draw(f, &status, &state))?;

        if !event::poll(tick_rate)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match key.code {
            KeyCode::Esc => should_quit = true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                should_quit = true
            }
            KeyCode::Enter => {
                let line = std::mem::take(&mut state.input);
                match commands::parse(&line) {
                    Ok(Command::Quit) => should_quit = true,
                    Ok(command) => {
                        if command_tx.send(command).is_err() {
                            status
                                .write()
                                .log(LogLevel::Warning, "Session is over, press Esc to exit");
                        }
                    }
                    Err(commands::ParseError::Empty) => {}
                    Err(e) => status.write().log(LogLevel::Warning, e.to_string()),
                }
            }
            KeyCode::Backspace => {
                state.input.pop();
            }
            KeyCode::Char(c) => state.input.push(c),
            // Scroll up (older logs)
            KeyCode::Up => state.scroll_up(1, log_count),
            // Scroll down (newer logs)
            KeyCode::Down => state.scroll_down(1),
            KeyCode::PageUp => state.scroll_up(10, log_count),
            KeyCode::PageDown => state.scroll_down(10),
            // Home - oldest logs
            KeyCode::Home => state.scroll_up(log_count, log_count),
            // End - newest logs (enable auto-scroll)
            KeyCode::End => state.scroll_down(log_count),
            // Toggle auto-scroll
            KeyCode::Tab => {
                state.auto_scroll = !state.auto_scroll;
                if state.auto_scroll {
                    state.log_scroll = 0;
                }
            }
            _ => {}
        }
    }

    // Discard or leave before tearing the terminal down
    let _ = command_tx.send(Command::Quit);
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, session).await;

    // Cleanup
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    Ok(())
}

/// Draw the dashboard
fn draw(f: &mut Frame, status: &Arc<RwLock<Status>>, state: &DashboardState) {
    let s = status.read();

    // Main layout
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Length(6), // Session / peers
            Constraint::Min(10),   // Playlist and logs
            Constraint::Length(3), // Input
            Constraint::Length(1), // Footer
        ])
        .split(f.area());

    draw_header(f, chunks[0], &s);
    draw_stats(f, chunks[1], &s);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(chunks[2]);
    draw_playlist(f, body[0], &s);
    draw_logs(f, body[1], &s, state);

    draw_input(f, chunks[3], state);
    draw_footer(f, chunks[4], state);
}

fn draw_header(f: &mut Frame, area: Rect, s: &Status) {
    let (status_text, status_style) = match s.status {
        SessionStatus::Starting => ("STARTING", Style::default().fg(Color::Yellow)),
        SessionStatus::Running => ("RUNNING", Style::default().fg(Color::Green)),
        SessionStatus::Ended => ("ENDED", Style::default().fg(Color::Red)),
    };

    let title = vec![Line::from(vec![
        Span::styled("Shared Playlist", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("  │  Role: "),
        Span::styled(s.role, Style::default().fg(Color::Magenta)),
        Span::raw("  │  Status: "),
        Span::styled(status_text, status_style),
        Span::raw("  │  Uptime: "),
        Span::styled(s.uptime(), Style::default().fg(Color::Cyan)),
    ])];

    let header = Paragraph::new(title)
        .block(Block::default().borders(Borders::ALL).title(" Dashboard "));

    f.render_widget(header, area);
}

fn draw_stats(f: &mut Frame, area: Rect, s: &Status) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let peer_id_short = s
        .peer_id
        .as_deref()
        .map(truncate_peer_id)
        .unwrap_or_else(|| "...".to_string());

    let session_info = vec![
        Line::from(vec![
            Span::raw("Name: "),
            Span::styled(&s.display_name, Style::default().fg(Color::Cyan)),
        ]),
        Line::from(vec![
            Span::raw("Peer ID: "),
            Span::styled(peer_id_short, Style::default().fg(Color::Yellow)),
        ]),
        Line::from(vec![
            Span::raw("Phase: "),
            Span::styled(&s.phase, Style::default().fg(Color::Green)),
        ]),
        Line::from(vec![
            Span::raw("Nearby hosts: "),
            Span::styled(s.hosts.len().to_string(), Style::default().fg(Color::White)),
        ]),
    ];

    let session_block = Paragraph::new(session_info)
        .block(Block::default().borders(Borders::ALL).title(" Session "));
    f.render_widget(session_block, chunks[0]);

    let title = if s.role == "Host" { " Guests " } else { " Host " };
    let peers: Vec<ListItem> = if s.peers.is_empty() {
        vec![ListItem::new(Span::styled(
            "none",
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        s.peers
            .iter()
            .map(|p| ListItem::new(Span::styled(truncate_peer_id(p), Style::default().fg(Color::Green))))
            .collect()
    };

    let peers_block = List::new(peers)
        .block(Block::default().borders(Borders::ALL).title(format!("{}({}) ", title, s.peers.len())));
    f.render_widget(peers_block, chunks[1]);
}

fn draw_playlist(f: &mut Frame, area: Rect, s: &Status) {
    let (title, items): (String, Vec<ListItem>) = match &s.playlist {
        Some(playlist) => (
            format!(" {} ({}) ", playlist.name, playlist.len()),
            playlist
                .songs
                .iter()
                .enumerate()
                .map(|(i, song)| ListItem::new(describe_song(i + 1, song)))
                .collect(),
        ),
        None => (
            " Playlist ".to_string(),
            vec![ListItem::new(Span::styled(
                "waiting for the host...",
                Style::default().fg(Color::DarkGray),
            ))],
        ),
    };

    let playlist = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(playlist, area);
}

fn draw_logs(f: &mut Frame, area: Rect, s: &Status, state: &DashboardState) {
    let visible_height = area.height.saturating_sub(2) as usize;
    let total_logs = s.logs.len();

    // Newest at the bottom: take the window, then put it back in order
    let mut log_items: Vec<ListItem> = s
        .logs
        .iter()
        .rev()
        .skip(state.log_scroll)
        .take(visible_height)
        .map(|entry| {
            let level_style = match entry.level {
                LogLevel::Info => Style::default().fg(Color::Blue),
                LogLevel::Warning => Style::default().fg(Color::Yellow),
                LogLevel::Error => Style::default().fg(Color::Red),
                LogLevel::Connection => Style::default().fg(Color::Green),
                LogLevel::Sync => Style::default().fg(Color::Magenta),
            };

            let time = entry.timestamp.format("%H:%M:%S").to_string();

            ListItem::new(Line::from(vec![
                Span::styled(format!("{} ", time), Style::default().fg(Color::DarkGray)),
                Span::styled(format!("[{}] ", entry.level.as_str()), level_style),
                Span::raw(entry.message.as_str()),
            ]))
        })
        .collect();
    log_items.reverse();

    // Title with scroll indicator
    let scroll_indicator = if state.auto_scroll {
        " [AUTO] ".to_string()
    } else if total_logs > 0 {
        format!(" [{}/{}] ", total_logs - state.log_scroll, total_logs)
    } else {
        String::new()
    };

    let logs = List::new(log_items).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" Activity Log{}", scroll_indicator)),
    );

    f.render_widget(logs, area);

    // Render scrollbar if there are more logs than visible
    if total_logs > visible_height {
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .begin_symbol(Some("↑"))
            .end_symbol(Some("↓"));

        let mut scrollbar_state = ScrollbarState::new(total_logs)
            .position(total_logs.saturating_sub(state.log_scroll + visible_height));

        f.render_stateful_widget(
            scrollbar,
            area.inner(ratatui::layout::Margin { vertical: 1, horizontal: 0 }),
            &mut scrollbar_state,
        );
    }
}

fn draw_input(f: &mut Frame, area: Rect, state: &DashboardState) {
    let input = Paragraph::new(Line::from(vec![
        Span::styled("> ", Style::default().fg(Color::Cyan)),
        Span::raw(state.input.as_str()),
        Span::styled("█", Style::default().fg(Color::DarkGray)),
    ]))
    .block(Block::default().borders(Borders::ALL).title(format!(" {} ", commands::HELP)));

    f.render_widget(input, area);
}

fn draw_footer(f: &mut Frame, area: Rect, state: &DashboardState) {
    let auto_text = if state.auto_scroll { "ON " } else { "OFF" };
    let auto_color = if state.auto_scroll { Color::Green } else { Color::Yellow };

    let footer = Paragraph::new(Line::from(vec![
        Span::styled(" Esc ", Style::default().fg(Color::Black).bg(Color::White)),
        Span::raw(" Quit  "),
        Span::styled(" Enter ", Style::default().fg(Color::Black).bg(Color::White)),
        Span::raw(" Run  "),
        Span::styled(" ↑↓ ", Style::default().fg(Color::Black).bg(Color::White)),
        Span::raw(" Scroll  "),
        Span::styled(" PgUp/Dn ", Style::default().fg(Color::Black).bg(Color::White)),
        Span::raw(" Page  "),
        Span::styled(" Tab ", Style::default().fg(Color::Black).bg(Color::White)),
        Span::raw(" Auto-scroll: "),
        Span::styled(auto_text, Style::default().fg(auto_color)),
    ]));

    f.render_widget(footer, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> DashboardState {
        DashboardState {
            log_scroll: 0,
            auto_scroll: true,
            input: String::new(),
        }
    }

    #[test]
    fn test_scroll_bounds() {
        let mut state = state();
        state.scroll_up(10, 5);
        assert_eq!(state.log_scroll, 4);
        assert!(!state.auto_scroll);

        state.scroll_down(1);
        assert_eq!(state.log_scroll, 3);
        assert!(!state.auto_scroll);

        state.scroll_down(10);
        assert_eq!(state.log_scroll, 0);
        assert!(state.auto_scroll);
    }

    #[test]
    fn test_scroll_up_without_logs() {
        let mut state = state();
        state.scroll_up(1, 0);
        assert_eq!(state.log_scroll, 0);
        assert!(state.auto_scroll);
    }
}
