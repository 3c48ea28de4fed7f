use std::io;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::prelude::*;
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Clear, Gauge, Paragraph};

use rank_check::config::{Config, StatsSource};
use rank_check::demo_feed::DemoStatsService;
use rank_check::fetch_worker::spawn_fetch_worker;
use rank_check::state::{Phase, SearchController, SessionView};
use rank_check::stats_fetch::{
    FetchCommand, FetchCompletion, HttpStatsService, StatsFetcher, StatsService,
};
use rank_check::tier::Tier;

struct App {
    controller: SearchController,
    should_quit: bool,
    help_overlay: bool,
    cmd_tx: mpsc::Sender<FetchCommand>,
}

impl App {
    fn new(config: &Config, cmd_tx: mpsc::Sender<FetchCommand>) -> Self {
        let mut controller = SearchController::new(config.refresh_interval);
        match config.source {
            StatsSource::Http => controller.push_log(format!("[INFO] Source: {}", config.api_url)),
            StatsSource::Demo => controller.push_log("[INFO] Source: offline demo"),
        }
        Self {
            controller,
            should_quit: false,
            help_overlay: false,
            cmd_tx,
        }
    }

    fn on_key(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('c') if ctrl => self.should_quit = true,
            KeyCode::Char('u') if ctrl => self.controller.clear_query(),
            KeyCode::Char('x') if ctrl => self.controller.clear_result(),
            KeyCode::F(1) => self.help_overlay = !self.help_overlay,
            KeyCode::Enter => self.search(),
            KeyCode::Backspace => self.controller.pop_query_char(),
            KeyCode::Char(c) if !ctrl => self.controller.push_query_char(c),
            _ => {}
        }
    }

    fn search(&mut self) {
        if let Some(cmd) = self.controller.submit() {
            self.dispatch(cmd);
        }
    }

    fn maybe_refresh(&mut self) {
        if let Some(cmd) = self.controller.poll_refresh(Instant::now()) {
            self.dispatch(cmd);
        }
    }

    fn dispatch(&mut self, cmd: FetchCommand) {
        let ticket = cmd.ticket;
        if self.cmd_tx.send(cmd).is_err() {
            self.controller.push_log("[WARN] Fetch worker unavailable");
            self.controller.abandon(ticket);
        }
    }
}

fn main() -> io::Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    let config = Config::from_env();

    let service: Arc<dyn StatsService> = match config.source {
        StatsSource::Http => Arc::new(HttpStatsService::new(&config.api_url, config.timeout)),
        StatsSource::Demo => Arc::new(DemoStatsService::new()),
    };
    let fetcher = Arc::new(StatsFetcher::new(service, config.timeout));

    let (tx, rx) = mpsc::channel();
    let (cmd_tx, cmd_rx) = mpsc::channel();
    spawn_fetch_worker(fetcher, cmd_rx, tx);

    let mut app = App::new(&config, cmd_tx);
    if let Some(query) = &config.initial_query {
        app.controller.set_query(query.clone());
        app.search();
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = ratatui::Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app, rx);
    app.controller.end_session();

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("error: {err}");
    }
    Ok(())
}

fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    rx: mpsc::Receiver<FetchCompletion>,
) -> io::Result<()> {
    let tick_rate = Duration::from_millis(250);
    let mut last_tick = Instant::now();

    loop {
        while let Ok(completion) = rx.try_recv() {
            app.controller.apply(completion, Instant::now());
        }

        app.maybe_refresh();

        let view = app.controller.view();
        terminal.draw(|f| ui(f, app, &view))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.on_key(key);
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn ui(frame: &mut Frame, app: &App, view: &SessionView) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(1),
            Constraint::Length(5),
            Constraint::Length(2),
        ])
        .split(frame.size());

    render_header(frame, chunks[0], view);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(40), Constraint::Length(32)])
        .split(chunks[1]);
    render_search(frame, columns[0], view);
    render_tiers(frame, columns[1], view);

    let console = Paragraph::new(console_text(app))
        .block(Block::default().title("Console").borders(Borders::ALL));
    frame.render_widget(console, chunks[2]);

    let footer = Paragraph::new(footer_text(view))
        .block(Block::default().borders(Borders::TOP));
    frame.render_widget(footer, chunks[3]);

    if app.help_overlay {
        render_help_overlay(frame, frame.size());
    }
}

fn render_header(frame: &mut Frame, area: Rect, view: &SessionView) {
    let mut lines = vec![Line::from(Span::styled(
        "GENLAYER RANK CHECK",
        Style::default().add_modifier(Modifier::BOLD),
    ))];
    if view.is_refreshing {
        lines.push(Line::from(Span::styled(
            "● LIVE REFRESHING DATA",
            Style::default()
                .fg(hex_color(Tier::Singularity.color()))
                .add_modifier(Modifier::BOLD),
        )));
    }
    let header = Paragraph::new(lines)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::BOTTOM));
    frame.render_widget(header, area);
}

fn render_search(frame: &mut Frame, area: Rect, view: &SessionView) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(1),
            Constraint::Min(1),
        ])
        .split(area);

    let accent = view
        .derived
        .as_ref()
        .map(|d| hex_color(d.tier_color))
        .unwrap_or(Color::DarkGray);
    let button = if view.phase == Phase::Searching { "..." } else { "SCAN" };
    let input_text = if view.query.is_empty() {
        Span::styled("Discord Username...", Style::default().fg(Color::DarkGray))
    } else {
        Span::raw(format!("{}_", view.query))
    };
    let input = Paragraph::new(Line::from(input_text)).block(
        Block::default()
            .title(format!("Search [{button}]"))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(accent)),
    );
    frame.render_widget(input, rows[0]);

    if let Some(msg) = &view.error_message {
        let error = Paragraph::new(msg.as_str())
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::Red).add_modifier(Modifier::BOLD));
        frame.render_widget(error, rows[1]);
    }

    render_result_card(frame, rows[2], view);
}

fn render_result_card(frame: &mut Frame, area: Rect, view: &SessionView) {
    let (Some(record), Some(derived)) = (&view.result, &view.derived) else {
        let hint = match view.phase {
            Phase::Searching => "Scanning Top 2000 Members...",
            _ => "Type a username and press Enter",
        };
        let empty = Paragraph::new(hint)
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::DarkGray));
        frame.render_widget(empty, area);
        return;
    };

    let color = hex_color(derived.tier_color);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color));
    let inner = block.inner(area);
    frame.render_widget(block, area);
    if inner.height < 7 {
        let cramped = Paragraph::new(format!(
            "{} | {} | L{}",
            record.username.to_uppercase(),
            derived.tier_label,
            record.level
        ))
        .style(Style::default().fg(color));
        frame.render_widget(cramped, inner);
        return;
    }

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(1),
        ])
        .split(inner);

    let bold = Style::default().fg(color).add_modifier(Modifier::BOLD);
    let identity = Paragraph::new(vec![
        Line::from(Span::styled(record.username.to_uppercase(), bold)),
        Line::from(Span::styled(
            format!("TOP 2000 RANK: #{}", record.rank),
            Style::default().fg(Color::Gray),
        )),
        Line::from(Span::styled(
            record.avatar_url(),
            Style::default().fg(Color::DarkGray),
        )),
    ])
    .alignment(Alignment::Center);
    frame.render_widget(identity, rows[0]);

    let xp_line = Line::from(vec![
        Span::styled(format!("LEVEL {}", record.level), bold),
        Span::raw("  "),
        Span::styled(
            format!("{} / {} XP", record.message_xp, derived.next_threshold),
            Style::default().fg(Color::Gray),
        ),
    ]);
    frame.render_widget(Paragraph::new(xp_line), rows[1]);

    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(color).bg(Color::Black))
        .ratio(derived.progress_fraction)
        .label(format!("{:.0}%", derived.progress_fraction * 100.0));
    frame.render_widget(gauge, rows[2]);

    let label = Paragraph::new(Span::styled(
        derived.tier_label,
        bold.add_modifier(Modifier::ITALIC),
    ))
    .alignment(Alignment::Center);
    frame.render_widget(label, rows[3]);

    let updated = view
        .last_updated
        .map(|ts| ts.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    let footer = Paragraph::new(format!("UPDATED: {updated}"))
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(footer, rows[4]);
}

fn render_tiers(frame: &mut Frame, area: Rect, view: &SessionView) {
    let current = view.derived.as_ref().map(|d| d.tier);
    let mut lines = Vec::new();
    for tier in Tier::ALL {
        let mut style = Style::default().fg(hex_color(tier.color()));
        if current == Some(tier) {
            style = style.add_modifier(Modifier::BOLD | Modifier::REVERSED);
        }
        lines.push(Line::from(Span::styled(
            format!("▌ {} {}", tier.label(), tier.level_range_label()),
            style,
        )));
        lines.push(Line::from(""));
    }
    let panel = Paragraph::new(lines)
        .block(Block::default().title("Rank Classification").borders(Borders::ALL));
    frame.render_widget(panel, area);
}

fn console_text(app: &App) -> String {
    let logs = &app.controller.session().logs;
    if logs.is_empty() {
        return "No activity yet".to_string();
    }
    let start = logs.len().saturating_sub(3);
    logs.iter()
        .skip(start)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n")
}

fn footer_text(view: &SessionView) -> String {
    let mut keys = vec!["Enter Scan", "Backspace Edit", "Ctrl+U Clear input"];
    if view.phase == Phase::HasResult {
        keys.push("Ctrl+X Clear result");
    }
    keys.extend(["F1 Help", "Esc Quit"]);
    keys.join(" | ")
}

fn hex_color(hex: &str) -> Color {
    let raw = hex.trim_start_matches('#');
    if raw.len() != 6 || !raw.is_ascii() {
        return Color::White;
    }
    let channel = |i: usize| u8::from_str_radix(&raw[i..i + 2], 16).ok();
    match (channel(0), channel(2), channel(4)) {
        (Some(r), Some(g), Some(b)) => Color::Rgb(r, g, b),
        _ => Color::White,
    }
}

fn render_help_overlay(frame: &mut Frame, area: Rect) {
    let popup_area = centered_rect(60, 60, area);
    frame.render_widget(Clear, popup_area);

    let text = [
        "Rank Check - Help",
        "",
        "  type         Edit username",
        "  Enter        Scan leaderboard",
        "  Backspace    Delete character",
        "  Ctrl+U       Clear input",
        "  Ctrl+X       Clear result (stops auto-refresh)",
        "  F1           Toggle help",
        "  Esc / Ctrl+C Quit",
        "",
        "Results refresh silently in the background.",
    ]
    .join("\n");

    let help = Paragraph::new(text)
        .block(Block::default().title("Help").borders(Borders::ALL))
        .style(Style::default());
    frame.render_widget(help, popup_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1]);

    horizontal[1]
}
