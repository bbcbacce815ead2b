//! Rendering for the live view.
//!
//! Layout: header with the active window's burn gauge, the session table,
//! a detail line for the selection, and a key-hint footer.

use crate::app::App;
use crate::theme;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table};

pub fn render(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header / gauge
            Constraint::Min(5),    // session table
            Constraint::Length(3), // detail
            Constraint::Length(1), // footer
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);
    render_sessions(frame, app, chunks[1]);
    render_detail(frame, app, chunks[2]);
    render_footer(frame, app, chunks[3]);
}

fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let title = format!(
        " ccmeter - plan: {} - sort: {}{} ",
        app.plan_name(),
        app.sort.label(),
        if app.paused { " [PAUSED]" } else { "" }
    );
    let block = Block::default()
        .borders(Borders::ALL)
        .title(title)
        .border_style(Style::default().fg(theme::HEADER));

    match app.active_session() {
        Some(active) => {
            let now = app.now_unix();
            let elapsed = (now - active.start_time).max(0);
            let ratio = (elapsed as f64 / (active.end_time - active.start_time) as f64)
                .clamp(0.0, 1.0);
            let label = format!(
                "{} -> {}  {} used  burn {:.0}%  resets in {}",
                theme::format_clock(active.start_time),
                theme::format_clock(active.end_time),
                theme::format_tokens(active.totals.total_tokens),
                active.metrics.burn_rate * 100.0,
                theme::format_duration((active.end_time - now).max(0)),
            );
            let gauge = Gauge::default()
                .block(block)
                .gauge_style(Style::default().fg(theme::burn_color(active.metrics.burn_rate)))
                .ratio(ratio)
                .label(label);
            frame.render_widget(gauge, area);
        }
        None => {
            let paragraph = Paragraph::new("no active window")
                .style(Style::default().fg(theme::DIM))
                .block(block);
            frame.render_widget(paragraph, area);
        }
    }
}

fn render_sessions(frame: &mut Frame, app: &App, area: Rect) {
    let header = Row::new(vec![
        "window", "source", "tokens", "msgs", "cost", "tok/min", "burn", "state",
    ])
    .style(Style::default().fg(theme::HEADER).add_modifier(Modifier::BOLD));

    let rows: Vec<Row> = app
        .sessions
        .iter()
        .enumerate()
        .map(|(i, session)| {
            let state = if session.is_limit_reached {
                Cell::from("LIMIT").style(Style::default().fg(theme::LIMIT))
            } else if session.is_active {
                Cell::from("ACTIVE").style(Style::default().fg(theme::ACTIVE))
            } else {
                Cell::from("done").style(Style::default().fg(theme::DIM))
            };

            let row = Row::new(vec![
                Cell::from(format!(
                    "{} - {}",
                    theme::format_clock(session.start_time),
                    theme::format_clock(session.end_time)
                )),
                Cell::from(session.window.source.as_str()),
                Cell::from(theme::format_tokens(session.totals.total_tokens)),
                Cell::from(session.totals.message_count.to_string()),
                Cell::from(format!("${:.2}", session.totals.total_cost)),
                Cell::from(format!("{:.0}", session.metrics.tokens_per_minute)),
                Cell::from(format!("{:.0}%", session.metrics.burn_rate * 100.0))
                    .style(Style::default().fg(theme::burn_color(session.metrics.burn_rate))),
                state,
            ]);

            if i == app.selected {
                row.style(Style::default().add_modifier(Modifier::REVERSED))
            } else {
                row
            }
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(14),
            Constraint::Length(19),
            Constraint::Length(9),
            Constraint::Length(6),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Length(6),
            Constraint::Min(6),
        ],
    )
    .header(header)
    .block(Block::default().borders(Borders::ALL).title(format!(
        " sessions ({}) ",
        app.sessions.len()
    )));

    frame.render_widget(table, area);
}

fn render_detail(frame: &mut Frame, app: &App, area: Rect) {
    let text = match app.selected_session() {
        Some(session) => {
            let projects = {
                let mut names: Vec<&str> =
                    session.projects.keys().map(String::as_str).collect();
                names.sort_unstable();
                names.join(", ")
            };
            let projection = session
                .projection
                .map(|p| {
                    format!(
                        "depletes ~{} ({} tokens, ${:.2})",
                        theme::format_clock(p.predicted_end_time),
                        theme::format_tokens(p.projected_tokens),
                        p.projected_cost
                    )
                })
                .unwrap_or_else(|| "no projection".to_string());
            format!("projects: {projects}\n{projection}")
        }
        None => "no sessions detected yet".to_string(),
    };

    let paragraph = Paragraph::new(text).block(Block::default().borders(Borders::ALL));
    frame.render_widget(paragraph, area);
}

fn render_footer(frame: &mut Frame, app: &App, area: Rect) {
    let line = Line::from(vec![
        Span::styled(
            " q quit  p pause  s sort  j/k move ",
            Style::default().fg(theme::DIM),
        ),
        Span::raw("  "),
        Span::styled(app.status.as_str(), Style::default().fg(theme::HEADER)),
    ]);
    frame.render_widget(Paragraph::new(line), area);
}
