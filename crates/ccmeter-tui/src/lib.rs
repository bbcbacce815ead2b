//! ccmeter-tui - "top"-style live view for ccmeter
//!
//! Owns the terminal in alternate-screen mode and renders the published
//! session slice, refreshing as the monitor loop pushes new data.

pub mod app;
pub mod theme;
pub mod ui;

pub use app::App;

use anyhow::Result;
use ccmeter_core::Monitor;
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;
use std::io;
use std::sync::Arc;
use tokio::sync::watch;

/// Run the live view until the user quits.
pub async fn run(monitor: Arc<Monitor>) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Background orchestration loop
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_handle = tokio::spawn(Arc::clone(&monitor).run(shutdown_rx));

    let mut app = App::new(Arc::clone(&monitor));
    let result = run_loop(&mut terminal, &mut app).await;

    // Restore terminal (symmetric with setup)
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    // Drain the monitor loop; it flushes caches on the way out
    let _ = shutdown_tx.send(true);
    let _ = loop_handle.await;
    tracing::debug!("Live view exited");

    result
}

async fn run_loop<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()>
where
    <B as Backend>::Error: Send + Sync + 'static,
{
    let tick = app.ui_refresh_rate();

    loop {
        app.poll_events();
        terminal.draw(|f| ui::render(f, app))?;

        if event::poll(tick)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key(key.code, key.modifiers);
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}
