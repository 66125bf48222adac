//! Terminal dashboard for devpulse

mod app;
mod ui;

pub use app::{App, DeviceEntry, View};

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use devpulse_core::config::DashboardSettings;
use devpulse_core::{CommandRequest, SnapshotQuery, SummaryQuery};
use devpulse_sdk::MetricsClient;
use ratatui::prelude::*;
use std::io;
use std::time::{Duration, Instant};
use tracing::debug;

/// Run the dashboard until the user quits
pub async fn run(client: &MetricsClient, settings: &DashboardSettings) -> anyhow::Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(settings.history_limit);

    let res = run_app(&mut terminal, &mut app, client, settings.refresh_interval()).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    res
}

async fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    client: &MetricsClient,
    refresh_every: Duration,
) -> anyhow::Result<()> {
    let mut last_refresh: Option<Instant> = None;

    loop {
        if last_refresh.map_or(true, |t| t.elapsed() >= refresh_every) {
            refresh(app, client).await;
            last_refresh = Some(Instant::now());
        }

        terminal.draw(|f| ui::draw(f, app))?;

        // Poll for key presses with timeout
        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }

                if app.input.is_some() {
                    match key.code {
                        KeyCode::Enter => {
                            if let Some((device_id, app_name)) = app.take_restart_request() {
                                queue_restart(app, client, device_id, &app_name).await;
                            }
                        }
                        KeyCode::Esc => app.cancel_prompt(),
                        KeyCode::Backspace => app.pop_input(),
                        KeyCode::Char(c) => app.push_input(c),
                        _ => {}
                    }
                    continue;
                }

                match key.code {
                    KeyCode::Char('q') => return Ok(()),
                    KeyCode::Char('c') => app.set_view(View::Charts),
                    KeyCode::Char('s') => app.set_view(View::Snapshots),
                    KeyCode::Char('r') => app.begin_restart_prompt(),
                    KeyCode::Left | KeyCode::Char('h') => {
                        app.select_previous();
                        last_refresh = None;
                    }
                    KeyCode::Right | KeyCode::Char('l') => {
                        app.select_next();
                        last_refresh = None;
                    }
                    KeyCode::Up | KeyCode::Char('k') => app.scroll_up(),
                    KeyCode::Down | KeyCode::Char('j') => app.scroll_down(),
                    _ => {}
                }
            }
        }
    }
}

/// Reload the device list and the selected device's history
async fn refresh(app: &mut App, client: &MetricsClient) {
    let summaries = client
        .snapshot_summaries(&SummaryQuery {
            device_id: None,
            limit: app.history_limit,
        })
        .await;

    match summaries {
        Ok(summaries) => app.set_devices(&summaries),
        Err(e) => {
            app.set_error(format!("Refresh failed: {}", e));
            return;
        }
    }

    let Some(device_id) = app.selected_device().map(|d| d.id) else {
        return;
    };

    let query = SnapshotQuery::new()
        .device(device_id)
        .limit(app.history_limit);
    match client.fetch_snapshots(&query).await {
        Ok(history) => {
            debug!("Loaded {} snapshots for device {}", history.len(), device_id);
            app.set_history(history);
        }
        Err(e) => app.set_error(format!("Refresh failed: {}", e)),
    }
}

async fn queue_restart(app: &mut App, client: &MetricsClient, device_id: i64, app_name: &str) {
    let request = CommandRequest::restart_app(app_name, false);
    match client.send_command(device_id, &request).await {
        Ok(command) => app.set_status(format!(
            "Queued restart of {} (command {})",
            app_name, command.command_id
        )),
        Err(e) => app.set_error(format!("Restart failed: {}", e)),
    }
}
