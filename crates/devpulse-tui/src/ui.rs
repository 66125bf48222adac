//! Dashboard rendering

use crate::app::{time_bounds, value_bounds, App, View};
use ratatui::symbols::Marker;
use ratatui::{prelude::*, widgets::*};

pub fn draw(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Main content
            Constraint::Length(3), // Footer
        ])
        .split(frame.area());

    draw_header(frame, chunks[0], app);

    match app.view {
        View::Charts => draw_charts(frame, chunks[1], app),
        View::Snapshots => draw_snapshots(frame, chunks[1], app),
    }

    draw_footer(frame, chunks[2], app);
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let device = app
        .selected_device()
        .map(|d| format!("{} (#{})", d.name, d.id))
        .unwrap_or_else(|| "no devices".to_string());

    let mut spans = vec![
        Span::styled(" devpulse ", Style::default().fg(Color::Black).bg(Color::Cyan)),
        Span::raw(" "),
        Span::styled(device, Style::default().fg(Color::White).bold()),
    ];

    if let Some(latest) = app.latest() {
        if let Some(system) = latest.system_metrics() {
            spans.push(value_span("RAM", format!("{:.1}%", system.ram_usage_percent)));
            spans.push(value_span("Threads", system.thread_count.to_string()));
        }
        if let Some(crypto) = latest.crypto_metrics() {
            spans.push(value_span("BTC", price(crypto.bitcoin_price_usd)));
            spans.push(value_span("ETH", price(crypto.ethereum_price_usd)));
        }
        spans.push(Span::styled(
            format!("  at {}", latest.timestamp().format("%H:%M:%S")),
            Style::default().fg(Color::DarkGray),
        ));
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    frame.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}

fn value_span(label: &str, value: String) -> Span<'static> {
    Span::styled(
        format!("  {} {}", label, value),
        Style::default().fg(Color::Yellow),
    )
}

fn price(value: Option<f64>) -> String {
    value
        .map(|v| format!("${:.2}", v))
        .unwrap_or_else(|| "n/a".to_string())
}

fn draw_charts(frame: &mut Frame, area: Rect, app: &App) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);
    let top = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(rows[0]);
    let bottom = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(rows[1]);

    draw_chart(frame, top[0], " RAM Usage % ", &app.ram_series(), Color::Cyan);
    draw_chart(frame, top[1], " Threads ", &app.thread_series(), Color::Magenta);
    draw_chart(frame, bottom[0], " BTC (USD) ", &app.bitcoin_series(), Color::Yellow);
    draw_chart(frame, bottom[1], " ETH (USD) ", &app.ethereum_series(), Color::Green);
}

fn draw_chart(frame: &mut Frame, area: Rect, title: &str, series: &[(f64, f64)], color: Color) {
    let block = Block::default().title(title).borders(Borders::ALL);

    if series.is_empty() {
        let paragraph = Paragraph::new("No data")
            .block(block)
            .style(Style::default().fg(Color::Gray));
        frame.render_widget(paragraph, area);
        return;
    }

    let x = time_bounds(series);
    let y = value_bounds(series);

    let dataset = Dataset::default()
        .marker(Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(series);

    let chart = Chart::new(vec![dataset])
        .block(block)
        .x_axis(
            Axis::default()
                .style(Style::default().fg(Color::DarkGray))
                .bounds(x)
                .labels(vec![
                    Span::raw("0s"),
                    Span::raw(format!("{:.0}s", x[1])),
                ]),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::DarkGray))
                .bounds(y)
                .labels(vec![
                    Span::raw(format!("{:.1}", y[0])),
                    Span::raw(format!("{:.1}", y[1])),
                ]),
        );

    frame.render_widget(chart, area);
}

fn draw_snapshots(frame: &mut Frame, area: Rect, app: &App) {
    let header = Row::new(vec!["Time", "RAM %", "Threads", "BTC", "ETH", "Id"])
        .style(Style::default().fg(Color::Yellow));

    let rows: Vec<Row> = app
        .history
        .iter()
        .skip(app.scroll)
        .map(|snapshot| {
            let system = snapshot.system_metrics();
            let crypto = snapshot.crypto_metrics();
            Row::new(vec![
                snapshot.timestamp().format("%Y-%m-%d %H:%M:%S").to_string(),
                system
                    .map(|m| format!("{:.1}", m.ram_usage_percent))
                    .unwrap_or_default(),
                system
                    .map(|m| m.thread_count.to_string())
                    .unwrap_or_default(),
                crypto
                    .map(|m| price(m.bitcoin_price_usd))
                    .unwrap_or_default(),
                crypto
                    .map(|m| price(m.ethereum_price_usd))
                    .unwrap_or_default(),
                snapshot
                    .snapshot_id()
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
            ])
        })
        .collect();

    let widths = [
        Constraint::Length(20),
        Constraint::Length(8),
        Constraint::Length(8),
        Constraint::Length(14),
        Constraint::Length(12),
        Constraint::Min(6),
    ];

    let title = format!(" Snapshots ({}) ", app.history.len());
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().title(title).borders(Borders::ALL));

    frame.render_widget(table, area);
}

fn draw_footer(frame: &mut Frame, area: Rect, app: &App) {
    let line = if let Some(input) = &app.input {
        Line::from(vec![
            Span::styled("Restart app: ", Style::default().fg(Color::Yellow)),
            Span::raw(input.clone()),
            Span::styled("_", Style::default().fg(Color::Gray)),
            Span::styled(
                "   [Enter] queue  [Esc] cancel",
                Style::default().fg(Color::DarkGray),
            ),
        ])
    } else {
        let keys = [
            ("c", "Charts", app.view == View::Charts),
            ("s", "Snapshots", app.view == View::Snapshots),
            ("←/→", "Device", false),
            ("r", "Restart app", false),
            ("q", "Quit", false),
        ];

        let mut spans: Vec<Span> = keys
            .iter()
            .flat_map(|(key, name, active)| {
                let style = if *active {
                    Style::default().fg(Color::Black).bg(Color::Cyan)
                } else {
                    Style::default().fg(Color::Gray)
                };
                vec![
                    Span::styled(format!("[{}]", key), Style::default().fg(Color::Yellow)),
                    Span::styled(format!(" {} ", name), style),
                    Span::raw("  "),
                ]
            })
            .collect();

        if let Some(status) = &app.status {
            let color = if status.is_error {
                Color::Red
            } else {
                Color::Green
            };
            spans.push(Span::styled(
                status.message.clone(),
                Style::default().fg(color),
            ));
        }

        Line::from(spans)
    };

    let paragraph = Paragraph::new(line).block(Block::default().borders(Borders::ALL));
    frame.render_widget(paragraph, area);
}
