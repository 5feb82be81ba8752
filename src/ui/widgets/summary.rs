// src/ui/widgets/summary.rs

use crate::app::{App, AppState};
use crate::core::models::TaskStatus;
use ratatui::{
    prelude::*,
    text::Line,
    widgets::{Block, Borders, Gauge, Paragraph, Wrap},
};

/// Renders the right-hand summary: execution status, counts, issues and technologies.
///
/// While a scan runs only the status block is filled; the rest appears once
/// the report is loaded.
pub fn render_summary(frame: &mut Frame, app: &App, area: Rect) {
    let summary_container = Block::default().borders(Borders::ALL).title("Summary");
    frame.render_widget(summary_container, area);

    let summary_chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3), // Status
            Constraint::Length(1), // Value score gauge
            Constraint::Length(1),
            Constraint::Length(5), // Inventory
            Constraint::Length(1),
            Constraint::Length(5), // Issues
            Constraint::Length(1),
            Constraint::Min(0), // Technologies and ports
        ])
        .split(area);

    let Some(execution) = &app.execution else {
        return;
    };

    let status_style = match execution.status {
        TaskStatus::Running => Style::default().fg(Color::Cyan),
        TaskStatus::Completed => Style::default().fg(Color::Green),
        TaskStatus::Failed => Style::default().fg(Color::Red),
    };
    let elapsed = execution.duration.map(|d| format!(" in {d}s")).unwrap_or_default();
    let status_text = Text::from(vec![
        Line::from("Execution".bold()),
        Line::from(format!("{}{elapsed}", execution.status)).style(status_style),
    ]);
    frame.render_widget(Paragraph::new(status_text).alignment(Alignment::Center), summary_chunks[0]);

    if !matches!(app.state, AppState::Finished) {
        return;
    }
    let Some(report) = &app.scan_report else {
        return;
    };

    let score = report.assets.iter().map(|a| a.asset.value_proposition_score).max().unwrap_or(0);
    let score_gauge = Gauge::default()
        .percent(u16::from(score.min(100)))
        .label(format!("value {score}/100"))
        .style(Style::default().fg(if score >= 50 { Color::Green } else { Color::Yellow }));
    frame.render_widget(score_gauge, summary_chunks[1]);

    let inventory = Text::from(vec![
        Line::from(format!("Assets:        {}", app.summary.assets)),
        Line::from(format!("Pages:         {}", app.summary.pages)),
        Line::from(format!("API calls:     {}", app.summary.api_endpoints)),
        Line::from(format!("External links: {}", app.summary.associations)),
    ]);
    frame.render_widget(
        Paragraph::new(inventory).block(Block::default().title("INVENTORY".bold())),
        summary_chunks[3],
    );

    let issues = Text::from(vec![
        Line::from(vec![Span::raw("Critical: "), Span::styled(app.summary.critical_issues.to_string(), Style::default().fg(Color::Red))]),
        Line::from(vec![Span::raw("High:     "), Span::styled(app.summary.high_issues.to_string(), Style::default().fg(Color::Red))]),
        Line::from(vec![Span::raw("Medium:   "), Span::styled(app.summary.medium_issues.to_string(), Style::default().fg(Color::Yellow))]),
        Line::from(vec![Span::raw("Low:      "), Span::styled(app.summary.low_issues.to_string(), Style::default().fg(Color::Cyan))]),
    ]);
    frame.render_widget(Paragraph::new(issues).block(Block::default().title("ISSUES FOUND".bold())), summary_chunks[5]);

    let mut tech_lines = Vec::new();
    if app.summary.technologies.is_empty() {
        tech_lines.push(Line::from("Not identified."));
    }
    for tech in &app.summary.technologies {
        tech_lines.push(Line::from(vec![Span::raw("- "), Span::styled(tech.clone(), Style::default().fg(Color::Cyan))]));
    }
    if !app.summary.open_ports.is_empty() {
        tech_lines.push(Line::from(""));
        tech_lines.push(Line::from("OPEN PORTS".bold()));
        tech_lines.extend(app.summary.open_ports.iter().map(|p| Line::from(p.clone())));
    }
    frame.render_widget(
        Paragraph::new(tech_lines).wrap(Wrap { trim: false }).block(Block::default().title("TECHNOLOGIES".bold())),
        summary_chunks[7],
    );
}
