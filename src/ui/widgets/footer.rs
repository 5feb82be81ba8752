// src/ui/widgets/footer.rs

use crate::app::{App, AppState, ExportStatus};
use ratatui::{
    prelude::*,
    style::{Color, Style, Stylize},
    text::{Line, Span},
    widgets::Paragraph,
};

fn key(label: &str) -> Span<'_> {
    Span::styled(label, Style::new().bold().fg(Color::Yellow))
}

/// Renders the footer widget, which displays available actions.
pub fn render_footer(frame: &mut Frame, app: &App, area: Rect) {
    let line = match app.state {
        AppState::Disclaimer => Line::from(vec![Span::raw("Press "), key("Enter"), Span::raw(" to continue.")]),
        AppState::Idle => match &app.error {
            Some(error) => Line::from(Span::styled(error.clone(), Style::new().fg(Color::Red))),
            None => Line::from(vec![
                key("Enter"),
                Span::raw(" scan, "),
                key("Tab"),
                Span::raw(" crawl depth, "),
                key("Esc"),
                Span::raw(" quit."),
            ]),
        },
        AppState::Finished => {
            let mut spans = vec![
                key("[N]"),
                Span::raw("ew scan, "),
                key("[E]"),
                Span::raw("xport, "),
                key("[Q]"),
                Span::raw("uit"),
            ];
            match &app.export_status {
                ExportStatus::Idle => {}
                ExportStatus::Success(path) => {
                    spans.push(Span::styled(format!("  Saved to {path}"), Style::new().fg(Color::Green)))
                }
                ExportStatus::Error(e) => {
                    spans.push(Span::styled(format!("  Export failed: {e}"), Style::new().fg(Color::Red)))
                }
            }
            Line::from(spans)
        }
        AppState::Scanning => Line::from("Scanning... Press Q to quit."),
    };

    let footer = Paragraph::new(line).alignment(Alignment::Center);
    frame.render_widget(footer, area);
}
