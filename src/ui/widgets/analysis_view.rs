// src/ui/widgets/analysis_view.rs

use crate::app::{App, AppState, SPINNER_CHARS};
use crate::core::knowledge_base::{self, FindingCategory};
use crate::core::models::Severity;
use ratatui::{
    prelude::*,
    text::Line,
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
};

fn severity_style(severity: Severity) -> Style {
    match severity {
        Severity::Critical => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        Severity::High => Style::default().fg(Color::Red),
        Severity::Medium => Style::default().fg(Color::Yellow),
        Severity::Low => Style::default().fg(Color::Cyan),
    }
}

pub fn render_analysis_view(frame: &mut Frame, app: &mut App, area: Rect) {
    let main_block = Block::default().borders(Borders::ALL).title("Findings (Navigate with ↑ ↓)");

    if !matches!(app.state, AppState::Finished) {
        let content = match app.state {
            AppState::Scanning => {
                let spinner_char = SPINNER_CHARS[app.spinner_frame];
                Paragraph::new(vec![
                    Line::from(vec![
                        Span::styled(format!("{spinner_char} "), Style::default().fg(Color::Cyan)),
                        Span::raw("Scanning... Please wait."),
                    ]),
                    Line::from(""),
                    Line::from(Span::styled(app.stage().to_string(), Style::default().fg(Color::DarkGray))),
                ])
                .alignment(Alignment::Center)
                .wrap(Wrap { trim: true })
            }
            _ => Paragraph::new("Scan results will appear here...").alignment(Alignment::Center),
        };
        frame.render_widget(content.block(main_block), area);
        return;
    }

    let inner_area = main_block.inner(area);
    frame.render_widget(main_block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(45), Constraint::Min(0)])
        .split(inner_area);

    let items: Vec<ListItem> = app
        .findings
        .iter()
        .map(|finding| {
            let detail = knowledge_base::get_finding_detail(&finding.kind);
            let prefix = detail.map(|d| format!("[{}] ", d.category)).unwrap_or_default();
            let title = detail.map(|d| d.title).unwrap_or(finding.kind.as_str());
            ListItem::new(Line::from(vec![
                Span::styled(format!("{:<8} ", finding.severity.to_string()), severity_style(finding.severity)),
                Span::styled(prefix, Style::default().fg(Color::DarkGray)),
                Span::raw(title.to_string()),
                Span::styled(format!("  {}", finding.url), Style::default().fg(Color::DarkGray)),
            ]))
        })
        .collect();

    let findings_list = List::new(items)
        .block(Block::default())
        .highlight_style(Style::new().bg(Color::DarkGray).add_modifier(Modifier::BOLD));
    frame.render_stateful_widget(findings_list, chunks[0], &mut app.findings_state);

    let detail_block = Block::default().borders(Borders::TOP).title("Details");
    let Some(finding) = app.selected_finding() else {
        render_placeholder_details(frame, app, detail_block, chunks[1]);
        return;
    };

    let mut text = vec![
        Line::from(vec!["URL: ".bold(), Span::raw(finding.url.clone())]),
        Line::from(finding.description.clone()),
        Line::from(""),
    ];
    match knowledge_base::get_finding_detail(&finding.kind) {
        Some(detail) => {
            text.push(Line::from("WHAT IT IS:".yellow().bold()));
            text.push(Line::from(detail.description));
            text.push(Line::from(""));
            text.push(Line::from("HOW TO FIX:".yellow().bold()));
            text.push(Line::from(detail.remediation));
            if detail.category == FindingCategory::Exposure {
                text.push(Line::from(""));
                text.push(Line::from("Heuristic match on the link URL and text; confirm manually.".italic()));
            }
        }
        None => text.push(Line::from("No further guidance for this finding.".italic())),
    }
    let p = Paragraph::new(text).wrap(Wrap { trim: true }).block(detail_block);
    frame.render_widget(p, chunks[1]);
}

fn render_placeholder_details(frame: &mut Frame, app: &App, block: Block, area: Rect) {
    let placeholder_text = if app.findings.is_empty() {
        Text::from(vec![
            Line::from(""),
            Line::from("✓ NOTHING FLAGGED".bold().fg(Color::Green)),
            Line::from(""),
            Line::from(format!("{} pages crawled without a single finding.", app.summary.pages)),
        ])
    } else {
        Text::from("Select an item above to see details.")
    };

    let p = Paragraph::new(placeholder_text).alignment(Alignment::Center).block(block);
    frame.render_widget(p, area);
}
