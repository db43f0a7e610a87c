//! Widgets for the confirmed write control: trigger, confirm and wait dialogs

use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame,
};

use super::{accent, bg_selected, danger, success, text, text_dim, warning};
use crate::write::{ConfirmedWrite, Variant};

/// Total columns in the button grid
const GRID_COLUMNS: u32 = 12;

/// Split a row into (padding, trigger) areas following the control's layout
pub fn grid_cell(area: Rect, pad: Option<u16>, width: u16) -> Rect {
    let pad = u32::from(pad.unwrap_or(0)).min(GRID_COLUMNS);
    let width = u32::from(width).min(GRID_COLUMNS - pad).max(1);
    let rest = GRID_COLUMNS.saturating_sub(pad + width);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Ratio(pad, GRID_COLUMNS),
            Constraint::Ratio(width, GRID_COLUMNS),
            Constraint::Ratio(rest, GRID_COLUMNS),
        ])
        .split(area)[1]
}

/// Draw a trigger button
pub fn draw_trigger<C>(f: &mut Frame, control: &ConfirmedWrite<C>, area: Rect, focused: bool) {
    let color = if control.is_disabled() {
        text_dim()
    } else if control.is_destructive() {
        danger()
    } else {
        accent()
    };

    let mut style = Style::default().fg(color);
    if focused {
        style = style.bg(bg_selected()).add_modifier(Modifier::BOLD);
    }

    let label = Span::styled(control.label().to_string(), style);
    let widget = match control.style() {
        Variant::Outlined => Paragraph::new(Line::from(label)).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(color)),
        ),
        Variant::Contained => Paragraph::new(Line::from(label))
            .style(Style::default().bg(if focused { color } else { bg_selected() })),
        Variant::Text => Paragraph::new(Line::from(label)),
    };

    f.render_widget(widget.alignment(Alignment::Center), area);
}

/// The "Confirm?" dialog
pub fn draw_confirm_dialog<C>(f: &mut Frame, control: &ConfirmedWrite<C>) {
    let popup_area = centered_rect(50, 25, f.area());
    f.render_widget(Clear, popup_area);

    let confirm = Paragraph::new(vec![
        Line::from(""),
        Line::from(Span::styled(control.prompt_text(), Style::default().fg(text()))),
        Line::from(""),
        Line::from(vec![
            Span::styled("  y", Style::default().fg(success()).add_modifier(Modifier::BOLD)),
            Span::raw(" OK   "),
            Span::styled("n", Style::default().fg(danger()).add_modifier(Modifier::BOLD)),
            Span::raw(" Cancel"),
        ]),
    ])
    .wrap(Wrap { trim: true })
    .block(
        Block::default()
            .title(Span::styled(
                format!(" {}: Confirm? ", control.label()),
                Style::default().fg(warning()),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(warning())),
    )
    .alignment(Alignment::Center);

    f.render_widget(confirm, popup_area);
}

/// The blocking "Please wait" dialog
pub fn draw_wait_dialog(f: &mut Frame) {
    let popup_area = centered_rect(30, 15, f.area());
    f.render_widget(Clear, popup_area);

    let wait = Paragraph::new(vec![
        Line::from(""),
        Line::from(Span::styled("Writing data.", Style::default().fg(text()))),
    ])
    .block(
        Block::default()
            .title(Span::styled(" Please wait ", Style::default().fg(accent())))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(accent())),
    )
    .alignment(Alignment::Center);

    f.render_widget(wait, popup_area);
}

pub fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
