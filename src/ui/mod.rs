mod components;

use std::sync::OnceLock;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Row, Table, Wrap},
    Frame,
};

use crate::app::{App, Button, ConstantCard, Popup, Slot, EDIT_WIDTH};
use crate::config::Page;
use crate::kit;
use crate::theme::Theme;

use components::{centered_rect, draw_confirm_dialog, draw_trigger, draw_wait_dialog, grid_cell};

static THEME: OnceLock<Theme> = OnceLock::new();

/// Install the theme before the first draw (later calls are ignored)
pub fn init_theme(theme: Theme) {
    let _ = THEME.set(theme);
}

fn theme() -> &'static Theme {
    THEME.get_or_init(Theme::default)
}

fn accent() -> Color { theme().accent }
fn inactive() -> Color { theme().inactive }
fn success() -> Color { theme().success }
fn warning() -> Color { theme().warning }
fn danger() -> Color { theme().danger }
fn text() -> Color { theme().text }
fn text_dim() -> Color { theme().text_dim }
fn bg_selected() -> Color { theme().bg_selected }
fn header() -> Color { theme().header }

pub fn draw(f: &mut Frame, app: &App) {
    let area = f.area();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Info line
            Constraint::Min(6),    // Page
            Constraint::Length(1), // Footer
        ])
        .split(area);

    draw_info_line(f, app, chunks[0]);
    match app.page {
        Page::Constants => draw_constants_page(f, app, chunks[1]),
        Page::Kit => draw_kit_page(f, app, chunks[1]),
    }
    draw_footer(f, app, chunks[2]);

    if app.popup == Popup::Help {
        draw_help_popup(f);
    }

    // Write dialogs go on top of everything
    if let Some(control) = app.active_control() {
        let state = control.state();
        if state.confirm_visible() {
            draw_confirm_dialog(f, control);
        } else if state.wait_visible() {
            draw_wait_dialog(f);
        }
    }
}

fn draw_info_line(f: &mut Frame, app: &App, area: Rect) {
    // Priority: status message > error > server
    let line = if let Some(ref status) = app.status_message {
        Line::from(Span::styled(status, Style::default().fg(warning())))
    } else if let Some(ref error) = app.error_message {
        Line::from(vec![
            Span::styled("Error: ", Style::default().fg(danger()).add_modifier(Modifier::BOLD)),
            Span::styled(error, Style::default().fg(danger())),
        ])
    } else {
        Line::from(vec![
            Span::styled("ch2 ", Style::default().fg(accent())),
            Span::styled(app.server(), Style::default().fg(text_dim())),
        ])
    };

    f.render_widget(Paragraph::new(line).alignment(Alignment::Center), area);
}

fn titled_block(title: &str, focused: bool) -> Block<'static> {
    let color = if focused { accent() } else { inactive() };
    let mut title_style = Style::default().fg(color);
    if focused {
        title_style = title_style.add_modifier(Modifier::BOLD);
    }
    Block::default()
        .title(Span::styled(format!(" {} ", title), title_style))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color))
}

fn draw_loading(f: &mut Frame, area: Rect, title: &str) {
    let loading = Paragraph::new(Line::from(Span::styled("Loading...", Style::default().fg(text_dim()))))
        .alignment(Alignment::Center)
        .block(titled_block(title, false));
    f.render_widget(loading, area);
}

fn draw_constants_page(f: &mut Frame, app: &App, area: Rect) {
    let Some(cards) = app.cards.as_ref() else {
        draw_loading(f, area, "Edit Constants");
        return;
    };

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
        .split(area);

    draw_constants_list(f, app, cards, chunks[0]);

    match cards.get(app.selected_card) {
        Some(card) => draw_constant_card(f, app, card, chunks[1]),
        None => {
            let intro = Paragraph::new(vec![
                Line::from("Constants are user-defined values that modify processing."),
                Line::from(""),
                Line::from("No constants were returned by the server."),
            ])
            .wrap(Wrap { trim: true })
            .style(Style::default().fg(text_dim()))
            .block(titled_block("Introduction", false));
            f.render_widget(intro, chunks[1]);
        }
    }
}

fn draw_constants_list(f: &mut Frame, app: &App, cards: &[ConstantCard], area: Rect) {
    let rows: Vec<Row> = cards
        .iter()
        .enumerate()
        .map(|(i, card)| {
            let (marker, marker_color) = if card.modified() { ("*", warning()) } else { (" ", text_dim()) };
            let kind = if card.edited.single { "" } else { " (dated)" };
            let row_style = if i == app.selected_card {
                Style::default().bg(bg_selected()).fg(text())
            } else {
                Style::default()
            };
            Row::new(vec![
                Span::styled(marker, Style::default().fg(marker_color)),
                Span::styled(format!("{}{}", card.edited.name, kind), Style::default().fg(text())),
            ])
            .style(row_style)
        })
        .collect();

    let table = Table::new(rows, [Constraint::Length(2), Constraint::Min(10)])
        .block(titled_block("Constants", true));
    f.render_widget(table, area);
}

fn slot_label(card: &ConstantCard, slot: &Slot) -> String {
    match slot {
        Slot::Value { field: Some(name), .. } | Slot::ExtraValue { field: Some(name) } => name.clone(),
        Slot::Value { entry, .. } if !card.edited.single => format!("Value {}", entry + 1),
        Slot::Value { .. } | Slot::ExtraValue { .. } => "Value".to_string(),
        Slot::Time { .. } | Slot::ExtraTime => "Time".to_string(),
        Slot::Button(_) => String::new(),
    }
}

fn slot_rows<'a>(app: &'a App, card: &ConstantCard, slots: &[(usize, Slot)]) -> Vec<Row<'a>> {
    slots
        .iter()
        .map(|(index, slot)| {
            let selected = *index == app.selected_slot;
            let value = if selected && app.editing {
                format!("{}▏", app.input_buffer)
            } else {
                card.slot_text(slot)
            };
            let style = if selected {
                Style::default().bg(bg_selected()).fg(text())
            } else {
                Style::default()
            };
            Row::new(vec![
                Span::styled(slot_label(card, slot), Style::default().fg(header())),
                Span::styled(value, Style::default().fg(if selected && app.editing { accent() } else { text() })),
            ])
            .style(style)
        })
        .collect()
}

fn draw_constant_card(f: &mut Frame, app: &App, card: &ConstantCard, area: Rect) {
    let block = titled_block(&card.edited.name, true);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let slots: Vec<(usize, Slot)> = card.slots().into_iter().enumerate().collect();
    let (values, extra): (Vec<_>, Vec<_>) = slots
        .iter()
        .filter(|(_, s)| !matches!(s, Slot::Button(_)))
        .cloned()
        .partition(|(_, s)| matches!(s, Slot::Value { .. } | Slot::Time { .. }));

    let mut constraints = vec![
        Constraint::Length(3),          // Description
        Constraint::Min(2),             // Values
        Constraint::Length(3),          // Delete / Save
    ];
    if card.extra.is_some() {
        constraints.push(Constraint::Length(extra.len() as u16 + 3)); // New value + Add
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(inner);

    let description = Paragraph::new(card.edited.plain_description())
        .wrap(Wrap { trim: true })
        .style(Style::default().fg(text_dim()));
    f.render_widget(description, chunks[0]);

    let widths = [Constraint::Length(16), Constraint::Min(10)];
    f.render_widget(Table::new(slot_rows(app, card, &values), widths), chunks[1]);

    let focused_button = |button: Button| {
        slots
            .iter()
            .any(|(i, s)| *i == app.selected_slot && *s == Slot::Button(button))
    };

    let (_, width) = card.delete.layout();
    draw_trigger(f, &card.delete, grid_cell(chunks[2], None, width), focused_button(Button::Delete));
    let (_, width) = card.save.layout();
    draw_trigger(f, &card.save, grid_cell(chunks[2], Some(width), width), focused_button(Button::Save));

    if let Some(add) = &card.add {
        let area = chunks[3];
        let new_value = grid_cell(area, None, EDIT_WIDTH);
        let rows = slot_rows(app, card, &extra);
        let table = Table::new(rows, widths).block(
            Block::default()
                .title(Span::styled(" New value ", Style::default().fg(header())))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(inactive())),
        );
        f.render_widget(table, new_value);

        let (pad, width) = add.layout();
        let button_area = grid_cell(area, pad, width);
        let button_area = Rect { height: button_area.height.min(3), ..button_area };
        draw_trigger(f, add, button_area, focused_button(Button::Add));
    }
}

fn draw_kit_page(f: &mut Frame, app: &App, area: Rect) {
    let Some(lines) = app.kit_lines.as_ref() else {
        draw_loading(f, area, "Kit Statistics");
        return;
    };

    let text: Vec<Line> = if lines.is_empty() {
        vec![Line::from(Span::styled("No kit statistics", Style::default().fg(text_dim())))]
    } else {
        lines
            .iter()
            .skip(app.kit_scroll)
            .map(|line| match line {
                kit::Line::Heading(s) => Line::from(Span::styled(
                    s.clone(),
                    Style::default().fg(accent()).add_modifier(Modifier::BOLD),
                )),
                kit::Line::Subheading(s) => Line::from(Span::styled(
                    format!("  {}", s),
                    Style::default().fg(header()),
                )),
                kit::Line::Age(s) => Line::from(Span::styled(format!("    {}", s), Style::default().fg(success()))),
                kit::Line::Statistic(s) => Line::from(Span::styled(format!("    {}", s), Style::default().fg(text()))),
                kit::Line::Blank => Line::from(""),
            })
            .collect()
    };

    let page = Paragraph::new(text).block(titled_block("Kit Statistics", true));
    f.render_widget(page, area);
}

fn draw_footer(f: &mut Frame, app: &App, area: Rect) {
    let hints: Vec<(&str, &str)> = if app.editing {
        vec![("Enter", "Keep"), ("Esc", "Discard")]
    } else {
        match app.page {
            Page::Constants => vec![
                ("↑↓", "Constant"),
                ("←→", "Field"),
                ("Enter", "Edit/Press"),
                ("u", "Undo"),
                ("r", "Reload"),
                ("Tab", "Kit"),
                ("?", "Help"),
            ],
            Page::Kit => vec![
                ("↑↓", "Scroll"),
                ("PgUp/PgDn", "Page"),
                ("r", "Reload"),
                ("Tab", "Constants"),
                ("?", "Help"),
            ],
        }
    };

    // Responsive: show fewer hints on narrow terminals
    let max_hints = if area.width < 60 { 4 } else if area.width < 80 { 5 } else { hints.len() };

    let hint_spans: Vec<Span> = hints
        .iter()
        .take(max_hints)
        .flat_map(|(key, action)| {
            vec![
                Span::styled(*key, Style::default().fg(accent())),
                Span::styled(format!(" {} │ ", action), Style::default().fg(text_dim())),
            ]
        })
        .collect();

    f.render_widget(Paragraph::new(Line::from(hint_spans)).alignment(Alignment::Center), area);
}

fn help_key(key: &'static str, action: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("  {:<10}", key), Style::default().fg(accent())),
        Span::raw(action),
    ])
}

fn help_heading(title: &'static str) -> Line<'static> {
    Line::from(Span::styled(
        format!("═══ {} ═══", title),
        Style::default().fg(header()).add_modifier(Modifier::BOLD),
    ))
}

fn draw_help_popup(f: &mut Frame) {
    let area = f.area();
    let popup_area = centered_rect(
        if area.width < 80 { 95 } else { 70 },
        if area.height < 30 { 95 } else { 75 },
        area,
    );

    f.render_widget(Clear, popup_area);

    let help_text = vec![
        help_heading("Pages"),
        help_key("1 / 2", "Constants / Kit statistics"),
        help_key("Tab", "Switch page"),
        help_key("r", "Reload from the server"),
        Line::from(""),
        help_heading("Constants"),
        help_key("↑/↓ j/k", "Select constant"),
        help_key("←/→ h/l", "Select field or button"),
        help_key("Enter", "Edit field, or press button"),
        help_key("u", "Undo local edits"),
        Line::from(""),
        help_heading("Writes"),
        Line::from(Span::raw("  Save, Delete and Add ask before writing to the server.")),
        help_key("y / Enter", "Confirm"),
        help_key("n / Esc", "Cancel"),
        Line::from(""),
        Line::from(vec![
            Span::styled("  Press ", Style::default().fg(text_dim())),
            Span::styled("?", Style::default().fg(accent())),
            Span::styled("/", Style::default().fg(text_dim())),
            Span::styled("Esc", Style::default().fg(accent())),
            Span::styled(" to close", Style::default().fg(text_dim())),
        ]),
    ];

    let help = Paragraph::new(help_text)
        .block(
            Block::default()
                .title(Span::styled(" ch2 Help ", Style::default().fg(accent())))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(accent())),
        )
        .wrap(Wrap { trim: false });

    f.render_widget(help, popup_area);
}
