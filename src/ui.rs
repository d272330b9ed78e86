use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap};

use crate::app::{App, InputMode};
use crate::dispatch::FlashLevel;
use crate::model::{RowAction, RowEvent};
use crate::sorter::SortColumn;

const BG: Color = Color::Rgb(9, 15, 25);
const PANEL: Color = Color::Rgb(16, 27, 44);
const ACCENT: Color = Color::Rgb(52, 211, 153);
const MUTED: Color = Color::Rgb(140, 156, 178);
const WARN: Color = Color::Rgb(251, 191, 36);
const ERROR: Color = Color::Rgb(248, 113, 113);
const ADDED: Color = Color::Rgb(74, 222, 128);
const CHANGED: Color = Color::Rgb(96, 165, 250);
const PL_A: Color = Color::Rgb(17, 94, 89);
const PL_B: Color = Color::Rgb(30, 64, 175);
const PL_C: Color = Color::Rgb(55, 48, 163);
const PL_D: Color = Color::Rgb(82, 24, 124);

pub fn render(frame: &mut Frame, app: &App) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(6),
            Constraint::Length(1),
        ])
        .split(frame.area());

    render_header(frame, root[0], app);
    render_table(frame, root[1], app);
    render_footer(frame, root[2], app);
}

fn render_header(frame: &mut Frame, area: Rect, app: &App) {
    let mut spans = Vec::new();
    push_powerline_segment(
        &mut spans,
        format!(" {} ", compact_text(app.cluster(), 24)),
        Color::White,
        PL_A,
        PL_B,
    );
    push_powerline_segment(
        &mut spans,
        format!(" ctx {} ", compact_text(app.context(), 24)),
        Color::White,
        PL_B,
        PL_C,
    );
    push_powerline_segment(
        &mut spans,
        format!(" ns {} ", app.namespace_scope().label()),
        Color::White,
        PL_C,
        PL_D,
    );
    push_powerline_segment(
        &mut spans,
        format!(" {} ", app.view_kind().title().to_ascii_lowercase()),
        Color::White,
        PL_D,
        BG,
    );
    if app.forward_count() > 0 {
        spans.push(Span::styled(
            format!(" pf:{}", app.forward_count()),
            Style::default().fg(ACCENT).bg(BG),
        ));
    }

    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG).fg(Color::White)),
        area,
    );
}

fn render_table(frame: &mut Frame, area: Rect, app: &App) {
    let table = app.table();
    if let (Some(error), true) = (app.table_error(), table.is_empty()) {
        let panel = Paragraph::new(Text::from(error.to_string()))
            .wrap(Wrap { trim: false })
            .block(
                Block::default()
                    .title(format!("{} Error", app.view_kind().title()))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(ERROR))
                    .style(Style::default().bg(PANEL)),
            )
            .style(Style::default().fg(ERROR));
        frame.render_widget(panel, area);
        return;
    }

    let sort = app.sort();
    let header_row = Row::new(table.header.iter().enumerate().map(|(index, name)| {
        Cell::from(header_label(name, index, sort))
            .style(Style::default().add_modifier(Modifier::BOLD))
    }))
    .height(1)
    .style(Style::default().fg(ACCENT));

    let visible_rows = app.visible_rows();
    let rows = visible_rows.iter().map(|row| {
        Row::new(
            row.fields
                .iter()
                .enumerate()
                .map(|(index, field)| Cell::from(field.clone()).style(cell_style(row, index))),
        )
    });

    let mut title = app.view_title();
    if !app.filter().is_empty() {
        title.push_str(&format!(" </{}>", app.filter()));
    }
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT))
        .style(Style::default().bg(PANEL));

    let widget = Table::new(rows, column_constraints(table.header.len()))
        .header(header_row)
        .block(block)
        .column_spacing(1)
        .row_highlight_style(
            Style::default()
                .bg(Color::Rgb(24, 36, 58))
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    let mut state = TableState::default();
    state.select(app.selected_index());
    frame.render_stateful_widget(widget, area, &mut state);
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App) {
    let mut spans = Vec::new();
    match app.mode() {
        InputMode::Command | InputMode::Filter => {
            let prefix = if app.mode() == InputMode::Command { ":" } else { "/" };
            push_powerline_segment(&mut spans, " input ", Color::Black, ACCENT, BG);
            spans.push(Span::styled(
                format!(" {prefix}{}_", app.input()),
                Style::default().fg(Color::White).bg(BG),
            ));
        }
        InputMode::Confirm => {
            let prompt = app.pending_prompt().unwrap_or_default();
            push_powerline_segment(
                &mut spans,
                format!(" {} ", compact_text(prompt, area.width.saturating_sub(4) as usize)),
                Color::Black,
                WARN,
                BG,
            );
        }
        InputMode::Normal => {
            if let Some(bench) = app.bench_indicator() {
                push_powerline_segment(
                    &mut spans,
                    format!(" {} ", compact_text(&bench, 40)),
                    Color::Black,
                    WARN,
                    PL_B,
                );
            }
            let (fg, bg) = status_colors(app.status_level());
            let width = area.width.saturating_sub(24).max(24) as usize;
            push_powerline_segment(
                &mut spans,
                format!(" {} ", compact_text(app.status(), width)),
                fg,
                bg,
                BG,
            );
        }
    }

    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
        area,
    );
}

fn status_colors(level: FlashLevel) -> (Color, Color) {
    match level {
        FlashLevel::Info => (Color::White, PL_B),
        FlashLevel::Warn => (Color::Black, WARN),
        FlashLevel::Error => (Color::Black, ERROR),
    }
}

/// New rows are green, deleted rows grey, and updated cells highlighted.
fn cell_style(row: &RowEvent, index: usize) -> Style {
    match row.action {
        RowAction::New => Style::default().fg(ADDED),
        RowAction::Delete => Style::default().fg(MUTED).add_modifier(Modifier::DIM),
        RowAction::Update if row.deltas.get(index).is_some_and(Option::is_some) => Style::default()
            .fg(CHANGED)
            .add_modifier(Modifier::BOLD),
        RowAction::Update | RowAction::Unchanged => Style::default().fg(Color::White),
    }
}

fn header_label(name: &str, index: usize, sort: SortColumn) -> String {
    if index != sort.index {
        return name.to_string();
    }
    let arrow = if sort.ascending { '↑' } else { '↓' };
    format!("{name}{arrow}")
}

fn push_powerline_segment(
    spans: &mut Vec<Span<'static>>,
    content: impl Into<String>,
    fg: Color,
    bg: Color,
    next_bg: Color,
) {
    spans.push(Span::styled(
        content.into(),
        Style::default().fg(fg).bg(bg).add_modifier(Modifier::BOLD),
    ));
    spans.push(Span::styled("", Style::default().fg(bg).bg(next_bg)));
}

fn compact_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }

    if max_chars <= 1 {
        return "…".to_string();
    }

    let mut out = value
        .chars()
        .take(max_chars.saturating_sub(1))
        .collect::<String>();
    out.push('…');
    out
}

fn column_constraints(columns: usize) -> Vec<Constraint> {
    if columns == 0 {
        return vec![Constraint::Percentage(100)];
    }

    let width = (100 / columns as u16).max(1);
    (0..columns)
        .map(|_| Constraint::Percentage(width))
        .collect()
}
