use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Tabs, Wrap},
};
use ratatui_image::{Resize, StatefulImage, protocol::StatefulProtocol};
use std::collections::HashMap;

use super::app::{App, AppState, Detail, GameList, Notice, Tab, View};
use crate::backend::rawg::{DownloadState, GameRecord};

const ROW_HEIGHT: u16 = 6;
const THUMB_WIDTH: u16 = 16;

pub fn ui(f: &mut Frame, app: &mut App) {
    match app.state {
        AppState::Loading => draw_loading_screen(f, app),
        AppState::Ready => draw_main_ui(f, app),
    }

    if let Some(notice) = &app.notice {
        draw_notice(f, notice);
    }
}

fn draw_loading_screen(f: &mut Frame, app: &App) {
    let area = f.area();

    let block = Block::default()
        .borders(Borders::ALL)
        .title("Game Catalogue")
        .border_style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let center_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(40),
            Constraint::Length(3),
            Constraint::Length(2),
            Constraint::Percentage(40),
        ])
        .split(inner);

    let spinner_frames = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let spinner = spinner_frames[(millis / 100) as usize % spinner_frames.len()];

    let loading_text = Line::from(vec![
        Span::styled(
            format!(" {} ", spinner),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            "Loading...",
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
    ]);

    let loading_paragraph = Paragraph::new(loading_text).alignment(Alignment::Center);
    f.render_widget(loading_paragraph, center_layout[1]);

    let message = Paragraph::new(&*app.loading_message)
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    f.render_widget(message, center_layout[2]);
}

fn draw_main_ui(f: &mut Frame, app: &mut App) {
    let area = f.area();

    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // tabs
            Constraint::Min(10),   // content
            Constraint::Length(3), // footer
        ])
        .split(area);

    draw_header(f, root[0], app);

    match app.view {
        View::Detail => {
            if let Some(detail) = &app.detail {
                draw_detail(f, root[1], detail, app.covers.get_mut(&detail.game.id));
            }
        }
        View::List => match app.tab {
            Tab::Browse => {
                let title = format!(
                    "All Games ({} of {}){}",
                    app.browse.games.len(),
                    app.browse.total,
                    loading_suffix(app.covers_loading())
                );
                draw_game_list(f, root[1], &title, &mut app.browse, &mut app.covers);
            }
            Tab::Search => draw_search(f, root[1], app),
            Tab::Favorites => {
                let title = format!("Favorites ({})", app.favorites.games.len());
                draw_game_list(f, root[1], &title, &mut app.favorites, &mut app.covers);
            }
        },
    }

    draw_footer(f, root[2], app);
}

fn draw_header(f: &mut Frame, area: Rect, app: &App) {
    let titles = vec!["Browse", "Search", "Favorites"];
    let selected = match app.tab {
        Tab::Browse => 0,
        Tab::Search => 1,
        Tab::Favorites => 2,
    };

    let tabs = Tabs::new(titles)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Game Catalogue")
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .select(selected)
        .style(Style::default().fg(Color::DarkGray))
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        );

    f.render_widget(tabs, area);
}

fn draw_search(f: &mut Frame, area: Rect, app: &mut App) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(4)])
        .split(area);

    let input_style = if app.search_editing {
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::White)
    };
    let cursor = if app.search_editing { "_" } else { "" };
    let input = Paragraph::new(format!("{}{}", app.search_query, cursor)).block(
        Block::default()
            .borders(Borders::ALL)
            .title(if app.searching { "Search (searching...)" } else { "Search" })
            .border_style(input_style),
    );
    f.render_widget(input, layout[0]);

    let title = if app.last_search_query.is_empty() {
        "Results".to_string()
    } else {
        format!(
            "Results for \"{}\" ({} of {}){}",
            app.last_search_query,
            app.search.games.len(),
            app.search.total,
            loading_suffix(app.covers_loading())
        )
    };
    draw_game_list(f, layout[1], &title, &mut app.search, &mut app.covers);
}

fn loading_suffix(covers: usize) -> String {
    match covers {
        0 => String::new(),
        1 => " · 1 cover loading".to_string(),
        n => format!(" · {} covers loading", n),
    }
}

fn draw_game_list(
    f: &mut Frame,
    area: Rect,
    title: &str,
    list: &mut GameList,
    covers: &mut HashMap<i64, StatefulProtocol>,
) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(title.to_string())
        .border_style(Style::default().fg(Color::White));

    let inner = block.inner(area);
    f.render_widget(block, area);

    list.visible = (inner.height / ROW_HEIGHT).max(1) as usize;
    list.scroll_into_view();

    if list.games.is_empty() {
        let text = if list.loading { "Loading..." } else { "No games available" };
        let empty = Paragraph::new(text)
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::DarkGray));
        f.render_widget(empty, inner);
        return;
    }

    let rows = list.visible_rows();
    let constraints: Vec<Constraint> = rows
        .clone()
        .map(|_| Constraint::Length(ROW_HEIGHT))
        .collect();
    let row_areas = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(inner);

    for (row, row_area) in rows.zip(row_areas.iter()) {
        let game = &list.games[row];
        draw_game_row(
            f,
            *row_area,
            game,
            row == list.selected,
            covers.get_mut(&game.id),
        );
    }

    if list.loading {
        let more = Paragraph::new("loading more...")
            .alignment(Alignment::Right)
            .style(Style::default().fg(Color::DarkGray));
        let bottom = Rect::new(inner.x, inner.y + inner.height.saturating_sub(1), inner.width, 1);
        f.render_widget(more, bottom);
    }
}

fn draw_game_row(
    f: &mut Frame,
    area: Rect,
    game: &GameRecord,
    selected: bool,
    cover: Option<&mut StatefulProtocol>,
) {
    let border_style = if selected {
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::DarkGray)
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style);

    let inner = block.inner(area);
    f.render_widget(block, area);

    if inner.height < 2 || inner.width < THUMB_WIDTH + 4 {
        return;
    }

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(THUMB_WIDTH), Constraint::Min(4)])
        .split(inner);

    draw_cover(f, columns[0], game, cover);

    let text_width = columns[1].width.saturating_sub(2) as usize;
    let released = if game.released.is_empty() {
        "TBA"
    } else {
        game.released.as_str()
    };
    let lines = vec![
        Line::from(Span::styled(
            truncate_text(&game.name, text_width),
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            format!("Released {}", released),
            Style::default().fg(Color::DarkGray),
        )),
        Line::from(vec![
            Span::styled("★ ", Style::default().fg(Color::Yellow)),
            Span::styled(format!("{:.2}", game.rating), Style::default().fg(Color::Cyan)),
        ]),
    ];
    let text = Paragraph::new(lines);
    let text_area = Rect {
        x: columns[1].x + 1,
        width: columns[1].width.saturating_sub(1),
        ..columns[1]
    };
    f.render_widget(text, text_area);
}

fn draw_cover(
    f: &mut Frame,
    area: Rect,
    game: &GameRecord,
    cover: Option<&mut StatefulProtocol>,
) {
    if let Some(state) = cover {
        let image_widget = StatefulImage::new().resize(Resize::Scale(None));
        f.render_stateful_widget(image_widget, area, state);
        return;
    }

    let (icon, label, color) = match game.state {
        DownloadState::Pending => ("🎮", "Loading...", Color::Magenta),
        DownloadState::Loaded => ("🎮", "", Color::Magenta),
        DownloadState::Failed => ("✕", "No image", Color::Red),
    };
    let placeholder = Paragraph::new(vec![
        Line::from(Span::styled(icon, Style::default().fg(color))),
        Line::from(Span::styled(label, Style::default().fg(Color::DarkGray))),
    ])
    .alignment(Alignment::Center);
    f.render_widget(placeholder, area);
}

fn draw_detail(f: &mut Frame, area: Rect, detail: &Detail, cover: Option<&mut StatefulProtocol>) {
    let game = &detail.game;
    let title = if detail.is_favorite {
        format!("♥ {}", game.name)
    } else {
        game.name.clone()
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title(title)
        .border_style(Style::default().fg(Color::Yellow));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(45), // cover
            Constraint::Length(2),      // facts
            Constraint::Min(3),         // description
        ])
        .split(inner);

    draw_cover(f, layout[0], game, cover);

    let released = if game.released.is_empty() {
        "TBA"
    } else {
        game.released.as_str()
    };
    let facts = Line::from(vec![
        Span::styled("Released ", Style::default().fg(Color::DarkGray)),
        Span::styled(released, Style::default().fg(Color::White)),
        Span::raw("   "),
        Span::styled("★ ", Style::default().fg(Color::Yellow)),
        Span::styled(format!("{:.2}", game.rating), Style::default().fg(Color::Cyan)),
        Span::raw("   "),
        if detail.is_favorite {
            Span::styled("♥ Favorite", Style::default().fg(Color::Red))
        } else {
            Span::styled("♡ Not a favorite", Style::default().fg(Color::DarkGray))
        },
    ]);
    f.render_widget(Paragraph::new(facts), layout[1]);

    let description = match &detail.description {
        None => "Loading description...",
        Some(text) if text.is_empty() => "Description unavailable",
        Some(text) => text.as_str(),
    };
    let desc_width = layout[2].width as usize;
    let desc_lines = wrap_text(description, desc_width, layout[2].height.max(1) as usize);
    let desc = Paragraph::new(desc_lines.join("\n"))
        .style(Style::default().fg(Color::Gray))
        .wrap(Wrap { trim: true });
    f.render_widget(desc, layout[2]);
}

fn draw_notice(f: &mut Frame, notice: &Notice) {
    let area = centered_rect(50, 7, f.area());
    f.render_widget(Clear, area);

    let text = vec![
        Line::from(""),
        Line::from(Span::styled(
            notice.message.as_str(),
            Style::default().fg(Color::White),
        )),
        Line::from(""),
        Line::from(Span::styled("[ OK ]", Style::default().fg(Color::Yellow))),
    ];
    let popup = Paragraph::new(text)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(notice.title.as_str())
                .border_style(
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD),
                ),
        );
    f.render_widget(popup, area);
}

fn centered_rect(percent_x: u16, height: u16, area: Rect) -> Rect {
    let width = area.width * percent_x / 100;
    Rect {
        x: area.x + (area.width.saturating_sub(width)) / 2,
        y: area.y + (area.height.saturating_sub(height)) / 2,
        width,
        height: height.min(area.height),
    }
}

fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        format!(
            "{}...",
            text.chars()
                .take(max_len.saturating_sub(3))
                .collect::<String>()
        )
    }
}

fn wrap_text(text: &str, width: usize, max_lines: usize) -> Vec<String> {
    if width == 0 || max_lines == 0 {
        return vec![];
    }

    let mut lines = Vec::new();
    let mut current_line = String::new();

    for word in text.split_whitespace() {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.chars().count() + 1 + word.chars().count() <= width {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            lines.push(current_line);
            if lines.len() >= max_lines {
                if let Some(last) = lines.last_mut() {
                    let char_count = last.chars().count();
                    if char_count > 3 {
                        *last = last.chars().take(char_count - 3).collect::<String>() + "...";
                    }
                }
                return lines;
            }
            current_line = word.to_string();
        }
    }

    if !current_line.is_empty() && lines.len() < max_lines {
        lines.push(current_line);
    }

    lines
}

fn draw_footer(f: &mut Frame, area: Rect, app: &App) {
    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));
    let mut spans = match (app.view, app.tab) {
        (View::Detail, _) => vec![
            key("f"),
            Span::raw(": favorite  "),
            key("o"),
            Span::raw(": open in browser  "),
            key("Esc"),
            Span::raw(": back  "),
        ],
        (View::List, Tab::Search) if app.search_editing => vec![
            key("Enter"),
            Span::raw(": search  "),
            key("↓"),
            Span::raw(": results  "),
            key("Tab"),
            Span::raw(": switch tab  "),
        ],
        (View::List, Tab::Favorites) => vec![
            key("↑/↓"),
            Span::raw(": scroll  "),
            key("Enter"),
            Span::raw(": details  "),
            key("X"),
            Span::raw(": clear all  "),
            key("Tab"),
            Span::raw(": switch tab  "),
        ],
        (View::List, _) => vec![
            key("↑/↓"),
            Span::raw(": scroll  "),
            key("Enter"),
            Span::raw(": details  "),
            key("r"),
            Span::raw(": reload  "),
            key("Tab"),
            Span::raw(": switch tab  "),
        ],
    };
    if !(app.tab == Tab::Search && app.search_editing && app.view == View::List) {
        spans.push(key("q"));
        spans.push(Span::raw(": quit"));
    }

    let p = Paragraph::new(Line::from(spans))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .alignment(Alignment::Center);
    f.render_widget(p, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate_text("Celeste", 10), "Celeste");
        assert_eq!(truncate_text("The Witcher 3: Wild Hunt", 10), "The Wit...");
    }

    #[test]
    fn wrap_stops_at_max_lines_with_ellipsis() {
        let lines = wrap_text("one two three four five six", 9, 2);
        assert_eq!(lines, vec!["one two", "th..."]);
    }

    #[test]
    fn wrap_handles_degenerate_sizes() {
        assert!(wrap_text("anything", 0, 3).is_empty());
        assert!(wrap_text("anything", 10, 0).is_empty());
        assert_eq!(wrap_text("a b", 10, 3), vec!["a b"]);
    }

    #[test]
    fn loading_suffix_pluralizes() {
        assert_eq!(loading_suffix(0), "");
        assert_eq!(loading_suffix(1), " · 1 cover loading");
        assert_eq!(loading_suffix(3), " · 3 covers loading");
    }

    #[test]
    fn centered_rect_fits_inside_area() {
        let area = Rect::new(0, 0, 100, 40);
        let popup = centered_rect(50, 7, area);
        assert_eq!(popup, Rect::new(25, 16, 50, 7));

        let tiny = centered_rect(50, 7, Rect::new(0, 0, 10, 3));
        assert_eq!(tiny.height, 3);
    }
}
