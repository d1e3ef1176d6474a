use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};

use crate::app::{App, Focus};

pub fn draw(frame: &mut Frame, app: &App) {
    // Main horizontal split: 2/5 left, 3/5 right
    let main_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(2, 5), Constraint::Ratio(3, 5)])
        .split(frame.area());

    // Left pane: header + topics + articles + status
    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),      // Title bar
            Constraint::Percentage(40), // Topic list
            Constraint::Min(0),         // Article list
            Constraint::Length(1),      // Status line
        ])
        .split(main_chunks[0]);

    // Right pane: title + metadata + summary
    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4), // Article title
            Constraint::Length(5), // Source, date, link
            Constraint::Min(0),    // Summary content
        ])
        .split(main_chunks[1]);

    render_header(frame, app, left_chunks[0]);
    render_topic_list(frame, app, left_chunks[1]);
    render_article_list(frame, app, left_chunks[2]);
    render_status(frame, app, left_chunks[3]);

    render_article_title(frame, app, right_chunks[0]);
    render_article_meta(frame, app, right_chunks[1]);
    render_summary(frame, app, right_chunks[2]);

    if app.show_help {
        render_help(frame);
    }
}

fn pane_border(focused: bool) -> Style {
    if focused {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::DarkGray)
    }
}

fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let total: usize = app.topics.iter().map(|t| t.count).sum();
    let stats = format!(" {} Topics | {} Articles", app.topics.len(), total);

    let block = Block::default()
        .title(" News Radar ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let paragraph = Paragraph::new(stats).style(Style::default().fg(Color::White));
    frame.render_widget(paragraph, inner);
}

fn render_topic_list(frame: &mut Frame, app: &App, area: Rect) {
    let items: Vec<ListItem> = app
        .topics
        .iter()
        .map(|topic| {
            let line = Line::from(vec![
                Span::styled(format!("{:>4} ", topic.count), Style::default().fg(Color::Blue)),
                Span::styled(topic.name.as_str(), Style::default().fg(Color::White)),
            ]);
            ListItem::new(line)
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .title(" Topics ")
                .borders(Borders::ALL)
                .border_style(pane_border(app.focus == Focus::Topics)),
        )
        .highlight_style(
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    let mut state = ListState::default();
    if !app.topics.is_empty() {
        state.select(Some(app.topic_index));
    }

    frame.render_stateful_widget(list, area, &mut state);
}

fn render_article_list(frame: &mut Frame, app: &App, area: Rect) {
    let items: Vec<ListItem> = app
        .articles
        .iter()
        .map(|article| {
            let line = Line::from(vec![
                Span::styled(
                    format!("[{}] ", article.display_source()),
                    Style::default().fg(Color::Blue),
                ),
                Span::styled(article.title.as_str(), Style::default().fg(Color::White)),
            ]);
            ListItem::new(line)
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .title(" Articles ")
                .borders(Borders::ALL)
                .border_style(pane_border(app.focus == Focus::Articles)),
        )
        .highlight_style(
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    let mut state = ListState::default();
    if app.focus == Focus::Articles && !app.articles.is_empty() {
        state.select(Some(app.article_index));
    }

    frame.render_stateful_widget(list, area, &mut state);
}

fn render_status(frame: &mut Frame, app: &App, area: Rect) {
    let status = app
        .status_message
        .as_deref()
        .unwrap_or("j/k:nav  tab:switch pane  o:open  ?:help  q:quit");

    let paragraph = Paragraph::new(status).style(Style::default().fg(Color::DarkGray));
    frame.render_widget(paragraph, area);
}

fn render_article_title(frame: &mut Frame, app: &App, area: Rect) {
    let title = app
        .selected_article()
        .map(|a| a.title.as_str())
        .unwrap_or("No article selected");

    let block = Block::default()
        .title(" Article ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let paragraph = Paragraph::new(title)
        .block(block)
        .wrap(Wrap { trim: true });

    frame.render_widget(paragraph, area);
}

fn render_article_meta(frame: &mut Frame, app: &App, area: Rect) {
    let label = Style::default().fg(Color::DarkGray);
    let lines = match app.selected_article() {
        Some(article) => vec![
            Line::from(vec![
                Span::styled("Source:    ", label),
                Span::raw(article.display_source()),
            ]),
            Line::from(vec![
                Span::styled("Published: ", label),
                Span::raw(article.published_date.as_deref().unwrap_or("unknown")),
            ]),
            Line::from(vec![
                Span::styled("Link:      ", label),
                Span::styled(article.url.as_str(), Style::default().fg(Color::Blue)),
            ]),
        ],
        None => match app.selected_topic() {
            Some(topic) if !topic.keywords.is_empty() => vec![Line::from(vec![
                Span::styled("Keywords:  ", label),
                Span::raw(topic.keywords.join(", ")),
            ])],
            _ => Vec::new(),
        },
    };

    let block = Block::default().borders(Borders::ALL);
    let paragraph = Paragraph::new(lines).block(block);
    frame.render_widget(paragraph, area);
}

fn render_summary(frame: &mut Frame, app: &App, area: Rect) {
    let content = match app.selected_article() {
        Some(article) => article
            .summary
            .clone()
            .unwrap_or_else(|| "No summary available".to_string()),
        None if app.topics.is_empty() => {
            "No clustered articles yet.\n\nRun `radar cluster` and `radar label` first.".to_string()
        }
        None => "Press Enter or Tab to browse this topic's articles.".to_string(),
    };

    let block = Block::default()
        .title(" Summary ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));

    // Wrap ourselves so paragraph breaks in the summary survive.
    let width = usize::from(block.inner(area).width.max(1));
    let lines: Vec<Line> = content
        .lines()
        .flat_map(|paragraph| {
            if paragraph.trim().is_empty() {
                vec![Line::raw("")]
            } else {
                textwrap::wrap(paragraph, width)
                    .into_iter()
                    .map(|l| Line::raw(l.into_owned()))
                    .collect()
            }
        })
        .collect();

    let paragraph = Paragraph::new(lines).block(block);
    frame.render_widget(paragraph, area);
}

fn render_help(frame: &mut Frame) {
    let area = centered_rect(50, 60, frame.area());

    let help_text = vec![
        "",
        " Navigation:",
        "   j / ↓    Move down",
        "   k / ↑    Move up",
        "   < / >    Jump to first / last",
        "   Tab      Switch between topics and articles",
        "   Enter    Browse the selected topic",
        "   h / ←    Back to topics",
        "",
        " Actions:",
        "   o        Open article in browser",
        "",
        " General:",
        "   ?        Toggle this help",
        "   q        Quit",
        "",
        " Press any key to close",
    ];

    let block = Block::default()
        .title(" Help ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let paragraph = Paragraph::new(help_text.join("\n"))
        .block(block)
        .style(Style::default().fg(Color::White));

    frame.render_widget(Clear, area);
    frame.render_widget(paragraph, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
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
