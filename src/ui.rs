use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{BarChart, Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap},
    Frame, Terminal,
};
use resumen_financiero::dashboard::{MSG_EMPTY_LOG, MSG_NO_LOG, MSG_UNDATED};
use resumen_financiero::extraction::field_label;
use resumen_financiero::{search, summarize, DashboardSummary, ExtractionRecord, LedgerState};
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Indicators,
    Records,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Indicators => Page::Records,
            Page::Records => Page::Indicators,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Indicators => "Indicadores",
            Page::Records => "Registros",
        }
    }
}

pub struct App {
    pub records: Vec<ExtractionRecord>,
    pub filtered_records: Vec<ExtractionRecord>,
    pub summary: DashboardSummary,
    pub state: TableState,
    pub current_page: Page,
    pub show_detail: bool,
    pub query: String,
    pub searching: bool,
    /// Set when there is nothing to analyse yet
    pub notice: Option<&'static str>,
}

impl App {
    pub fn from_ledger(ledger: LedgerState) -> Self {
        let notice = match &ledger {
            LedgerState::Missing => Some(MSG_NO_LOG),
            LedgerState::Records(records) if records.is_empty() => Some(MSG_EMPTY_LOG),
            LedgerState::Records(_) => None,
        };

        let records = match ledger {
            LedgerState::Missing => Vec::new(),
            LedgerState::Records(records) => records,
        };

        let mut state = TableState::default();
        if !records.is_empty() {
            state.select(Some(0));
        }

        Self {
            summary: summarize(&records),
            filtered_records: records.clone(),
            records,
            state,
            current_page: Page::Indicators,
            show_detail: false,
            query: String::new(),
            searching: false,
            notice,
        }
    }

    pub fn selected_record(&self) -> Option<&ExtractionRecord> {
        self.state.selected().and_then(|i| self.filtered_records.get(i))
    }

    pub fn apply_search(&mut self) {
        self.filtered_records = search(&self.records, &self.query)
            .into_iter()
            .cloned()
            .collect();

        // Reset selection to first item
        if !self.filtered_records.is_empty() {
            self.state.select(Some(0));
        } else {
            self.state.select(None);
        }
    }

    pub fn clear_search(&mut self) {
        self.query.clear();
        self.apply_search();
    }

    pub fn next(&mut self) {
        let len = self.filtered_records.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.filtered_records.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }

    pub fn page_down(&mut self) {
        let len = self.filtered_records.len();
        if len == 0 {
            return;
        }
        let i = self.state.selected().map_or(0, |i| (i + 20).min(len - 1));
        self.state.select(Some(i));
    }

    pub fn page_up(&mut self) {
        if self.filtered_records.is_empty() {
            return;
        }
        let i = self.state.selected().map_or(0, |i| i.saturating_sub(20));
        self.state.select(Some(i));
    }

    /// Apply one key press; returns false when the user asked to quit.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        if self.searching {
            match key.code {
                KeyCode::Enter | KeyCode::Esc => self.searching = false,
                KeyCode::Backspace => {
                    self.query.pop();
                    self.apply_search();
                }
                KeyCode::Char(c) => {
                    self.query.push(c);
                    self.apply_search();
                }
                _ => {}
            }
            return true;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return false,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return false,
            KeyCode::Tab | KeyCode::BackTab => self.current_page = self.current_page.next(),
            KeyCode::Char('/') => {
                self.current_page = Page::Records;
                self.searching = true;
            }
            KeyCode::Char('c') => self.clear_search(),
            KeyCode::Enter => self.show_detail = !self.show_detail,
            KeyCode::Down | KeyCode::Char('j') => self.next(),
            KeyCode::Up | KeyCode::Char('k') => self.previous(),
            KeyCode::PageDown => self.page_down(),
            KeyCode::PageUp => self.page_up(),
            KeyCode::Home if !self.filtered_records.is_empty() => self.state.select(Some(0)),
            KeyCode::End if !self.filtered_records.is_empty() => {
                self.state.select(Some(self.filtered_records.len() - 1))
            }
            _ => {}
        }
        true
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res.map_err(Into::into)
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            if !app.handle_key(key) {
                return Ok(());
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    if let Some(notice) = app.notice {
        let paragraph = Paragraph::new(notice)
            .style(Style::default().fg(Color::Yellow))
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(paragraph, chunks[1]);
    } else {
        match app.current_page {
            Page::Indicators => render_indicators(f, chunks[1], app),
            Page::Records if app.show_detail => {
                let content_chunks = Layout::default()
                    .direction(Direction::Horizontal)
                    .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
                    .split(chunks[1]);

                render_table(f, content_chunks[0], app);
                render_detail_panel(f, content_chunks[1], app);
            }
            Page::Records => render_table(f, chunks[1], app),
        }
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let mut tab_spans = vec![Span::styled(
        "📊 Resumen Financiero  ",
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    )];

    for (i, page) in [Page::Indicators, Page::Records].iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title(), style));
    }

    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Documentos: {}", app.summary.documentos),
        Style::default().fg(Color::White),
    ));

    let header = Paragraph::new(Line::from(tab_spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );

    f.render_widget(header, area);
}

fn render_indicators(f: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Percentage(50),
            Constraint::Min(0),
        ])
        .split(area);

    let summary = &app.summary;
    let label = Style::default().fg(Color::Cyan);
    let mut lines = vec![
        Line::from(vec![
            Span::styled("📄 Documentos: ", label),
            Span::raw(summary.documentos.to_string()),
            Span::raw("    "),
            Span::styled("👤 Personas únicas: ", label),
            Span::raw(summary.personas_unicas.to_string()),
        ]),
        Line::from(vec![
            Span::styled("💰 Suma total de saldos: ", label),
            Span::raw(summary.total_display()),
            Span::raw("    "),
            Span::styled("💳 Saldo promedio: ", label),
            Span::raw(summary.average_display()),
        ]),
    ];
    if summary.registros_sin_fecha > 0 {
        lines.push(Line::styled(MSG_UNDATED, Style::default().fg(Color::Yellow)));
    }

    let indicators = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" 📌 Indicadores clave "),
    );
    f.render_widget(indicators, chunks[0]);

    let top: Vec<(String, u64)> = summary
        .top_nombres
        .iter()
        .map(|n| (truncate(&n.nombre, 12), n.documentos as u64))
        .collect();
    let top_data: Vec<(&str, u64)> = top.iter().map(|(n, c)| (n.as_str(), *c)).collect();

    let top_chart = BarChart::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" 📈 Documentos por persona (Top 10) "),
        )
        .data(top_data.as_slice())
        .bar_width(12)
        .bar_gap(1)
        .bar_style(Style::default().fg(Color::Blue))
        .value_style(Style::default().fg(Color::Black).bg(Color::Blue));
    f.render_widget(top_chart, chunks[1]);

    let monthly: Vec<(&str, u64)> = summary
        .evolucion_mensual
        .iter()
        .map(|m| (m.mes.as_str(), m.documentos as u64))
        .collect();

    let monthly_chart = BarChart::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" 🗓️ Evolución mensual "),
        )
        .data(monthly.as_slice())
        .bar_width(7)
        .bar_gap(1)
        .bar_style(Style::default().fg(Color::Green))
        .value_style(Style::default().fg(Color::Black).bg(Color::Green));
    f.render_widget(monthly_chart, chunks[2]);
}

fn render_table(f: &mut Frame, area: Rect, app: &mut App) {
    let header_cells = ["Fecha", "Nombre", "RFC", "Cuenta", "Saldo", "Tema"]
        .iter()
        .map(|h| {
            Cell::from(*h).style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )
        });

    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows = app.filtered_records.iter().map(|record| {
        Row::new(vec![
            Cell::from(record.fecha.clone()),
            Cell::from(truncate(&record.nombre, 28)),
            Cell::from(record.rfc.clone()),
            Cell::from(truncate(&record.cuenta, 20)),
            Cell::from(record.saldo.clone()).style(Style::default().fg(Color::Green)),
            Cell::from(truncate(&record.tema, 30)),
        ])
        .height(1)
    });

    let title = if app.query.is_empty() {
        " Registros ".to_string()
    } else {
        format!(" Registros · búsqueda: {} ", app.query)
    };

    let table = Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Length(30),
            Constraint::Length(15),
            Constraint::Length(22),
            Constraint::Length(16),
            Constraint::Min(10),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(title),
    )
    .highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_detail_panel(f: &mut Frame, area: Rect, app: &App) {
    let Some(record) = app.selected_record() else {
        let empty = Paragraph::new("Sin registro seleccionado")
            .block(Block::default().borders(Borders::ALL).title(" Detalle "));
        f.render_widget(empty, area);
        return;
    };

    let mut lines = Vec::new();
    for (name, value) in record.fields() {
        lines.push(Line::styled(
            format!("{}:", field_label(name)),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ));
        lines.push(Line::raw(format!("  {}", value)));
        lines.push(Line::raw(""));
    }

    let detail = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan))
                .title(" Detalle "),
        );
    f.render_widget(detail, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let key = Style::default().fg(Color::Yellow);

    let status_spans = if app.searching {
        vec![
            Span::styled(" Buscar: ", Style::default().fg(Color::Cyan)),
            Span::raw(format!("{}▏", app.query)),
            Span::raw("  | "),
            Span::styled("Enter", key),
            Span::raw(" Listo"),
        ]
    } else {
        let selected = app.state.selected().map(|i| i + 1).unwrap_or(0);
        vec![
            Span::styled(
                format!(" Fila: {}/{} ", selected, app.filtered_records.len()),
                Style::default().fg(Color::Cyan),
            ),
            Span::raw(" | "),
            Span::styled("Tab", key),
            Span::raw(" Página | "),
            Span::styled("/", key),
            Span::raw(" Buscar | "),
            Span::styled("c", key),
            Span::raw(" Limpiar | "),
            Span::styled("Enter", key),
            Span::raw(" Detalle | "),
            Span::styled("↑/↓", key),
            Span::raw(" Nav | "),
            Span::styled("q", Style::default().fg(Color::Red)),
            Span::raw(" Salir"),
        ]
    };

    let status_bar = Paragraph::new(Line::from(status_spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(nombre: &str, rfc: &str) -> ExtractionRecord {
        ExtractionRecord {
            nombre: nombre.to_string(),
            rfc: rfc.to_string(),
            cuenta: "001".to_string(),
            saldo: "$10.00".to_string(),
            tema: "Estado de cuenta".to_string(),
            riesgos: "Ninguno".to_string(),
            recomendaciones: "Ninguna".to_string(),
            fecha: "2024-04-10".to_string(),
        }
    }

    fn press(app: &mut App, code: KeyCode) -> bool {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn sample() -> App {
        App::from_ledger(LedgerState::Records(vec![
            record("Ana Ruiz", "RUAA800101"),
            record("Luis Pérez", "PELL900202"),
            record("Ana Ruiz", "RUAA800101"),
        ]))
    }

    #[test]
    fn test_notices() {
        assert_eq!(App::from_ledger(LedgerState::Missing).notice, Some(MSG_NO_LOG));
        assert_eq!(
            App::from_ledger(LedgerState::Records(vec![])).notice,
            Some(MSG_EMPTY_LOG)
        );
        assert_eq!(sample().notice, None);
    }

    #[test]
    fn test_navigation_wraps() {
        let mut app = sample();
        press(&mut app, KeyCode::Up);
        assert_eq!(app.state.selected(), Some(2));
        press(&mut app, KeyCode::Down);
        assert_eq!(app.state.selected(), Some(0));
        press(&mut app, KeyCode::PageDown);
        assert_eq!(app.state.selected(), Some(2));
    }

    #[test]
    fn test_search_mode() {
        let mut app = sample();
        press(&mut app, KeyCode::Char('/'));
        assert!(app.searching);
        assert_eq!(app.current_page, Page::Records);

        for c in "pérez".chars() {
            assert!(press(&mut app, KeyCode::Char(c)));
        }
        assert_eq!(app.filtered_records.len(), 1);
        assert_eq!(app.selected_record().unwrap().nombre, "Luis Pérez");

        // 'q' is text while searching
        press(&mut app, KeyCode::Char('q'));
        assert!(app.filtered_records.is_empty());
        assert_eq!(app.state.selected(), None);

        press(&mut app, KeyCode::Enter);
        assert!(!app.searching);
        press(&mut app, KeyCode::Char('c'));
        assert_eq!(app.filtered_records.len(), 3);
        assert!(!press(&mut app, KeyCode::Char('q')));
    }

    #[test]
    fn test_summary_from_records() {
        let app = sample();
        assert_eq!(app.summary.documentos, 3);
        assert_eq!(app.summary.personas_unicas, 2);
        assert_eq!(app.summary.top_nombres[0].nombre, "Ana Ruiz");
    }

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate("Pérez", 10), "Pérez");
        assert_eq!(truncate("Peñaloza Fernández", 8), "Peñal...");
    }
}
