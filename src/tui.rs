use std::{
    collections::HashSet,
    time::{Duration, Instant},
};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Rect},
    style::{Color, Style},
    widgets::{Block, BorderType, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};

use crate::{
    config::Config,
    helpers::{format_ancestors, nice_percent, sparkline},
    manager::{ProcFilter, ProcManager},
    sorted::{Forest, ForestRow, SortKey},
    source::{SnapshotSource, SysinfoSource},
};

const TOP_HEIGHT: u16 = 2;

struct State<S = SysinfoSource> {
    man: ProcManager<S>,
    sort: SortKey,
    forest: Forest,
    rows: Vec<ForestRow>,
    collapsed: HashSet<u32>,
    selected: usize,
    help: bool,
    filter: String,
    filtering: bool,
    refresh_now: bool,
}

pub fn run(mut config: Config, filter: ProcFilter) -> Result<(), std::io::Error> {
    let filter_text = match &filter {
        ProcFilter::All => String::new(),
        ProcFilter::Pid(pid) => pid.to_string(),
        ProcFilter::Name(name) => name.clone(),
    };
    let mut state = State::new(ProcManager::new(filter), config.tui.sort_key, filter_text);

    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;

    let back = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(back)?;
    let refresh = config.tui.refresh_interval();
    let mut done = false;
    let mut last = Instant::now();
    let mut tablestate = TableState::default();

    while !done {
        //get update if necessary
        if state.refresh_now || last.elapsed() > refresh {
            state.refresh();
            last = Instant::now();
        }

        tablestate.select(Some(state.selected));
        terminal.draw(|f| {
            draw_top(f, &state);
            draw_table(f, &state, &mut tablestate);
            if state.help {
                draw_help(f);
            }
            draw_filter(f, &state);
        })?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                handle_key(key, &mut done, &mut state);
            }
        }
    }

    // restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;

    config.tui.sort_key = state.sort;
    config.save();
    Ok(())
}

impl<S: SnapshotSource> State<S> {
    fn new(man: ProcManager<S>, sort: SortKey, filter: String) -> Self {
        let mut state = State {
            forest: man.view(sort),
            man,
            sort,
            rows: vec![],
            collapsed: HashSet::new(),
            selected: 0,
            help: false,
            filter,
            filtering: false,
            refresh_now: false,
        };
        state.layout();
        state
    }

    fn refresh(&mut self) {
        self.refresh_now = false;
        self.forest = self.man.refresh_and_build_view(self.sort);
        self.layout();
    }

    fn set_sort(&mut self, sort: SortKey) {
        self.sort = sort;
        //reorder what we have, sampling again is not needed
        self.forest = self.man.view(sort);
        self.layout();
    }

    fn layout(&mut self) {
        let selected_pid = self.rows.get(self.selected).map(|r| r.pid);
        self.rows = self.forest.rows(&self.collapsed);
        //keep the cursor on the same process when it is still visible
        if let Some(pos) = selected_pid.and_then(|pid| self.rows.iter().position(|r| r.pid == pid)) {
            self.selected = pos;
        }
        self.selected = self.selected.min(self.rows.len().saturating_sub(1));
    }

    fn expand_all(&mut self) {
        self.collapsed.clear();
        self.layout();
    }

    fn collapse_all(&mut self) {
        self.collapsed = self.forest.parents().collect();
        self.layout();
    }

    fn toggle_selected(&mut self) {
        if let Some(row) = self.rows.get(self.selected) {
            if !row.has_children {
                return;
            }
            if !self.collapsed.remove(&row.pid) {
                self.collapsed.insert(row.pid);
            }
            self.layout();
        }
    }

    fn last_row(&self) -> usize {
        self.rows.len().saturating_sub(1)
    }
}

fn draw_top<S: SnapshotSource>(f: &mut Frame, state: &State<S>) {
    let title = format!(
        "Processes: {}   Sort: {}   (h for help)",
        state.forest.len(),
        state.sort
    );
    f.render_widget(Block::default().title(title), Rect::new(0, 0, f.size().width, 1));

    let ancestors = state
        .rows
        .get(state.selected)
        .and_then(|row| state.man.procs().get(row.pid))
        .map(|proc| format!("Parents: {}", format_ancestors(&proc.ancestors)))
        .unwrap_or_default();
    f.render_widget(Paragraph::new(ancestors), Rect::new(0, 1, f.size().width, 1));
}

fn draw_table<S: SnapshotSource>(f: &mut Frame, state: &State<S>, tablestate: &mut TableState) {
    let header_cells = Row::new(
        [
            ("Name", SortKey::Name),
            ("PID", SortKey::Pid),
            ("Owner", SortKey::Owner),
            ("Self", SortKey::Memory),
            ("Total", SortKey::Memory),
        ]
        .iter()
        .enumerate()
        .map(|(i, (h, key))| {
            let mut name = h.to_string();
            let mut style = Style::default().fg(Color::Black).bg(Color::LightBlue);
            //self is never the sort column, total is
            if *key == state.sort && i != 3 {
                style = Style::default().fg(Color::White).bg(Color::LightMagenta);
                name.push_str(if *key == SortKey::Memory { " ↓" } else { " ↑" });
            }
            let name = if i >= 1 { format!("{name:>10}") } else { name };
            Cell::from(name).style(style)
        }),
    )
    .style(Style::default().bg(Color::LightBlue));

    let rows: Vec<Row> = state
        .rows
        .iter()
        .filter_map(|row| state.man.procs().get(row.pid).map(|proc| (row, proc)))
        .map(|(row, proc)| {
            let marker = match (row.has_children, row.expanded) {
                (false, _) => "  ",
                (true, true) => "▾ ",
                (true, false) => "▸ ",
            };
            let total = proc.total();
            Row::new(vec![
                Cell::from(format!("{}{marker}{}", row.guide, proc.name)),
                Cell::from(format!("{:>10}", proc.pid)),
                Cell::from(format!("{:>10}", proc.owner)),
                Cell::from(format!("{:>10}", nice_percent(proc.memory))),
                Cell::from(format!("{:>8} {}", nice_percent(total), sparkline(total))),
            ])
            .height(1)
        })
        .collect();

    let name_width = (f.size().width.max(85) - 45).max(25);
    let widths = [
        Constraint::Min(name_width),
        Constraint::Length(10),
        Constraint::Length(12),
        Constraint::Length(10),
        Constraint::Length(12),
    ];
    let t = Table::new(rows, widths)
        .header(header_cells)
        .highlight_style(Style::default().bg(Color::LightYellow).fg(Color::Black));

    let mut rect = f.size();
    rect.y += TOP_HEIGHT.min(rect.height);
    rect.height = rect.height.saturating_sub(TOP_HEIGHT);
    f.render_stateful_widget(t, rect, tablestate);
}

fn draw_filter<S>(f: &mut Frame, state: &State<S>) {
    if state.filtering || !state.filter.is_empty() {
        let mut style = Style::default();
        if state.filtering {
            style = style.bg(Color::Green).fg(Color::Black);
        }
        let y = f.size().height.saturating_sub(1);
        let p = Paragraph::new(format!("Filter (pid or name): {}", state.filter)).style(style);
        f.render_widget(p, Rect::new(0, y, 40.min(f.size().width), 1));
    }
}

fn draw_help(f: &mut Frame) {
    let help = r#"?/h        Help menu
Up/Down    Move selection
PgUp/PgDn  Move 20 rows
Home/End   First/last row
Enter      Expand/collapse process
e          Expand all
c          Collapse all
s          Next sort key
1-4        Sort by pid/name/owner/memory
r          Refresh now
f          Filter by pid or name
q/Esc      Exit
command line arguments:
-t         Terminal mode
-o         Print tree to stdout
-s <KEY>   Sort key
-f <PID|NAME> Filter
"#;

    let p = Paragraph::new(help)
        .style(Style::default().bg(Color::Yellow).fg(Color::Black))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Help")
                .border_type(BorderType::Rounded),
        );
    let x = f.size().width / 3;
    let y = f.size().height.saturating_sub(help.lines().count() as u16) / 3;
    let w = 42.min(f.size().width.saturating_sub(x));
    let h = 20.min(f.size().height.saturating_sub(y));
    f.render_widget(p, Rect::new(x, y, w, h));
}

fn handle_key<S: SnapshotSource>(key: KeyEvent, done: &mut bool, state: &mut State<S>) {
    if key.kind != KeyEventKind::Press {
        return;
    }
    if state.filtering {
        match key.code {
            KeyCode::Esc | KeyCode::Enter => {
                state.filtering = false;
                state.man.set_filter(ProcFilter::parse(&state.filter));
                state.refresh_now = true;
            }
            KeyCode::Char(c) => state.filter.push(c),
            KeyCode::Backspace => {
                let _ = state.filter.pop();
            }
            _ => {}
        }
        return;
    }
    match key.code {
        //second letter of each pair is the same key on a russian layout
        KeyCode::Char('q') | KeyCode::Char('й') | KeyCode::Esc => *done = true,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => *done = true,
        KeyCode::Char('e') | KeyCode::Char('у') => state.expand_all(),
        KeyCode::Char('c') | KeyCode::Char('с') => state.collapse_all(),
        KeyCode::Enter | KeyCode::Char(' ') => state.toggle_selected(),
        KeyCode::Char('s') => state.set_sort(state.sort.next()),
        KeyCode::Char(c @ '1'..='4') => {
            let i = c as usize - '1' as usize;
            state.set_sort(SortKey::ALL[i]);
        }
        KeyCode::Char('r') => state.refresh_now = true,
        KeyCode::Char('f') => state.filtering = true,
        KeyCode::Char('h') | KeyCode::Char('?') => state.help = !state.help,
        KeyCode::Down => state.selected = (state.selected + 1).min(state.last_row()),
        KeyCode::Up => state.selected = state.selected.saturating_sub(1),
        KeyCode::PageDown => state.selected = (state.selected + 20).min(state.last_row()),
        KeyCode::PageUp => state.selected = state.selected.saturating_sub(20),
        KeyCode::Home => state.selected = 0,
        KeyCode::End => state.selected = state.last_row(),
        _ => {}
    }
}
