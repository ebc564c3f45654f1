// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow};
use cabinet_app::{
    ActionStrip, AppCommand, AppMode, AppState, ColumnConfig, ColumnDataType, ColumnDefinition,
    Debouncer, FieldKey, FieldPayload, InvoiceComposer, InvoiceRequest, InvoiceSession,
    InvoiceSlot, NewColumn, PAGE_SIZE, PatientId, PatientRecord, RecordForm, RowAction,
    SearchSequencer, TableProjection, WidgetKind, ensure_column_can_hide,
    ensure_column_can_remove, format_cell, project_records,
};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::{execute, terminal};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table};
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

const CREATE_SUBMIT_LABEL: &str = "Enregistrer";
const EDIT_SUBMIT_LABEL: &str = "Mettre à jour";
const STRIP_MARK: &str = "↳";

/// Everything the terminal front end needs from the registry.
pub trait AppRuntime {
    /// Never fails: falls back to the role defaults.
    fn resolve_columns(&mut self) -> ColumnConfig;
    fn column_catalog(&mut self) -> Result<Vec<ColumnDefinition>>;
    fn search(&mut self, query: &str) -> Result<Vec<PatientRecord>>;
    fn spawn_search(
        &mut self,
        request_id: u64,
        query: &str,
        tx: Sender<InternalEvent>,
    ) -> Result<()> {
        let event = match self.search(query) {
            Ok(records) => InternalEvent::Search(SearchEvent::Completed {
                request_id,
                records,
            }),
            Err(error) => InternalEvent::Search(SearchEvent::Failed {
                request_id,
                error: format!("{error:#}"),
            }),
        };
        tx.send(event)
            .map_err(|_| anyhow!("search event channel closed"))?;
        Ok(())
    }
    fn fetch_patient(&mut self, id: PatientId) -> Result<PatientRecord>;
    fn create_patient(&mut self, fields: &FieldPayload) -> Result<()>;
    fn update_patient(&mut self, id: PatientId, fields: &FieldPayload) -> Result<()>;
    fn delete_patient(&mut self, id: PatientId) -> Result<()>;
    /// Renders the invoice and returns where the PDF was written.
    fn generate_invoice(&mut self, id: PatientId, invoice: &InvoiceRequest) -> Result<PathBuf>;
    fn add_column(&mut self, column: &NewColumn) -> Result<()>;
    fn toggle_column(&mut self, key: &FieldKey, visible: bool) -> Result<()>;
    fn remove_column(&mut self, key: &FieldKey) -> Result<()>;
    fn load_stats(&mut self) -> Result<String>;
    fn detail_url(&self, id: PatientId) -> String;
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    Completed {
        request_id: u64,
        records: Vec<PatientRecord>,
    },
    Failed {
        request_id: u64,
        error: String,
    },
}

impl SearchEvent {
    fn request_id(&self) -> u64 {
        match self {
            Self::Completed { request_id, .. } | Self::Failed { request_id, .. } => *request_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InternalEvent {
    ClearStatus { token: u64 },
    Search(SearchEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DetailView {
    id: PatientId,
    lines: Vec<(String, String)>,
    url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct NewColumnDraft {
    column_name: String,
    display_name: String,
    data_type: usize,
    field: usize,
}

impl NewColumnDraft {
    const FIELDS: usize = 3;

    fn data_type(&self) -> ColumnDataType {
        ColumnDataType::ALL[self.data_type % ColumnDataType::ALL.len()]
    }

    fn text_mut(&mut self) -> Option<&mut String> {
        match self.field {
            0 => Some(&mut self.column_name),
            1 => Some(&mut self.display_name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct ColumnsUiState {
    catalog: Vec<ColumnDefinition>,
    cursor: usize,
    load_error: Option<String>,
    draft: Option<NewColumnDraft>,
}

#[derive(Debug, Clone)]
struct ViewData {
    columns: ColumnConfig,
    records: Vec<PatientRecord>,
    projection: TableProjection,
    selected_row: usize,
    selected_col: usize,
    strip: ActionStrip,
    debouncer: Debouncer,
    sequencer: SearchSequencer,
    create_form: RecordForm,
    edit_form: Option<RecordForm>,
    invoice: InvoiceComposer,
    detail: Option<DetailView>,
    columns_ui: ColumnsUiState,
    stats: Option<String>,
    status_token: u64,
}

impl ViewData {
    fn new(columns: ColumnConfig) -> Self {
        Self {
            create_form: RecordForm::build(&columns, CREATE_SUBMIT_LABEL),
            projection: project_records(&[], &columns),
            columns,
            records: Vec::new(),
            selected_row: 0,
            selected_col: 0,
            strip: ActionStrip::default(),
            debouncer: Debouncer::default(),
            sequencer: SearchSequencer::default(),
            edit_form: None,
            invoice: InvoiceComposer::default(),
            detail: None,
            columns_ui: ColumnsUiState::default(),
            stats: None,
            status_token: 0,
        }
    }
}

pub fn run_app<R: AppRuntime>(state: &mut AppState, runtime: &mut R) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, terminal::EnterAlternateScreen).context("enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let (internal_tx, internal_rx) = mpsc::channel();
    let mut view_data = initialize(state, runtime, &internal_tx);

    let mut result = Ok(());
    loop {
        process_internal_events(state, &mut view_data, &internal_tx, &internal_rx);
        tick_search(state, runtime, &mut view_data, &internal_tx, Instant::now());

        if let Err(error) = terminal.draw(|frame| render(frame, state, &view_data)) {
            result = Err(error).context("draw frame");
            break;
        }

        let has_event = event::poll(Duration::from_millis(120)).context("poll event")?;
        if has_event
            && let Event::Key(key) = event::read().context("read event")?
            && handle_key_event(state, runtime, &mut view_data, &internal_tx, key)
        {
            break;
        }
    }

    disable_raw_mode().context("disable raw mode")?;
    execute!(io::stdout(), terminal::LeaveAlternateScreen).context("leave alternate screen")?;
    result
}

fn initialize<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    internal_tx: &Sender<InternalEvent>,
) -> ViewData {
    let mut view_data = ViewData::new(runtime.resolve_columns());
    if view_data.columns.is_empty() {
        emit_status(
            state,
            &mut view_data,
            internal_tx,
            "no columns configured for this role -- check [session].role",
        );
    }
    refresh_stats(runtime, &mut view_data);
    let query = state.query.clone();
    request_search(state, runtime, &mut view_data, internal_tx, &query);
    view_data
}

fn process_internal_events(
    state: &mut AppState,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    rx: &Receiver<InternalEvent>,
) {
    while let Ok(event) = rx.try_recv() {
        match event {
            InternalEvent::ClearStatus { token } if token == view_data.status_token => {
                state.dispatch(AppCommand::ClearStatus);
            }
            InternalEvent::ClearStatus { .. } => {}
            InternalEvent::Search(event) => handle_search_event(state, view_data, tx, event),
        }
    }
}

fn handle_search_event(
    state: &mut AppState,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    event: SearchEvent,
) {
    let request_id = event.request_id();
    if !view_data.sequencer.is_latest(request_id) {
        tracing::debug!(
            request_id,
            latest = view_data.sequencer.latest(),
            "stale search response dropped"
        );
        return;
    }
    match event {
        SearchEvent::Completed { records, .. } => apply_records(view_data, records),
        SearchEvent::Failed { error, .. } => {
            emit_status(state, view_data, tx, format!("search failed: {error}"));
        }
    }
}

/// Replaces the table wholesale; the open action strip does not survive.
fn apply_records(view_data: &mut ViewData, records: Vec<PatientRecord>) {
    view_data.records = records;
    view_data.strip.close();
    rebuild_projection(view_data);
}

fn rebuild_projection(view_data: &mut ViewData) {
    view_data.projection = project_records(&view_data.records, &view_data.columns);
    let rows = view_data.projection.row_count();
    let columns = view_data.projection.column_count();
    view_data.selected_row = view_data.selected_row.min(rows.saturating_sub(1));
    view_data.selected_col = view_data.selected_col.min(columns.saturating_sub(1));
}

fn request_search<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    query: &str,
) {
    let request_id = view_data.sequencer.issue();
    if let Err(error) = runtime.spawn_search(request_id, query, internal_tx.clone()) {
        emit_status(
            state,
            view_data,
            internal_tx,
            format!("search failed: {error:#}"),
        );
    }
}

fn tick_search<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    now: Instant,
) {
    if let Some(query) = view_data.debouncer.poll(now) {
        request_search(state, runtime, view_data, internal_tx, &query);
    }
}

fn refresh_stats<R: AppRuntime>(runtime: &mut R, view_data: &mut ViewData) {
    view_data.stats = match runtime.load_stats() {
        Ok(stats) if !stats.is_empty() => Some(stats),
        Ok(_) => None,
        Err(error) => {
            tracing::warn!("statistics unavailable: {error:#}");
            None
        }
    };
}

/// One table refresh with the current query, plus the header statistics.
fn refresh_after_mutation<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    view_data.debouncer.cancel();
    let query = state.query.clone();
    request_search(state, runtime, view_data, internal_tx, &query);
    refresh_stats(runtime, view_data);
}

fn schedule_status_clear(internal_tx: &Sender<InternalEvent>, token: u64) {
    let sender = internal_tx.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_secs(4));
        let _ = sender.send(InternalEvent::ClearStatus { token });
    });
}

fn emit_status(
    state: &mut AppState,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    message: impl Into<String>,
) {
    state.dispatch(AppCommand::SetStatus(message.into()));
    view_data.status_token = view_data.status_token.saturating_add(1);
    schedule_status_clear(internal_tx, view_data.status_token);
}

fn is_ctrl(key: &KeyEvent, c: char) -> bool {
    key.code == KeyCode::Char(c) && key.modifiers.contains(KeyModifiers::CONTROL)
}

fn is_plain_char(key: &KeyEvent) -> Option<char> {
    match key.code {
        KeyCode::Char(c)
            if !key
                .modifiers
                .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) =>
        {
            Some(c)
        }
        _ => None,
    }
}

fn handle_key_event<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) -> bool {
    if is_ctrl(&key, 'q') {
        return true;
    }

    match state.mode {
        AppMode::Help => {
            if matches!(key.code, KeyCode::Esc | KeyCode::Char('?')) {
                state.dispatch(AppCommand::Back);
            }
        }
        AppMode::Search => handle_search_key(state, runtime, view_data, internal_tx, key),
        AppMode::Browse => handle_browse_key(state, runtime, view_data, internal_tx, key),
        AppMode::Create | AppMode::Edit(_) => {
            handle_form_key(state, runtime, view_data, internal_tx, key);
        }
        AppMode::ConfirmDelete(id) => {
            handle_confirm_delete_key(state, runtime, view_data, internal_tx, key, id);
        }
        AppMode::Detail(_) => {
            if matches!(
                key.code,
                KeyCode::Esc | KeyCode::Enter | KeyCode::Char('q') | KeyCode::Char('v')
            ) {
                view_data.detail = None;
                state.dispatch(AppCommand::Back);
            }
        }
        AppMode::Invoice(_) => handle_invoice_key(state, runtime, view_data, internal_tx, key),
        AppMode::Columns => handle_columns_key(state, runtime, view_data, internal_tx, key),
    }
    false
}

fn handle_search_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    match key.code {
        KeyCode::Enter => {
            view_data.debouncer.cancel();
            let query = state.query.clone();
            request_search(state, runtime, view_data, internal_tx, &query);
            state.dispatch(AppCommand::Back);
        }
        KeyCode::Esc => {
            state.dispatch(AppCommand::Back);
        }
        KeyCode::Backspace => {
            let mut query = state.query.clone();
            query.pop();
            set_query(state, view_data, query);
        }
        _ => {
            if let Some(c) = is_plain_char(&key) {
                let mut query = state.query.clone();
                query.push(c);
                set_query(state, view_data, query);
            }
        }
    }
}

fn set_query(state: &mut AppState, view_data: &mut ViewData, query: String) {
    if state.dispatch(AppCommand::SetQuery(query.clone())).is_empty() {
        return;
    }
    view_data.debouncer.push(query, Instant::now());
}

fn handle_browse_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    match key.code {
        KeyCode::Char('/') => {
            state.dispatch(AppCommand::FocusSearch);
        }
        KeyCode::Char('a') => {
            state.dispatch(AppCommand::OpenCreate);
        }
        KeyCode::Char('j') | KeyCode::Down => move_row(view_data, 1),
        KeyCode::Char('k') | KeyCode::Up => move_row(view_data, -1),
        KeyCode::Char('h') | KeyCode::Left => move_col(view_data, -1),
        KeyCode::Char('l') | KeyCode::Right => move_col(view_data, 1),
        KeyCode::Enter => {
            let Some(id) = selected_row_id(view_data) else {
                emit_status(state, view_data, internal_tx, "no patient selected");
                return;
            };
            view_data.strip.toggle(id);
        }
        KeyCode::Esc => view_data.strip.close(),
        KeyCode::Char('r') => {
            refresh_after_mutation(state, runtime, view_data, internal_tx);
            emit_status(state, view_data, internal_tx, "refreshing");
        }
        KeyCode::Char('c') => open_columns(state, runtime, view_data),
        KeyCode::Char('?') => {
            state.dispatch(AppCommand::OpenHelp);
        }
        KeyCode::Char(c) => {
            if let Some(action) = RowAction::for_key(c) {
                run_row_action(state, runtime, view_data, internal_tx, action);
            }
        }
        _ => {}
    }
}

fn move_row(view_data: &mut ViewData, delta: isize) {
    let rows = view_data.projection.row_count();
    if rows == 0 {
        return;
    }
    let next = (view_data.selected_row as isize + delta).clamp(0, rows as isize - 1);
    view_data.selected_row = next as usize;
}

fn move_col(view_data: &mut ViewData, delta: isize) {
    let columns = view_data.projection.column_count();
    if columns == 0 {
        return;
    }
    let next = (view_data.selected_col as isize + delta).clamp(0, columns as isize - 1);
    view_data.selected_col = next as usize;
}

fn selected_row_id(view_data: &ViewData) -> Option<PatientId> {
    view_data
        .projection
        .rows
        .get(view_data.selected_row)
        .and_then(|row| row.id)
}

fn run_row_action<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    action: RowAction,
) {
    let Some(id) = view_data.strip.open_row() else {
        emit_status(
            state,
            view_data,
            internal_tx,
            "press enter on a row to open its actions",
        );
        return;
    };
    match action {
        RowAction::Edit => open_edit(state, runtime, view_data, internal_tx, id),
        RowAction::Delete => {
            state.dispatch(AppCommand::ConfirmDelete(id));
        }
        RowAction::Detail => open_detail(state, runtime, view_data, internal_tx, id),
        RowAction::Invoice => open_invoice(state, view_data, internal_tx, id),
    }
}

/// The untouched record behind a table row.
fn row_snapshot(view_data: &ViewData, id: PatientId) -> Result<PatientRecord> {
    let row = view_data
        .projection
        .row_by_id(id)
        .ok_or_else(|| anyhow!("patient {id} is no longer listed -- refresh with r"))?;
    match &row.payload {
        Ok(payload) => payload.decode(),
        Err(error) => Err(anyhow!("record snapshot unavailable: {error}")),
    }
}

fn open_edit<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    id: PatientId,
) {
    let record = match runtime.fetch_patient(id) {
        Ok(record) => record,
        Err(error) => {
            emit_status(
                state,
                view_data,
                internal_tx,
                format!("cannot open patient {id}: {error:#}"),
            );
            return;
        }
    };
    let mut form = RecordForm::build(&view_data.columns, EDIT_SUBMIT_LABEL);
    form.populate(&record);
    view_data.edit_form = Some(form);
    state.dispatch(AppCommand::OpenEdit(id));
}

fn open_detail<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    id: PatientId,
) {
    let record = match row_snapshot(view_data, id) {
        Ok(record) => record,
        Err(error) => {
            emit_status(state, view_data, internal_tx, format!("{error:#}"));
            return;
        }
    };
    let lines = view_data
        .columns
        .keys()
        .iter()
        .map(|key| {
            let value = format_cell(key.as_str(), record.get(key.as_str())).full;
            (view_data.columns.label(key.as_str()).to_owned(), value)
        })
        .collect();
    view_data.detail = Some(DetailView {
        id,
        lines,
        url: runtime.detail_url(id),
    });
    state.dispatch(AppCommand::OpenDetail(id));
}

fn open_invoice(
    state: &mut AppState,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    id: PatientId,
) {
    let opened = row_snapshot(view_data, id).and_then(|record| view_data.invoice.open(id, &record));
    match opened {
        Ok(()) => {
            state.dispatch(AppCommand::OpenInvoice(id));
        }
        Err(error) => {
            emit_status(
                state,
                view_data,
                internal_tx,
                format!("invoice unavailable: {error:#}"),
            );
        }
    }
}

fn active_form_mut(mode: AppMode, view_data: &mut ViewData) -> Option<&mut RecordForm> {
    match mode {
        AppMode::Create => Some(&mut view_data.create_form),
        AppMode::Edit(_) => view_data.edit_form.as_mut(),
        _ => None,
    }
}

fn handle_form_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    if key.code == KeyCode::Esc {
        view_data.edit_form = None;
        state.dispatch(AppCommand::Back);
        return;
    }
    if is_ctrl(&key, 's') {
        submit_record_form(state, runtime, view_data, internal_tx);
        return;
    }

    let Some(form) = active_form_mut(state.mode, view_data) else {
        state.dispatch(AppCommand::Back);
        return;
    };
    let rejected = match key.code {
        KeyCode::Tab | KeyCode::Down => {
            form.move_cursor(1);
            None
        }
        KeyCode::BackTab | KeyCode::Up => {
            form.move_cursor(-1);
            None
        }
        KeyCode::Backspace => {
            form.backspace();
            None
        }
        KeyCode::Enter => {
            if form.current().map(|field| field.widget) == Some(WidgetKind::TextArea) {
                form.insert_char('\n');
            } else {
                form.move_cursor(1);
            }
            None
        }
        _ => match is_plain_char(&key) {
            Some(c) if !form.insert_char(c) => form
                .current()
                .map(|field| format!("{} expects {}", field.label, field.widget.hint())),
            _ => None,
        },
    };
    if let Some(message) = rejected {
        emit_status(state, view_data, internal_tx, message);
    }
}

fn submit_record_form<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    let mode = state.mode;
    let Some(form) = active_form_mut(mode, view_data) else {
        return;
    };
    if let Err(error) = form.validate() {
        emit_status(state, view_data, internal_tx, error.to_string());
        return;
    }
    let payload = form.payload();

    let outcome = match mode {
        AppMode::Edit(id) => runtime
            .update_patient(id, &payload)
            .map(|()| format!("patient {id} updated")),
        _ => runtime
            .create_patient(&payload)
            .map(|()| "patient saved".to_owned()),
    };
    match outcome {
        Ok(message) => {
            if mode == AppMode::Create {
                view_data.create_form.clear();
            }
            view_data.edit_form = None;
            state.dispatch(AppCommand::Back);
            refresh_after_mutation(state, runtime, view_data, internal_tx);
            emit_status(state, view_data, internal_tx, message);
        }
        Err(error) => {
            let action = if mode == AppMode::Create {
                "save"
            } else {
                "update"
            };
            emit_status(
                state,
                view_data,
                internal_tx,
                format!("{action} failed: {error:#}"),
            );
        }
    }
}

fn handle_confirm_delete_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
    id: PatientId,
) {
    match key.code {
        KeyCode::Char('y') | KeyCode::Char('Y') => {
            state.dispatch(AppCommand::Back);
            match runtime.delete_patient(id) {
                Ok(()) => {
                    refresh_after_mutation(state, runtime, view_data, internal_tx);
                    emit_status(
                        state,
                        view_data,
                        internal_tx,
                        format!("patient {id} deleted"),
                    );
                }
                Err(error) => emit_status(
                    state,
                    view_data,
                    internal_tx,
                    format!("delete failed: {error:#}"),
                ),
            }
        }
        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
            state.dispatch(AppCommand::Back);
            emit_status(state, view_data, internal_tx, "delete canceled");
        }
        _ => {}
    }
}

fn handle_invoice_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    if key.code == KeyCode::Esc {
        view_data.invoice.close();
        state.dispatch(AppCommand::Back);
        emit_status(state, view_data, internal_tx, "invoice canceled");
        return;
    }
    if is_ctrl(&key, 's') {
        submit_invoice(state, runtime, view_data, internal_tx);
        return;
    }

    let Some(session) = view_data.invoice.session_mut() else {
        state.dispatch(AppCommand::Back);
        return;
    };
    let refused = if is_ctrl(&key, 'n') {
        session.add_article();
        None
    } else if is_ctrl(&key, 't') {
        session.add_section();
        None
    } else if is_ctrl(&key, 'd') {
        session.remove_article().err()
    } else if is_ctrl(&key, 'x') {
        session.remove_section().err()
    } else {
        match key.code {
            KeyCode::Tab | KeyCode::Down | KeyCode::Enter => session.move_focus(1),
            KeyCode::BackTab | KeyCode::Up => session.move_focus(-1),
            KeyCode::Backspace => session.backspace(),
            _ => {
                if let Some(c) = is_plain_char(&key) {
                    session.insert_char(c);
                }
            }
        }
        None
    };
    if let Some(error) = refused {
        emit_status(state, view_data, internal_tx, error.to_string());
    }
}

fn submit_invoice<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    let Some(session) = view_data.invoice.session() else {
        return;
    };
    let patient_id = session.patient_id();
    let request = match session.request() {
        Ok(request) => request,
        Err(error) => {
            emit_status(state, view_data, internal_tx, error.to_string());
            return;
        }
    };
    match runtime.generate_invoice(patient_id, &request) {
        Ok(path) => {
            view_data.invoice.close();
            state.dispatch(AppCommand::Back);
            emit_status(
                state,
                view_data,
                internal_tx,
                format!("invoice saved to {}", path.display()),
            );
        }
        Err(error) => emit_status(
            state,
            view_data,
            internal_tx,
            format!("Erreur lors de la génération du PDF: {error:#}"),
        ),
    }
}

fn open_columns<R: AppRuntime>(state: &mut AppState, runtime: &mut R, view_data: &mut ViewData) {
    reload_catalog(runtime, view_data);
    view_data.columns_ui.cursor = 0;
    view_data.columns_ui.draft = None;
    state.dispatch(AppCommand::OpenColumns);
}

fn reload_catalog<R: AppRuntime>(runtime: &mut R, view_data: &mut ViewData) {
    let ui = &mut view_data.columns_ui;
    match runtime.column_catalog() {
        Ok(catalog) => {
            ui.catalog = catalog;
            ui.load_error = None;
        }
        Err(error) => {
            tracing::warn!("column catalog unavailable: {error:#}");
            ui.catalog.clear();
            ui.load_error = Some(format!("{error:#}"));
        }
    }
    ui.cursor = ui.cursor.min(ui.catalog.len().saturating_sub(1));
}

/// Re-resolves the visible columns and rebuilds everything derived from them.
fn apply_column_change<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    let columns = runtime.resolve_columns();
    view_data.create_form.rebuild(&columns);
    view_data.columns = columns;
    rebuild_projection(view_data);
    reload_catalog(runtime, view_data);
    refresh_after_mutation(state, runtime, view_data, internal_tx);
}

fn handle_columns_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    if view_data.columns_ui.draft.is_some() {
        handle_new_column_key(state, runtime, view_data, internal_tx, key);
        return;
    }

    let selected = view_data
        .columns_ui
        .catalog
        .get(view_data.columns_ui.cursor)
        .cloned();
    let outcome = match key.code {
        KeyCode::Esc | KeyCode::Char('c') => {
            state.dispatch(AppCommand::Back);
            return;
        }
        KeyCode::Char('j') | KeyCode::Down => {
            let ui = &mut view_data.columns_ui;
            ui.cursor = (ui.cursor + 1).min(ui.catalog.len().saturating_sub(1));
            return;
        }
        KeyCode::Char('k') | KeyCode::Up => {
            view_data.columns_ui.cursor = view_data.columns_ui.cursor.saturating_sub(1);
            return;
        }
        KeyCode::Char('a') => {
            view_data.columns_ui.draft = Some(NewColumnDraft::default());
            return;
        }
        KeyCode::Char(' ') | KeyCode::Char('v') => {
            let Some(column) = selected else {
                return;
            };
            let visible = !column.is_visible;
            let guard = if visible {
                Ok(())
            } else {
                ensure_column_can_hide(column.column_name.as_str())
            };
            guard
                .and_then(|()| runtime.toggle_column(&column.column_name, visible))
                .map(|()| {
                    let shown = if visible { "shown" } else { "hidden" };
                    format!("column {} {shown}", column.column_name)
                })
        }
        KeyCode::Char('X') => {
            let Some(column) = selected else {
                return;
            };
            ensure_column_can_remove(column.column_name.as_str())
                .and_then(|()| runtime.remove_column(&column.column_name))
                .map(|()| format!("column {} removed", column.column_name))
        }
        _ => return,
    };

    match outcome {
        Ok(message) => {
            apply_column_change(state, runtime, view_data, internal_tx);
            emit_status(state, view_data, internal_tx, message);
        }
        Err(error) => emit_status(state, view_data, internal_tx, format!("{error:#}")),
    }
}

fn handle_new_column_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    let Some(draft) = view_data.columns_ui.draft.as_mut() else {
        return;
    };
    match key.code {
        KeyCode::Esc => {
            view_data.columns_ui.draft = None;
            return;
        }
        KeyCode::Tab | KeyCode::Down => {
            draft.field = (draft.field + 1) % NewColumnDraft::FIELDS;
            return;
        }
        KeyCode::BackTab | KeyCode::Up => {
            draft.field = (draft.field + NewColumnDraft::FIELDS - 1) % NewColumnDraft::FIELDS;
            return;
        }
        KeyCode::Left if draft.field == 2 => {
            let len = ColumnDataType::ALL.len();
            draft.data_type = (draft.data_type + len - 1) % len;
            return;
        }
        KeyCode::Right if draft.field == 2 => {
            draft.data_type = (draft.data_type + 1) % ColumnDataType::ALL.len();
            return;
        }
        KeyCode::Backspace => {
            if let Some(text) = draft.text_mut() {
                text.pop();
            }
            return;
        }
        KeyCode::Enter => {}
        _ if is_ctrl(&key, 's') => {}
        _ => {
            if let (Some(c), Some(text)) = (is_plain_char(&key), draft.text_mut()) {
                text.push(c);
            }
            return;
        }
    }

    let outcome = NewColumn::parse(&draft.column_name, &draft.display_name, draft.data_type())
        .and_then(|column| {
            runtime.add_column(&column)?;
            Ok(column)
        });
    match outcome {
        Ok(column) => {
            view_data.columns_ui.draft = None;
            apply_column_change(state, runtime, view_data, internal_tx);
            emit_status(
                state,
                view_data,
                internal_tx,
                format!("column {} added", column.column_name),
            );
        }
        Err(error) => emit_status(state, view_data, internal_tx, format!("{error:#}")),
    }
}

fn render(frame: &mut ratatui::Frame<'_>, state: &AppState, view_data: &ViewData) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(1),
            Constraint::Length(4),
        ])
        .split(frame.area());

    let header = Paragraph::new(header_text(state, view_data))
        .block(Block::default().title("cabinet").borders(Borders::ALL));
    frame.render_widget(header, layout[0]);

    render_table(frame, layout[1], view_data);

    let footer = Paragraph::new(footer_text(state, view_data))
        .style(Style::default().fg(Color::Yellow))
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(footer, layout[2]);

    let overlay = match state.mode {
        AppMode::Browse | AppMode::Search => None,
        AppMode::Create => Some((
            "nouveau patient".to_owned(),
            render_form_text(&view_data.create_form),
            (70, 80),
        )),
        AppMode::Edit(id) => view_data
            .edit_form
            .as_ref()
            .map(|form| (format!("patient {id}"), render_form_text(form), (70, 80))),
        AppMode::Invoice(id) => view_data
            .invoice
            .session()
            .map(|session| (format!("facture patient {id}"), render_invoice_text(session), (76, 86))),
        AppMode::ConfirmDelete(id) => Some((
            "supprimer".to_owned(),
            format!("Supprimer le patient {id} ?\n\n[y] oui   [n] non"),
            (40, 20),
        )),
        AppMode::Detail(id) => view_data
            .detail
            .as_ref()
            .map(|detail| (format!("patient {id}"), render_detail_text(detail), (70, 80))),
        AppMode::Columns => Some((
            "colonnes".to_owned(),
            render_columns_text(&view_data.columns_ui),
            (64, 70),
        )),
        AppMode::Help => Some(("help".to_owned(), help_overlay_text().to_owned(), (80, 60))),
    };
    if let Some((title, body, (percent_x, percent_y))) = overlay {
        let area = centered_rect(percent_x, percent_y, frame.area());
        frame.render_widget(Clear, area);
        let widget = Paragraph::new(body).block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .style(Style::default().fg(Color::Cyan)),
        );
        frame.render_widget(widget, area);
    }
}

fn header_text(state: &AppState, view_data: &ViewData) -> String {
    let cursor = if state.mode == AppMode::Search {
        "▏"
    } else {
        ""
    };
    match &view_data.stats {
        Some(stats) => format!("recherche: {}{cursor} | {stats}", state.query),
        None => format!("recherche: {}{cursor}", state.query),
    }
}

fn render_table(frame: &mut ratatui::Frame<'_>, area: Rect, view_data: &ViewData) {
    let projection = &view_data.projection;
    let title = format!("patients ({}/{PAGE_SIZE})", projection.row_count());
    if projection.columns.is_empty() {
        let empty = Paragraph::new("no columns to display")
            .block(Block::default().borders(Borders::ALL).title(title));
        frame.render_widget(empty, area);
        return;
    }

    let widths = vec![Constraint::Min(8); projection.column_count()];
    let header = Row::new(projection.columns.iter().map(|column| {
        Cell::from(column.label.clone()).style(
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
    }));

    let mut rows = Vec::with_capacity(projection.row_count() + 1);
    for (row_index, row) in projection.rows.iter().enumerate() {
        let selected_row = row_index == view_data.selected_row;
        let cells = row
            .cells
            .iter()
            .enumerate()
            .map(|(column_index, cell)| {
                let mut style = Style::default();
                if selected_row {
                    style = style.bg(Color::DarkGray);
                }
                if selected_row && column_index == view_data.selected_col {
                    style = Style::default()
                        .fg(Color::Black)
                        .bg(Color::Cyan)
                        .add_modifier(Modifier::BOLD);
                }
                Cell::from(cell.text.clone()).style(style)
            })
            .collect::<Vec<_>>();
        rows.push(Row::new(cells));

        if let Some(id) = row.id
            && view_data.strip.is_open(id)
        {
            rows.push(
                Row::new(action_strip_cells(projection.column_count()))
                    .style(Style::default().fg(Color::Cyan)),
            );
        }
    }

    let table = Table::new(rows, widths)
        .header(header)
        .column_spacing(1)
        .block(Block::default().title(title).borders(Borders::ALL));
    frame.render_widget(table, area);
}

/// One action per cell; the surplus collapses into the last column.
fn action_strip_cells(columns: usize) -> Vec<String> {
    let labels: Vec<String> = RowAction::ALL
        .iter()
        .map(|action| format!("[{}] {}", action.key(), action.label()))
        .collect();
    let columns = columns.max(1);
    if labels.len() <= columns {
        let mut cells = labels;
        if let Some(first) = cells.first_mut() {
            *first = format!("{STRIP_MARK} {first}");
        }
        return cells;
    }
    let mut cells: Vec<String> = labels[..columns - 1].to_vec();
    cells.push(labels[columns - 1..].join(" "));
    if let Some(first) = cells.first_mut() {
        *first = format!("{STRIP_MARK} {first}");
    }
    cells
}

fn footer_text(state: &AppState, view_data: &ViewData) -> String {
    let status = status_text(state, view_data);
    match selected_cell_tooltip(view_data) {
        Some(tooltip) => format!("{status}\n{tooltip}"),
        None => status,
    }
}

/// Full value of the selected cell when the table shows it truncated.
fn selected_cell_tooltip(view_data: &ViewData) -> Option<String> {
    let row = view_data.projection.rows.get(view_data.selected_row)?;
    let cell = row.cells.get(view_data.selected_col)?;
    if !cell.is_truncated() {
        return None;
    }
    let label = view_data
        .projection
        .columns
        .get(view_data.selected_col)
        .map_or("", |column| column.label.as_str());
    Some(format!("{label}: {}", cell.full))
}

fn status_text(state: &AppState, view_data: &ViewData) -> String {
    let mode = state.mode.label().to_uppercase();
    let hints = match state.mode {
        AppMode::Browse if view_data.strip.open_row().is_some() => {
            "e edit | d delete | v detail | f invoice | esc close | ctrl+q quit"
        }
        AppMode::Browse => {
            "/ search | a new | j/k move | enter actions | r refresh | c columns | ? help | ctrl+q quit"
        }
        AppMode::Search => "type to filter | enter search now | esc back",
        AppMode::Create | AppMode::Edit(_) => {
            "tab/shift+tab field | ctrl+s submit | esc cancel"
        }
        AppMode::Invoice(_) => {
            "tab field | ctrl+n article | ctrl+t section | ctrl+d/ctrl+x remove | ctrl+s generate | esc cancel"
        }
        AppMode::ConfirmDelete(_) => "y confirm | n cancel",
        AppMode::Detail(_) => "esc close",
        AppMode::Columns => "j/k move | space show/hide | a add | X remove | esc close",
        AppMode::Help => "esc close",
    };
    match &state.status_line {
        Some(status) => format!("{mode} | {status} | {hints}"),
        None => format!("{mode} | {hints}"),
    }
}

fn render_form_text(form: &RecordForm) -> String {
    let mut lines = Vec::with_capacity(form.fields().len() + 2);
    for (index, field) in form.fields().iter().enumerate() {
        let focused = index == form.cursor();
        let marker = if focused { ">" } else { " " };
        let required = if field.required { "*" } else { "" };
        let value = field.value.replace('\n', " ⏎ ");
        let hint = field.widget.hint();
        if focused && !hint.is_empty() {
            lines.push(format!(
                "{marker} {}{required}: {value}▏ ({hint})",
                field.label
            ));
        } else if focused {
            lines.push(format!("{marker} {}{required}: {value}▏", field.label));
        } else {
            lines.push(format!("{marker} {}{required}: {value}", field.label));
        }
    }
    lines.push(String::new());
    lines.push(format!("[ctrl+s] {}   [esc] annuler", form.submit().label));
    lines.join("\n")
}

fn render_invoice_text(session: &InvoiceSession) -> String {
    let focus = session.focus();
    let mut lines = Vec::new();
    for slot in session.slots() {
        let marker = if slot == focus { ">" } else { " " };
        let value = session.value(slot);
        let line = match slot {
            InvoiceSlot::Meta(field) => format!("{marker} {}: {value}", field.label()),
            InvoiceSlot::SectionTitle { section } => {
                lines.push(String::new());
                format!("{marker} Section {} titre: {value}", section + 1)
            }
            InvoiceSlot::Article {
                section,
                article,
                part,
            } => format!(
                "{marker}   {}.{} {}: {value}",
                section + 1,
                article + 1,
                part.label()
            ),
        };
        lines.push(line);
    }
    lines.push(String::new());
    lines.push("[ctrl+s] Générer la facture   [esc] annuler".to_owned());
    lines.join("\n")
}

fn render_detail_text(detail: &DetailView) -> String {
    let mut lines: Vec<String> = detail
        .lines
        .iter()
        .map(|(label, value)| format!("{label}: {value}"))
        .collect();
    lines.push(String::new());
    lines.push(format!("fiche patient {}: {}", detail.id, detail.url));
    lines.join("\n")
}

fn render_columns_text(ui: &ColumnsUiState) -> String {
    let mut lines = Vec::with_capacity(ui.catalog.len() + 4);
    if let Some(error) = &ui.load_error {
        lines.push(format!("column list unavailable: {error}"));
    }
    for (index, column) in ui.catalog.iter().enumerate() {
        let marker = if index == ui.cursor { ">" } else { " " };
        let visible = if column.is_visible { "x" } else { " " };
        lines.push(format!(
            "{marker} [{visible}] {} ({}, {})",
            column.display_name, column.column_name, column.data_type
        ));
    }
    if let Some(draft) = &ui.draft {
        let mark = |field: usize| if draft.field == field { ">" } else { " " };
        lines.push(String::new());
        lines.push("nouvelle colonne".to_owned());
        lines.push(format!("{} nom technique: {}", mark(0), draft.column_name));
        lines.push(format!("{} libellé: {}", mark(1), draft.display_name));
        lines.push(format!(
            "{} type: < {} >",
            mark(2),
            draft.data_type().as_str()
        ));
        lines.push("[enter] ajouter   [esc] annuler".to_owned());
    }
    lines.join("\n")
}

fn help_overlay_text() -> &'static str {
    "global: ctrl+q quit | ? help\n\
table: j/k rows | h/l cells | enter open/close row actions | / search | a new patient | r refresh | c columns\n\
row actions: e edit | d delete (y/n) | v detail | f invoice | esc close\n\
form: tab/shift+tab field | enter next field (newline in long text) | ctrl+s submit | esc cancel\n\
invoice: tab/shift+tab field | ctrl+n add article | ctrl+t add section | ctrl+d remove article | ctrl+x remove section | ctrl+s generate | esc cancel\n\
columns: j/k move | space show/hide | a add | X remove | esc close"
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
