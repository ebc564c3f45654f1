// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::PatientId;

/// Which surface owns the keyboard. At most one modal is open at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Browse,
    Search,
    Create,
    Edit(PatientId),
    Invoice(PatientId),
    ConfirmDelete(PatientId),
    Detail(PatientId),
    Columns,
    Help,
}

impl AppMode {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Browse => "browse",
            Self::Search => "search",
            Self::Create => "new patient",
            Self::Edit(_) => "edit",
            Self::Invoice(_) => "invoice",
            Self::ConfirmDelete(_) => "delete",
            Self::Detail(_) => "detail",
            Self::Columns => "columns",
            Self::Help => "help",
        }
    }

    pub const fn is_modal(self) -> bool {
        !matches!(self, Self::Browse | Self::Search)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppState {
    pub mode: AppMode,
    pub query: String,
    pub status_line: Option<String>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            mode: AppMode::Browse,
            query: String::new(),
            status_line: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    FocusSearch,
    SetQuery(String),
    OpenCreate,
    OpenEdit(PatientId),
    OpenInvoice(PatientId),
    ConfirmDelete(PatientId),
    OpenDetail(PatientId),
    OpenColumns,
    OpenHelp,
    Back,
    SetStatus(String),
    ClearStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    ModeChanged(AppMode),
    QueryChanged(String),
    StatusUpdated(String),
    StatusCleared,
}

impl AppState {
    pub fn dispatch(&mut self, command: AppCommand) -> Vec<AppEvent> {
        match command {
            AppCommand::FocusSearch => self.enter(AppMode::Search),
            AppCommand::SetQuery(query) => {
                if query == self.query {
                    return Vec::new();
                }
                self.query = query;
                vec![AppEvent::QueryChanged(self.query.clone())]
            }
            AppCommand::OpenCreate => self.open_modal(AppMode::Create),
            AppCommand::OpenEdit(id) => self.open_modal(AppMode::Edit(id)),
            AppCommand::OpenInvoice(id) => self.open_modal(AppMode::Invoice(id)),
            AppCommand::ConfirmDelete(id) => {
                let mut events = self.open_modal(AppMode::ConfirmDelete(id));
                if self.mode == AppMode::ConfirmDelete(id) {
                    events.push(self.set_status(&format!("delete patient {id}? (y/n)")));
                }
                events
            }
            AppCommand::OpenDetail(id) => self.open_modal(AppMode::Detail(id)),
            AppCommand::OpenColumns => self.open_modal(AppMode::Columns),
            AppCommand::OpenHelp => self.open_modal(AppMode::Help),
            AppCommand::Back => {
                if self.mode == AppMode::Browse {
                    return Vec::new();
                }
                self.mode = AppMode::Browse;
                vec![AppEvent::ModeChanged(self.mode)]
            }
            AppCommand::SetStatus(message) => vec![self.set_status(&message)],
            AppCommand::ClearStatus => {
                self.status_line = None;
                vec![AppEvent::StatusCleared]
            }
        }
    }

    fn enter(&mut self, mode: AppMode) -> Vec<AppEvent> {
        if self.mode == mode {
            return Vec::new();
        }
        self.mode = mode;
        vec![AppEvent::ModeChanged(mode)]
    }

    /// Modals only open from the table; another open modal must be closed
    /// first.
    fn open_modal(&mut self, mode: AppMode) -> Vec<AppEvent> {
        if self.mode.is_modal() && self.mode != mode {
            let message = format!("close the {} view first", self.mode.label());
            return vec![self.set_status(&message)];
        }
        self.enter(mode)
    }

    fn set_status(&mut self, message: &str) -> AppEvent {
        self.status_line = Some(message.to_owned());
        AppEvent::StatusUpdated(message.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::{AppCommand, AppEvent, AppMode, AppState};
    use crate::PatientId;

    #[test]
    fn modal_opens_from_browse_and_back_returns() {
        let mut state = AppState::default();

        let events = state.dispatch(AppCommand::OpenEdit(PatientId::new(4)));
        assert_eq!(state.mode, AppMode::Edit(PatientId::new(4)));
        assert_eq!(
            events,
            vec![AppEvent::ModeChanged(AppMode::Edit(PatientId::new(4)))]
        );

        state.dispatch(AppCommand::Back);
        assert_eq!(state.mode, AppMode::Browse);
        assert!(state.dispatch(AppCommand::Back).is_empty());
    }

    #[test]
    fn second_modal_is_refused() {
        let mut state = AppState::default();
        state.dispatch(AppCommand::OpenCreate);

        let events = state.dispatch(AppCommand::OpenInvoice(PatientId::new(2)));
        assert_eq!(state.mode, AppMode::Create);
        assert_eq!(
            events,
            vec![AppEvent::StatusUpdated(
                "close the new patient view first".to_owned()
            )]
        );
    }

    #[test]
    fn delete_confirmation_prompts() {
        let mut state = AppState::default();
        let events = state.dispatch(AppCommand::ConfirmDelete(PatientId::new(9)));
        assert_eq!(state.mode, AppMode::ConfirmDelete(PatientId::new(9)));
        assert_eq!(
            events,
            vec![
                AppEvent::ModeChanged(AppMode::ConfirmDelete(PatientId::new(9))),
                AppEvent::StatusUpdated("delete patient 9? (y/n)".to_owned()),
            ]
        );
    }

    #[test]
    fn search_focus_is_not_modal() {
        let mut state = AppState::default();
        state.dispatch(AppCommand::FocusSearch);
        assert_eq!(state.mode, AppMode::Search);
        state.dispatch(AppCommand::OpenColumns);
        assert_eq!(state.mode, AppMode::Columns);
    }

    #[test]
    fn unchanged_query_emits_nothing() {
        let mut state = AppState::default();
        assert_eq!(
            state.dispatch(AppCommand::SetQuery("awa".to_owned())),
            vec![AppEvent::QueryChanged("awa".to_owned())]
        );
        assert!(state.dispatch(AppCommand::SetQuery("awa".to_owned())).is_empty());
    }

    #[test]
    fn clear_status() {
        let mut state = AppState::default();
        state.dispatch(AppCommand::SetStatus("saved".to_owned()));
        assert_eq!(state.status_line.as_deref(), Some("saved"));
        assert_eq!(state.dispatch(AppCommand::ClearStatus), vec![AppEvent::StatusCleared]);
        assert_eq!(state.status_line, None);
    }
}
