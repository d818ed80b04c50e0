//! Pure mapping from bootstrap state and navigation to the screen to show.

use std::str::FromStr;

use client_core::BootstrapState;
use shared::domain::{Identity, OrganizationProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppView {
    #[default]
    Dashboard,
    Editor,
    History,
    Reports,
    Catalog,
    Clients,
}

impl AppView {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dashboard => "dashboard",
            Self::Editor => "editor",
            Self::History => "history",
            Self::Reports => "reports",
            Self::Catalog => "catalog",
            Self::Clients => "clients",
        }
    }
}

impl FromStr for AppView {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dashboard" => Ok(Self::Dashboard),
            "editor" => Ok(Self::Editor),
            "history" => Ok(Self::History),
            "reports" => Ok(Self::Reports),
            "catalog" => Ok(Self::Catalog),
            "clients" => Ok(Self::Clients),
            other => Err(format!("unknown view '{other}'")),
        }
    }
}

/// Steps of the quote editor wizard, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum WizardStep {
    #[default]
    Company,
    Client,
    Items,
    Preview,
}

impl WizardStep {
    pub const LAST: Self = Self::Preview;

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn clamped(index: i64) -> Self {
        match index {
            i64::MIN..=0 => Self::Company,
            1 => Self::Client,
            2 => Self::Items,
            _ => Self::Preview,
        }
    }

    pub fn next(self) -> Self {
        Self::clamped(i64::from(self.index()) + 1)
    }

    pub fn previous(self) -> Self {
        Self::clamped(i64::from(self.index()) - 1)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Company => "company",
            Self::Client => "client",
            Self::Items => "items",
            Self::Preview => "preview",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavIntent {
    Open(AppView),
    NewQuote,
    ResumeQuote,
    Next,
    Back,
    JumpTo(i64),
    Dashboard,
}

/// Where the signed-in user is inside the main application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Navigation {
    view: AppView,
    step: WizardStep,
}

impl Navigation {
    pub fn view(&self) -> AppView {
        self.view
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    /// Returns whether anything changed. Step intents only act inside the editor.
    pub fn apply(&mut self, intent: NavIntent) -> bool {
        let before = *self;
        match intent {
            NavIntent::Open(view) => self.view = view,
            NavIntent::NewQuote => {
                self.view = AppView::Editor;
                self.step = WizardStep::Company;
            }
            NavIntent::ResumeQuote => {
                self.view = AppView::Editor;
                self.step = WizardStep::LAST;
            }
            NavIntent::Next if self.view == AppView::Editor => self.step = self.step.next(),
            NavIntent::Back if self.view == AppView::Editor => self.step = self.step.previous(),
            NavIntent::JumpTo(index) if self.view == AppView::Editor => {
                self.step = WizardStep::clamped(index)
            }
            NavIntent::Next | NavIntent::Back | NavIntent::JumpTo(_) => {}
            NavIntent::Dashboard => self.view = AppView::Dashboard,
        }
        *self != before
    }

    /// Drops navigation once nobody is signed in.
    pub fn sync_with(&mut self, state: &BootstrapState) -> bool {
        if matches!(state, BootstrapState::LoggedOut) && *self != Self::default() {
            *self = Self::default();
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    Loading,
    Fatal {
        message: String,
    },
    Login,
    Onboarding {
        identity: Identity,
        notice: Option<String>,
    },
    Main {
        view: AppView,
        step: Option<WizardStep>,
        identity: Identity,
        profile: OrganizationProfile,
    },
}

impl Screen {
    pub fn id(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Fatal { .. } => "error",
            Self::Login => "login",
            Self::Onboarding { .. } => "onboarding",
            Self::Main { view, step, .. } => match (view, step) {
                (AppView::Editor, Some(WizardStep::Company)) => "editor/company",
                (AppView::Editor, Some(WizardStep::Client)) => "editor/client",
                (AppView::Editor, Some(WizardStep::Items)) => "editor/items",
                (AppView::Editor, _) => "editor/preview",
                (view, _) => view.as_str(),
            },
        }
    }
}

pub fn route(state: &BootstrapState, nav: &Navigation) -> Screen {
    match state {
        BootstrapState::Loading => Screen::Loading,
        BootstrapState::Fatal { message } => Screen::Fatal {
            message: message.clone(),
        },
        BootstrapState::LoggedOut => Screen::Login,
        BootstrapState::Onboarding { identity, notice } => Screen::Onboarding {
            identity: identity.clone(),
            notice: notice.clone(),
        },
        BootstrapState::Ready { identity, profile } => Screen::Main {
            view: nav.view,
            step: (nav.view == AppView::Editor).then_some(nav.step),
            identity: identity.clone(),
            profile: profile.clone(),
        },
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
