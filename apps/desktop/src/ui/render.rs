//! Text rendering of routed screens, run behind a panic/error boundary.

use std::{
    any::Any,
    fmt::Write as _,
    panic::{self, AssertUnwindSafe},
};

use anyhow::{bail, Result};
use shared::domain::{OrganizationProfile, DEFAULT_BRAND_COLOR};

use crate::controller::router::{AppView, Screen, WizardStep};

const VIEWS: [AppView; 6] = [
    AppView::Dashboard,
    AppView::Editor,
    AppView::History,
    AppView::Reports,
    AppView::Catalog,
    AppView::Clients,
];
const STEPS: [WizardStep; 4] = [
    WizardStep::Company,
    WizardStep::Client,
    WizardStep::Items,
    WizardStep::Preview,
];

/// Renders `screen`, turning both errors and panics into a message for the fatal screen.
pub fn render_with_boundary(screen: &Screen) -> Result<String, String> {
    match panic::catch_unwind(AssertUnwindSafe(|| render(screen))) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

pub fn render(screen: &Screen) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "== OrçaFácil [{}] ==", screen.id())?;
    match screen {
        Screen::Loading => writeln!(out, "Loading your account...")?,
        Screen::Fatal { message } => {
            writeln!(out, "Something went wrong: {message}")?;
            writeln!(out, "Type 'reload' to start again.")?;
        }
        Screen::Login => {
            writeln!(out, "Sign in to manage your quotes.")?;
            writeln!(out, "  login <email> <password>   |   signup ...   |   oauth")?;
        }
        Screen::Onboarding { identity, notice } => {
            if let Some(notice) = notice {
                writeln!(out, "! {notice}")?;
            }
            writeln!(out, "Welcome, {}. Register your company to continue.", identity.display_name)?;
            writeln!(
                out,
                "  onboard legal_name=.. trade_name=.. tax_id=.. phone=.. (email defaults to {})",
                identity.email
            )?;
        }
        Screen::Main {
            view,
            step,
            identity,
            profile,
        } => {
            // Stored rows may predate color validation.
            let (r, g, b) = parse_brand_color(&profile.brand_color)
                .or_else(|_| parse_brand_color(DEFAULT_BRAND_COLOR))?;
            writeln!(
                out,
                "\x1b[38;2;{r};{g};{b}m■\x1b[0m {} ({}) | {}",
                profile.trade_name, profile.tax_id, identity.display_name
            )?;
            let tabs: Vec<String> = VIEWS
                .iter()
                .map(|candidate| {
                    if candidate == view {
                        format!("[{}]", candidate.as_str())
                    } else {
                        candidate.as_str().to_string()
                    }
                })
                .collect();
            writeln!(out, "{}", tabs.join(" "))?;
            render_view(&mut out, *view, *step, profile)?;
        }
    }
    Ok(out)
}

fn render_view(
    out: &mut String,
    view: AppView,
    step: Option<WizardStep>,
    profile: &OrganizationProfile,
) -> Result<()> {
    match view {
        AppView::Dashboard => {
            writeln!(out, "Dashboard for {}", profile.legal_name)?;
            writeln!(out, "  new-quote to start a quote, resume-quote to finish the last one")?;
        }
        AppView::Editor => {
            let Some(step) = step else {
                bail!("editor rendered without a wizard step");
            };
            let trail: Vec<String> = STEPS
                .iter()
                .map(|candidate| {
                    let label = format!("{}.{}", candidate.index() + 1, candidate.as_str());
                    if *candidate == step {
                        format!("[{label}]")
                    } else {
                        label
                    }
                })
                .collect();
            writeln!(out, "Quote editor: {}", trail.join(" > "))?;
            match step {
                WizardStep::Company => writeln!(
                    out,
                    "  Issuer: {} <{}> {}",
                    profile.legal_name, profile.email, profile.phone
                )?,
                WizardStep::Client => writeln!(out, "  Choose or register the client")?,
                WizardStep::Items => writeln!(out, "  Add products and services")?,
                WizardStep::Preview => writeln!(out, "  Review the quote before sending")?,
            }
            writeln!(out, "  next | back | step <n> | dashboard")?;
        }
        AppView::History => writeln!(out, "Quote history")?,
        AppView::Reports => writeln!(out, "Reports")?,
        AppView::Catalog => writeln!(out, "Product and service catalog")?,
        AppView::Clients => writeln!(out, "Clients")?,
    }
    Ok(())
}

fn parse_brand_color(color: &str) -> Result<(u8, u8, u8)> {
    let hex = color.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("invalid brand color '{color}'");
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16);
    Ok((channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("render panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("render panicked: {message}")
    } else {
        "render panicked".to_string()
    }
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
