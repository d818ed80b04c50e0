//! Shell command parsing and the screen each command needs.

use client_core::{OAuthProvider, SignInForm, SignUpForm};
use shared::domain::{EntityType, Identity, ProfileDraft};
use url::Url;

use crate::controller::router::{AppView, NavIntent, Screen};

pub const HELP: &str = "\
commands:
  login <email> <password>
  signup name=.. email=.. password=.. confirm=.. [document=..] [whatsapp=..] [website=..]
  oauth [google]
  oauth-callback <redirect url>
  onboard legal_name=.. trade_name=.. tax_id=.. phone=.. [email=..] [address=..]
          [type=company|individual] [color=#rrggbb]
  open <dashboard|editor|history|reports|catalog|clients>
  new-quote | resume-quote | next | back | step <n> | dashboard
  logout | reload | help | quit
values containing spaces go in double quotes: legal_name=\"Souza Reformas LTDA\"";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OnboardArgs {
    pub legal_name: String,
    pub trade_name: String,
    pub tax_id: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: Option<String>,
    pub entity_type: EntityType,
    pub brand_color: Option<String>,
}

impl OnboardArgs {
    /// The e-mail defaults to the signed-in identity's.
    pub fn into_draft(self, identity: &Identity) -> ProfileDraft {
        let mut draft = ProfileDraft::for_identity(identity);
        draft.legal_name = self.legal_name;
        draft.trade_name = self.trade_name;
        draft.tax_id = self.tax_id;
        draft.phone = self.phone;
        if let Some(email) = self.email {
            draft.email = email;
        }
        draft.address = self.address;
        draft.entity_type = self.entity_type;
        draft.brand_color = self.brand_color;
        draft
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Help,
    Login(SignInForm),
    SignUp(SignUpForm),
    OAuth(OAuthProvider),
    OAuthCallback(Url),
    Onboard(OnboardArgs),
    Navigate(NavIntent),
    Logout,
    Reload,
    Quit,
}

impl ShellCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Help => "help",
            Self::Login(_) => "login",
            Self::SignUp(_) => "signup",
            Self::OAuth(_) => "oauth",
            Self::OAuthCallback(_) => "oauth_callback",
            Self::Onboard(_) => "onboard",
            Self::Navigate(_) => "navigate",
            Self::Logout => "logout",
            Self::Reload => "reload",
            Self::Quit => "quit",
        }
    }

    /// `Err` carries the inline message shown when the current screen cannot run the command.
    pub fn check_available(&self, screen: &Screen) -> Result<(), String> {
        let allowed = match self {
            Self::Help | Self::Quit | Self::Reload => true,
            Self::Login(_) | Self::SignUp(_) | Self::OAuth(_) | Self::OAuthCallback(_) => {
                matches!(screen, Screen::Login)
            }
            Self::Onboard(_) => matches!(screen, Screen::Onboarding { .. }),
            Self::Navigate(_) => matches!(screen, Screen::Main { .. }),
            Self::Logout => !matches!(screen, Screen::Login),
        };
        if allowed {
            return Ok(());
        }

        Err(match screen {
            Screen::Loading => "still loading your account; try again in a moment".to_string(),
            Screen::Fatal { .. } => "the app hit an error; use 'reload' or 'logout'".to_string(),
            Screen::Login => "sign in first ('login', 'signup' or 'oauth')".to_string(),
            Screen::Onboarding { .. } => {
                "register your company first ('onboard ...') or 'logout'".to_string()
            }
            Screen::Main { .. } => format!("'{}' is not available once signed in", self.name()),
        })
    }
}

/// Parses one input line; `Ok(None)` for a blank line.
pub fn parse_command(line: &str) -> Result<Option<ShellCommand>, String> {
    let args = split_args(line)?;
    let Some((head, rest)) = args.split_first() else {
        return Ok(None);
    };

    let command = match head.to_ascii_lowercase().as_str() {
        "help" | "?" => ShellCommand::Help,
        "login" => match rest {
            [email, password] => ShellCommand::Login(SignInForm::new(email, password)),
            _ => return Err("usage: login <email> <password>".to_string()),
        },
        "signup" => ShellCommand::SignUp(parse_signup(rest)?),
        "oauth" => match rest {
            [] => ShellCommand::OAuth(OAuthProvider::Google),
            [provider] => ShellCommand::OAuth(provider.parse()?),
            _ => return Err("usage: oauth [google]".to_string()),
        },
        "oauth-callback" => match rest {
            [url] => ShellCommand::OAuthCallback(
                Url::parse(url).map_err(|err| format!("invalid redirect url: {err}"))?,
            ),
            _ => return Err("usage: oauth-callback <redirect url>".to_string()),
        },
        "onboard" => ShellCommand::Onboard(parse_onboard(rest)?),
        "open" => match rest {
            [view] => ShellCommand::Navigate(NavIntent::Open(view.parse::<AppView>()?)),
            _ => return Err("usage: open <view>".to_string()),
        },
        "dashboard" => no_args(rest, ShellCommand::Navigate(NavIntent::Dashboard))?,
        "new-quote" => no_args(rest, ShellCommand::Navigate(NavIntent::NewQuote))?,
        "resume-quote" => no_args(rest, ShellCommand::Navigate(NavIntent::ResumeQuote))?,
        "next" => no_args(rest, ShellCommand::Navigate(NavIntent::Next))?,
        "back" => no_args(rest, ShellCommand::Navigate(NavIntent::Back))?,
        "step" => match rest {
            [n] => ShellCommand::Navigate(NavIntent::JumpTo(
                n.parse::<i64>()
                    .map_err(|_| format!("step must be a number, got '{n}'"))?,
            )),
            _ => return Err("usage: step <n>".to_string()),
        },
        "logout" => no_args(rest, ShellCommand::Logout)?,
        "reload" => no_args(rest, ShellCommand::Reload)?,
        "quit" | "exit" => no_args(rest, ShellCommand::Quit)?,
        other => return Err(format!("unknown command '{other}'; type 'help'")),
    };
    Ok(Some(command))
}

fn no_args(rest: &[String], command: ShellCommand) -> Result<ShellCommand, String> {
    if rest.is_empty() {
        Ok(command)
    } else {
        Err(format!("'{}' takes no arguments", command.name()))
    }
}

fn parse_signup(rest: &[String]) -> Result<SignUpForm, String> {
    let mut form = SignUpForm::default();
    for (key, value) in key_values(rest)? {
        match key {
            "name" => form.name = value,
            "email" => form.email = value,
            "password" => form.password = value,
            "confirm" | "confirm_password" => form.confirm_password = value,
            "document" => form.document = Some(value),
            "whatsapp" | "phone" => form.whatsapp = Some(value),
            "website" => form.website = Some(value),
            other => return Err(format!("unknown signup field '{other}'")),
        }
    }
    Ok(form)
}

fn parse_onboard(rest: &[String]) -> Result<OnboardArgs, String> {
    let mut args = OnboardArgs::default();
    for (key, value) in key_values(rest)? {
        match key {
            "legal_name" => args.legal_name = value,
            "trade_name" => args.trade_name = value,
            "tax_id" => args.tax_id = value,
            "phone" => args.phone = value,
            "email" => args.email = Some(value),
            "address" => args.address = Some(value),
            "color" | "brand_color" => args.brand_color = Some(value),
            "type" => {
                args.entity_type = match value.to_ascii_lowercase().as_str() {
                    "company" => EntityType::Company,
                    "individual" => EntityType::Individual,
                    other => return Err(format!("type must be company or individual, got '{other}'")),
                }
            }
            other => return Err(format!("unknown onboard field '{other}'")),
        }
    }
    Ok(args)
}

fn key_values(rest: &[String]) -> Result<Vec<(&str, String)>, String> {
    rest.iter()
        .map(|arg| {
            arg.split_once('=')
                .map(|(key, value)| (key, value.to_string()))
                .ok_or_else(|| format!("expected key=value, got '{arg}'"))
        })
        .collect()
}

/// Whitespace-separated words; double quotes group words and are removed.
fn split_args(line: &str) -> Result<Vec<String>, String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quoted = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            ch if ch.is_whitespace() && !quoted => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            ch => {
                current.push(ch);
                in_word = true;
            }
        }
    }

    if quoted {
        return Err("unterminated quote".to_string());
    }
    if in_word {
        args.push(current);
    }
    Ok(args)
}

#[cfg(test)]
#[path = "tests/orchestration_tests.rs"]
mod tests;
