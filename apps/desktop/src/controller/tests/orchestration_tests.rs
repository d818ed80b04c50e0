use shared::domain::{IdentityId, OrganizationProfile};
use uuid::Uuid;

use super::*;

fn identity() -> Identity {
    Identity {
        id: IdentityId(Uuid::from_u128(3)),
        display_name: "Bruno Lima".into(),
        email: "bruno@example.com".into(),
    }
}

fn parse(line: &str) -> ShellCommand {
    parse_command(line)
        .expect("parses")
        .expect("not blank")
}

fn main_screen() -> Screen {
    Screen::Main {
        view: AppView::Dashboard,
        step: None,
        identity: identity(),
        profile: OrganizationProfile {
            id: None,
            owner_id: identity().id,
            legal_name: "Lima Serviços LTDA".into(),
            trade_name: "Lima Serviços".into(),
            tax_id: "98.765.432/0001-10".into(),
            email: "bruno@example.com".into(),
            phone: "(21) 97777-6666".into(),
            address: None,
            brand_color: "#2563eb".into(),
            entity_type: EntityType::Company,
            created_at: None,
        },
    }
}

#[test]
fn blank_lines_are_not_commands() {
    assert_eq!(parse_command("   "), Ok(None));
}

#[test]
fn login_takes_email_and_password() {
    assert_eq!(
        parse("login bruno@example.com segredo1"),
        ShellCommand::Login(SignInForm::new("bruno@example.com", "segredo1"))
    );
    assert!(parse_command("login bruno@example.com")
        .expect_err("missing password")
        .starts_with("usage:"));
}

#[test]
fn signup_reads_key_value_pairs_with_quotes() {
    let command = parse(
        "signup name=\"Bruno Lima\" email=bruno@example.com password=segredo1 \
         confirm=segredo1 whatsapp=21977776666",
    );

    let ShellCommand::SignUp(form) = command else {
        panic!("expected signup, got {command:?}");
    };
    assert_eq!(form.name, "Bruno Lima");
    assert_eq!(form.confirm_password, "segredo1");
    assert_eq!(form.whatsapp.as_deref(), Some("21977776666"));
    assert_eq!(form.document, None);
}

#[test]
fn malformed_arguments_are_reported() {
    assert_eq!(
        parse_command("signup name"),
        Err("expected key=value, got 'name'".to_string())
    );
    assert_eq!(
        parse_command("signup nickname=b"),
        Err("unknown signup field 'nickname'".to_string())
    );
    assert_eq!(
        parse_command("onboard legal_name=\"Lima"),
        Err("unterminated quote".to_string())
    );
    assert!(parse_command("fly").is_err());
    assert!(parse_command("next please").is_err());
}

#[test]
fn onboard_fills_the_draft_and_prefills_email() {
    let command = parse(
        "onboard legal_name=\"Lima Serviços LTDA\" trade_name=Lima tax_id=98765432000110 \
         phone=21977776666 type=individual color=#ff0000",
    );
    let ShellCommand::Onboard(args) = command else {
        panic!("expected onboard, got {command:?}");
    };

    let draft = args.into_draft(&identity());

    assert_eq!(draft.legal_name, "Lima Serviços LTDA");
    assert_eq!(draft.email, "bruno@example.com");
    assert_eq!(draft.entity_type, EntityType::Individual);
    assert_eq!(draft.brand_color_or_default(), "#ff0000");
}

#[test]
fn explicit_onboard_email_wins_over_identity() {
    let ShellCommand::Onboard(args) = parse("onboard email=financeiro@lima.example.com") else {
        panic!("expected onboard");
    };

    assert_eq!(
        args.into_draft(&identity()).email,
        "financeiro@lima.example.com"
    );
}

#[test]
fn navigation_commands_map_to_intents() {
    assert_eq!(
        parse("open reports"),
        ShellCommand::Navigate(NavIntent::Open(AppView::Reports))
    );
    assert_eq!(parse("new-quote"), ShellCommand::Navigate(NavIntent::NewQuote));
    assert_eq!(parse("step -2"), ShellCommand::Navigate(NavIntent::JumpTo(-2)));
    assert!(parse_command("step two").is_err());
    assert!(parse_command("open settings").is_err());
}

#[test]
fn oauth_defaults_to_google_and_checks_the_callback_url() {
    assert_eq!(parse("oauth"), ShellCommand::OAuth(OAuthProvider::Google));
    assert_eq!(parse("OAUTH Google"), ShellCommand::OAuth(OAuthProvider::Google));
    assert!(parse_command("oauth github").is_err());
    assert!(parse_command("oauth-callback not-a-url").is_err());
}

#[test]
fn commands_are_checked_against_the_current_screen() {
    let login = parse("login a@b.co x");
    let onboard = parse("onboard legal_name=x");
    let next = parse("next");

    assert_eq!(login.check_available(&Screen::Login), Ok(()));
    assert!(login
        .check_available(&main_screen())
        .expect_err("already signed in")
        .contains("not available"));
    assert!(next.check_available(&Screen::Login).is_err());
    assert_eq!(next.check_available(&main_screen()), Ok(()));
    assert!(onboard.check_available(&Screen::Loading).is_err());
    assert_eq!(
        onboard.check_available(&Screen::Onboarding {
            identity: identity(),
            notice: None,
        }),
        Ok(())
    );
}

#[test]
fn fatal_screen_only_offers_reload_and_logout() {
    let fatal = Screen::Fatal {
        message: "render failed".into(),
    };

    assert_eq!(ShellCommand::Reload.check_available(&fatal), Ok(()));
    assert_eq!(ShellCommand::Logout.check_available(&fatal), Ok(()));
    assert!(parse("open history")
        .check_available(&fatal)
        .expect_err("blocked")
        .contains("reload"));
    assert!(ShellCommand::Logout.check_available(&Screen::Login).is_err());
}
