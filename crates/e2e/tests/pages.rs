mod support;

use support::{CallLog, FakeDriver, FakeLogin};
use testbed_e2e::browser::Locator;
use testbed_e2e::pages::SiteSettingsPage;
use testbed_e2e::{
    simple_login, Credentials, E2eError, EngineType, LoginFlow, LoginPage, LOGIN_ATTEMPTS,
};

fn admin() -> Credentials {
    Credentials::new("admin", "secret")
}

#[tokio::test]
async fn login_page_fills_form_and_checks_user_menu() {
    let log = CallLog::default();
    let session = FakeDriver::new(log.clone()).session(EngineType::Chrome);

    LoginPage::new("https://testbed.example")
        .login(&session, &admin())
        .await
        .unwrap();

    assert_eq!(
        log.calls(),
        vec![
            "navigate https://testbed.example/index.php?/auth/login",
            "find_element id=name",
            "clear id=name",
            "send_keys id=name admin",
            "find_element id=password",
            "clear id=password",
            "send_keys id=password secret",
            "find_element id=button_primary",
            "click id=button_primary",
            "find_element id=navigation-user",
        ]
    );
}

#[tokio::test]
async fn login_page_without_user_menu_is_login_error() {
    let session = FakeDriver::default()
        .missing(&Locator::Id("navigation-user".into()))
        .session(EngineType::Chrome);

    let err = LoginPage::new("https://testbed.example")
        .login(&session, &admin())
        .await
        .unwrap_err();
    assert!(matches!(err, E2eError::Login(_)));
}

#[tokio::test]
async fn simple_login_succeeds_on_third_attempt() {
    let session = FakeDriver::default().session(EngineType::Chrome);
    let flow = FakeLogin::failing(2);

    simple_login(&flow, &session, &admin()).await.unwrap();
    assert_eq!(flow.attempts(), LOGIN_ATTEMPTS);
}

#[tokio::test]
async fn simple_login_stops_after_first_success() {
    let session = FakeDriver::default().session(EngineType::Chrome);
    let flow = FakeLogin::succeeding();

    simple_login(&flow, &session, &admin()).await.unwrap();
    assert_eq!(flow.attempts(), 1);
}

#[tokio::test]
async fn simple_login_surfaces_last_error() {
    let session = FakeDriver::default().session(EngineType::Chrome);
    let flow = FakeLogin::failing(10);

    let err = simple_login(&flow, &session, &admin()).await.unwrap_err();
    assert!(matches!(err, E2eError::Login(m) if m == "attempt 3"));
    assert_eq!(flow.attempts(), LOGIN_ATTEMPTS);
}

#[tokio::test]
async fn login_on_released_session_is_null_session() {
    let mut session = FakeDriver::default().session(EngineType::Chrome);
    session.release().await.unwrap();

    let err = LoginPage::new("https://testbed.example")
        .login(&session, &admin())
        .await
        .unwrap_err();
    assert!(matches!(err, E2eError::NullSession));
}

#[tokio::test]
async fn enable_api_ticks_checkbox_and_saves() {
    let log = CallLog::default();
    let session = FakeDriver::new(log.clone()).session(EngineType::Chrome);

    let changed = SiteSettingsPage::new("https://testbed.example")
        .enable_api(&session)
        .await
        .unwrap();

    assert!(changed);
    assert!(log.contains("click id=api_enabled"));
    assert!(log.contains("click id=accept"));
}

#[tokio::test]
async fn enable_api_is_noop_when_already_enabled() {
    let log = CallLog::default();
    let session = FakeDriver::new(log.clone()).all_selected().session(EngineType::Chrome);

    let changed = SiteSettingsPage::new("https://testbed.example")
        .enable_api(&session)
        .await
        .unwrap();

    assert!(!changed);
    assert!(!log.contains("click id=accept"));
}
