//! Per-engine adapter folding `SessionOptions` into W3C capabilities

use serde_json::{json, Map, Value};

use super::{EngineType, SessionOptions};

/// W3C capabilities object sent with a new-session request
pub type Capabilities = Map<String, Value>;

/// `browserName` a local engine announces
pub fn browser_name(engine: EngineType) -> Option<&'static str> {
    match engine {
        EngineType::Firefox => Some("firefox"),
        EngineType::Chrome | EngineType::HeadlessEngine => Some("chrome"),
        EngineType::Ie => Some("internet explorer"),
        EngineType::Edge => Some("MicrosoftEdge"),
        EngineType::Safari => Some("safari"),
        EngineType::Opera => Some("opera"),
        EngineType::Remote => None,
    }
}

/// Capabilities for `engine`: the configured base plus `browserName`
pub fn base_capabilities(engine: EngineType, configured: Option<Capabilities>) -> Capabilities {
    let mut caps = configured.unwrap_or_default();
    if let Some(name) = browser_name(engine) {
        caps.entry("browserName")
            .or_insert_with(|| Value::String(name.to_string()));
    }
    caps
}

/// Flavour of vendor options block an engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Vendor {
    Chromium(&'static str),
    Firefox,
    None,
}

fn vendor(engine: EngineType, caps: &Capabilities) -> Vendor {
    match engine {
        EngineType::Chrome | EngineType::HeadlessEngine => Vendor::Chromium("goog:chromeOptions"),
        EngineType::Edge => Vendor::Chromium("ms:edgeOptions"),
        EngineType::Opera => Vendor::Chromium("operaOptions"),
        EngineType::Firefox => Vendor::Firefox,
        EngineType::Ie | EngineType::Safari => Vendor::None,
        EngineType::Remote => match caps.get("browserName").and_then(Value::as_str) {
            Some("chrome") => Vendor::Chromium("goog:chromeOptions"),
            Some("MicrosoftEdge") => Vendor::Chromium("ms:edgeOptions"),
            Some("firefox") => Vendor::Firefox,
            _ => Vendor::None,
        },
    }
}

/// Fold `options` into `caps` for `engine`.
///
/// Returns a warning for every option the engine cannot express. Applying
/// the same options twice leaves `caps` unchanged.
pub fn apply_options(
    engine: EngineType,
    options: &SessionOptions,
    caps: &mut Capabilities,
) -> Vec<String> {
    let mut warnings = Vec::new();
    let vendor = vendor(engine, caps);
    let headless = options.headless || engine == EngineType::HeadlessEngine;

    if options.accept_insecure_certs {
        caps.insert("acceptInsecureCerts".into(), Value::Bool(true));
    }

    if options.page_load_timeout.is_some() || options.script_timeout.is_some() {
        let timeouts = object_entry(caps, "timeouts");
        if let Some(t) = options.page_load_timeout {
            timeouts.insert("pageLoad".into(), json!(t.as_millis() as u64));
        }
        if let Some(t) = options.script_timeout {
            timeouts.insert("script".into(), json!(t.as_millis() as u64));
        }
    }

    let key = match vendor {
        Vendor::Chromium(key) => key,
        Vendor::Firefox => "moz:firefoxOptions",
        Vendor::None => {
            if headless {
                warnings.push(format!("{} does not support headless mode", engine));
            }
            if options.window_size.is_some() {
                warnings.push(format!("{} does not support a start-up window size", engine));
            }
            if !options.args.is_empty() {
                warnings.push(format!("{} does not accept browser arguments", engine));
            }
            return warnings;
        }
    };

    let args = args_entry(object_entry(caps, key));
    match vendor {
        Vendor::Chromium(_) => {
            if headless {
                push_unique(args, "--headless=new");
            }
            if let Some((w, h)) = options.window_size {
                set_prefixed(args, "--window-size=", &format!("{},{}", w, h));
            }
        }
        Vendor::Firefox => {
            if headless {
                push_unique(args, "-headless");
            }
            if let Some((w, h)) = options.window_size {
                set_prefixed(args, "--width=", &w.to_string());
                set_prefixed(args, "--height=", &h.to_string());
            }
        }
        Vendor::None => {}
    }
    for arg in &options.args {
        push_unique(args, arg);
    }

    warnings
}

fn object_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    let entry = map
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    match entry {
        Value::Object(object) => object,
        _ => unreachable!("entry was just made an object"),
    }
}

fn args_entry(options: &mut Map<String, Value>) -> &mut Vec<Value> {
    let entry = options
        .entry("args".to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !entry.is_array() {
        *entry = Value::Array(Vec::new());
    }
    match entry {
        Value::Array(args) => args,
        _ => unreachable!("entry was just made an array"),
    }
}

fn push_unique(args: &mut Vec<Value>, arg: &str) {
    if !args.iter().any(|a| a.as_str() == Some(arg)) {
        args.push(Value::String(arg.to_string()));
    }
}

/// Replace the first `prefix...` argument in place, or append one
fn set_prefixed(args: &mut Vec<Value>, prefix: &str, value: &str) {
    let arg = Value::String(format!("{}{}", prefix, value));
    match args
        .iter()
        .position(|a| a.as_str().is_some_and(|s| s.starts_with(prefix)))
    {
        Some(index) => args[index] = arg,
        None => args.push(arg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn options() -> SessionOptions {
        SessionOptions {
            headless: true,
            window_size: Some((1280, 800)),
            accept_insecure_certs: true,
            args: vec!["--disable-gpu".to_string()],
            page_load_timeout: Some(Duration::from_secs(30)),
            script_timeout: None,
        }
    }

    #[test]
    fn test_chrome_options() {
        let mut caps = base_capabilities(EngineType::Chrome, None);
        let warnings = apply_options(EngineType::Chrome, &options(), &mut caps);

        assert!(warnings.is_empty());
        assert_eq!(caps["browserName"], "chrome");
        assert_eq!(caps["acceptInsecureCerts"], true);
        assert_eq!(caps["timeouts"], json!({ "pageLoad": 30000 }));
        assert_eq!(
            caps["goog:chromeOptions"]["args"],
            json!(["--headless=new", "--window-size=1280,800", "--disable-gpu"])
        );
    }

    #[test]
    fn test_firefox_window_size_args() {
        let mut caps = base_capabilities(EngineType::Firefox, None);
        apply_options(EngineType::Firefox, &options(), &mut caps);

        assert_eq!(
            caps["moz:firefoxOptions"]["args"],
            json!(["-headless", "--width=1280", "--height=800", "--disable-gpu"])
        );
    }

    #[test]
    fn test_headless_engine_is_always_headless() {
        let mut caps = base_capabilities(EngineType::HeadlessEngine, None);
        apply_options(EngineType::HeadlessEngine, &SessionOptions::default(), &mut caps);

        assert_eq!(caps["goog:chromeOptions"]["args"], json!(["--headless=new"]));
    }

    #[test]
    fn test_applying_twice_is_idempotent() {
        let mut once = base_capabilities(EngineType::Edge, None);
        apply_options(EngineType::Edge, &options(), &mut once);

        let mut twice = once.clone();
        apply_options(EngineType::Edge, &options(), &mut twice);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_unsupported_options_become_warnings() {
        let mut caps = base_capabilities(EngineType::Safari, None);
        let warnings = apply_options(EngineType::Safari, &options(), &mut caps);

        assert_eq!(warnings.len(), 3);
        assert!(warnings[0].contains("headless"));
        assert!(!caps.contains_key("goog:chromeOptions"));
        assert_eq!(caps["acceptInsecureCerts"], true);
    }

    #[test]
    fn test_remote_uses_configured_browser_name() {
        let mut configured = Capabilities::new();
        configured.insert("browserName".into(), json!("firefox"));
        let mut caps = base_capabilities(EngineType::Remote, Some(configured));
        apply_options(EngineType::Remote, &options(), &mut caps);

        assert!(caps.contains_key("moz:firefoxOptions"));
    }

    #[test]
    fn test_configured_browser_name_is_kept() {
        let mut configured = Capabilities::new();
        configured.insert("browserName".into(), json!("chromium"));
        let caps = base_capabilities(EngineType::Chrome, Some(configured));

        assert_eq!(caps["browserName"], "chromium");
    }
}
