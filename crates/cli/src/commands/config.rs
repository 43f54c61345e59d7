use std::env;
use std::fs;
use std::path::Path;

use kahawa_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, env_key, value) in effective_values(&config) {
        let source =
            field_source(key, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, Option<&'static str>, String)> {
    let sms_api_key = match &config.sms.api_key {
        Some(key) => redact_secret(key.expose_secret()),
        None => "<unset>".to_string(),
    };

    vec![
        ("database.url", Some("KAHAWA_DATABASE_URL"), config.database.url.clone()),
        (
            "database.max_connections",
            Some("KAHAWA_DATABASE_MAX_CONNECTIONS"),
            config.database.max_connections.to_string(),
        ),
        (
            "database.timeout_secs",
            Some("KAHAWA_DATABASE_TIMEOUT_SECS"),
            config.database.timeout_secs.to_string(),
        ),
        ("sms.enabled", Some("KAHAWA_SMS_ENABLED"), config.sms.enabled.to_string()),
        (
            "sms.provider_url",
            Some("KAHAWA_SMS_PROVIDER_URL"),
            config.sms.provider_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        ("sms.api_key", Some("KAHAWA_SMS_API_KEY"), sms_api_key),
        ("sms.sender_id", Some("KAHAWA_SMS_SENDER_ID"), config.sms.sender_id.clone()),
        ("sms.country_code", Some("KAHAWA_SMS_COUNTRY_CODE"), config.sms.country_code.clone()),
        ("sms.max_attempts", Some("KAHAWA_SMS_MAX_ATTEMPTS"), config.sms.max_attempts.to_string()),
        ("sms.retry_base_secs", None, config.sms.retry_base_secs.to_string()),
        ("sms.retry_max_secs", None, config.sms.retry_max_secs.to_string()),
        (
            "server.bind_address",
            Some("KAHAWA_SERVER_BIND_ADDRESS"),
            config.server.bind_address.clone(),
        ),
        ("server.port", Some("KAHAWA_SERVER_PORT"), config.server.port.to_string()),
        (
            "server.dispatch_interval_secs",
            Some("KAHAWA_SERVER_DISPATCH_INTERVAL_SECS"),
            config.server.dispatch_interval_secs.to_string(),
        ),
        (
            "verification.public_base_url",
            Some("KAHAWA_VERIFICATION_PUBLIC_BASE_URL"),
            config.verification.public_base_url.clone(),
        ),
        (
            "verification.qr_service_url",
            Some("KAHAWA_VERIFICATION_QR_SERVICE_URL"),
            config.verification.qr_service_url.clone(),
        ),
        ("logging.level", Some("KAHAWA_LOGGING_LEVEL"), config.logging.level.clone()),
        (
            "logging.format",
            Some("KAHAWA_LOGGING_FORMAT"),
            format!("{:?}", config.logging.format).to_lowercase(),
        ),
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps a vendor prefix such as `sk-` so operators can tell keys apart.
fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.split_once('-') {
        Some((prefix, _)) if prefix.len() <= 4 => format!("{prefix}-***"),
        _ => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{contains_path, redact_secret, render_line};

    #[test]
    fn secrets_never_render_in_full() {
        assert_eq!(redact_secret("sk-very-secret-value"), "sk-***");
        assert_eq!(redact_secret("plainsecret"), "<redacted>");
        assert_eq!(redact_secret("longprefixsecret-tail"), "<redacted>");
        assert_eq!(redact_secret("  "), "<empty>");
    }

    #[test]
    fn nested_keys_are_found_in_the_file_document() {
        let doc: toml::Value = "[sms]\nsender_id = \"KAHAWA\"\n".parse().expect("toml");

        assert!(contains_path(&doc, "sms.sender_id"));
        assert!(!contains_path(&doc, "sms.api_key"));
        assert!(!contains_path(&doc, "database.url"));
    }

    #[test]
    fn lines_show_value_and_source() {
        assert_eq!(
            render_line("server.port", "8080", "default".to_string()),
            "- server.port = 8080 (source: default)"
        );
    }
}
