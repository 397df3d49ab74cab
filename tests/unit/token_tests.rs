//! Session token expiry.

use std::time::Duration;

use artemis_bot::artemis::AuthToken;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{TimeZone, Utc};

fn jwt(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS512"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

#[test]
fn reads_the_exp_claim() {
    let token = AuthToken::new(jwt(&serde_json::json!({"sub": "ab12cde", "exp": 1_700_000_000})));
    assert_eq!(
        token.expires_at(),
        Utc.timestamp_opt(1_700_000_000, 0).single()
    );
}

#[test]
fn fresh_until_the_margin() {
    let token = AuthToken::new(jwt(&serde_json::json!({"exp": 1_700_000_100})));
    let margin = Duration::from_secs(30);

    let early = Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid time");
    let late = Utc.timestamp_opt(1_700_000_071, 0).single().expect("valid time");
    assert!(token.is_fresh_at(early, margin));
    assert!(!token.is_fresh_at(late, margin));
}

#[test]
fn far_future_token_is_fresh() {
    let exp = Utc::now().timestamp() + 3600;
    assert!(AuthToken::new(jwt(&serde_json::json!({"exp": exp}))).is_fresh());
}

#[test]
fn opaque_tokens_are_never_fresh() {
    let token = AuthToken::new("not-a-jwt");
    assert_eq!(token.expires_at(), None);
    assert!(!token.is_fresh());
    assert_eq!(token.raw(), "not-a-jwt");
}

#[test]
fn token_without_exp_is_never_fresh() {
    assert!(!AuthToken::new(jwt(&serde_json::json!({"sub": "x"}))).is_fresh());
}

#[test]
fn debug_output_hides_the_token() {
    let raw = jwt(&serde_json::json!({"exp": 1}));
    let debug = format!("{:?}", AuthToken::new(raw.clone()));
    assert!(!debug.contains(&raw));
}
