use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use genresort::utils::*;
use std::collections::BTreeSet;

#[test]
fn test_code_verifier_shape() {
    let verifier = generate_code_verifier();
    assert_eq!(verifier.len(), 128);
    assert!(verifier.chars().all(|c| c.is_ascii_alphanumeric()));
}

#[test]
fn test_code_challenge_is_s256_of_verifier() {
    // RFC 7636 appendix B
    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    assert_eq!(
        generate_code_challenge(verifier),
        "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
    );
}

#[test]
fn test_secure_tokens_are_32_random_bytes() {
    let tokens: BTreeSet<String> = (0..50).map(|_| generate_secure_token()).collect();
    assert_eq!(tokens.len(), 50);

    for token in &tokens {
        assert_eq!(token.len(), 43);
        assert_eq!(URL_SAFE_NO_PAD.decode(token).unwrap().len(), 32);
    }
}

#[test]
fn test_constant_time_eq() {
    assert!(constant_time_eq("abc", "abc"));
    assert!(constant_time_eq("", ""));
    assert!(!constant_time_eq("abc", "abd"));
    assert!(!constant_time_eq("abc", "abcd"));
    assert!(!constant_time_eq("abc", ""));
}

#[test]
fn test_days_to_millis() {
    assert_eq!(days_to_millis(0), 0);
    assert_eq!(days_to_millis(1), 86_400_000);
    assert_eq!(days_to_millis(30), 2_592_000_000);
}

#[test]
fn test_now_millis_is_recent() {
    let now = now_millis();
    // after 2024-01-01
    assert!(now > 1_704_067_200_000);
}
