// ABOUTME: Property tests for output redaction.
// ABOUTME: Redaction is idempotent, removes secret values, and leaves plain prose alone.

use proptest::prelude::*;

use stateward::redact::{REDACTED, REDACTED_ACCOUNT, redact};

/// Fragments that look like real tool output, secrets included.
fn arb_fragment() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z]{1,10}",
        Just(" ".to_string()),
        Just("\n".to_string()),
        Just("password=".to_string()),
        Just("db_password: \"".to_string()),
        Just("\"".to_string()),
        Just("api_key=".to_string()),
        "[0-9]{12}",
        "[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}",
        Just("arn:aws:iam::".to_string()),
        Just(":role/deployer".to_string()),
        "AKIA[A-Z0-9]{16}",
        "[a-z]{3,8}@[a-z]{3,8}\\.com",
        Just("[REDACTED]".to_string()),
        Just(", ".to_string()),
    ]
}

fn arb_output() -> impl Strategy<Value = String> {
    prop::collection::vec(arb_fragment(), 0..24).prop_map(|parts| parts.concat())
}

proptest! {
    #[test]
    fn redaction_is_idempotent(input in arb_output()) {
        let once = redact(&input);
        prop_assert_eq!(redact(&once), once);
    }

    #[test]
    fn secret_assignments_never_survive(
        prefix in arb_output(),
        secret in "[a-z0-9]{8,16}",
        suffix in arb_output(),
    ) {
        let input = format!("{prefix} password={secret}\n{suffix}");
        let out = redact(&input);
        let leaked = format!("password={secret}");
        prop_assert!(!out.contains(&leaked));
        prop_assert!(out.contains(REDACTED));
    }

    #[test]
    fn account_numbers_never_survive(account in "[0-9]{12}") {
        let out = redact(&format!("account {account} in arn:aws:s3::{account}:bucket"));
        prop_assert!(!out.contains(&account));
        prop_assert!(out.contains(REDACTED_ACCOUNT));
    }

    #[test]
    fn plain_prose_is_untouched(input in "[a-z ,.]{0,80}") {
        prop_assert_eq!(redact(&input), input);
    }
}

#[test]
fn plan_summary_is_kept_readable() {
    let plan = "Plan: 2 to add, 1 to change, 0 to destroy.";
    assert_eq!(redact(plan), plan);
}
