//! Notification subjects.

/// Account update subject; `%s` is the account public key.
pub const ACCOUNT_UPDATE_TEMPLATE: &str = "SYS.ACCOUNT.%s.CLAIMS.UPDATE";

/// Activation subject; `%s` are the account public key and activation hash.
pub const ACTIVATION_TEMPLATE: &str = "SYS.ACCOUNT.%s.CLAIMS.ACTIVATE.%s";

const PLACEHOLDER: &str = "%s";

/// Subject for an account update of `account`.
#[must_use]
pub fn account_update_subject(account: &str) -> String {
    ACCOUNT_UPDATE_TEMPLATE.replacen(PLACEHOLDER, account, 1)
}

/// Subject for an activation `hash` granted to `account`.
#[must_use]
pub fn activation_subject(account: &str, hash: &str) -> String {
    ACTIVATION_TEMPLATE
        .replacen(PLACEHOLDER, account, 1)
        .replacen(PLACEHOLDER, hash, 1)
}

/// Subscription pattern covering every account update.
#[must_use]
pub fn account_update_wildcard() -> String {
    ACCOUNT_UPDATE_TEMPLATE.replace(PLACEHOLDER, "*")
}

/// Subscription pattern covering every activation.
#[must_use]
pub fn activation_wildcard() -> String {
    ACTIVATION_TEMPLATE.replace(PLACEHOLDER, "*")
}

#[cfg(test)]
mod tests {
    use super::*;
    use claim_bus::subject_matches;

    #[test]
    fn test_subjects() {
        assert_eq!(account_update_subject("AKEY"), "SYS.ACCOUNT.AKEY.CLAIMS.UPDATE");
        assert_eq!(
            activation_subject("AKEY", "HASH"),
            "SYS.ACCOUNT.AKEY.CLAIMS.ACTIVATE.HASH"
        );
        assert_eq!(account_update_wildcard(), "SYS.ACCOUNT.*.CLAIMS.UPDATE");
        assert_eq!(activation_wildcard(), "SYS.ACCOUNT.*.CLAIMS.ACTIVATE.*");
    }

    #[test]
    fn test_wildcards_do_not_overlap() {
        let update = account_update_subject("AKEY");
        let activation = activation_subject("AKEY", "HASH");
        assert!(subject_matches(&account_update_wildcard(), &update));
        assert!(!subject_matches(&account_update_wildcard(), &activation));
        assert!(subject_matches(&activation_wildcard(), &activation));
        assert!(!subject_matches(&activation_wildcard(), &update));
    }
}
