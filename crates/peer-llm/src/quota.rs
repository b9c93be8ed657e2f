use peer_core::types::User;

/// Structured denial from the quota gate. Callers fail the owning autofix
/// job with reason `token_limit_exceeded` and produce a notification.
#[derive(Debug)]
pub struct QuotaExceeded {
    pub user_id: String,
    pub needed: i64,
    pub used: i64,
    pub limit: i64,
}

impl std::fmt::Display for QuotaExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "quota_exceeded: user {} needs {} tokens, used {} of {}",
            self.user_id, self.needed, self.used, self.limit
        )
    }
}

impl std::error::Error for QuotaExceeded {}

/// Rough token estimate for budgeting: ~4 characters per token.
pub fn estimate_tokens(text: &str) -> i64 {
    (text.len() as i64 / 4).max(1)
}

/// Platform token budget check, run before routing.
///
/// Allowed when the limit is unlimited (−1), when the user brings their own
/// provider keys (platform quota does not apply), or when the estimate fits
/// inside `token_limit + purchased_tokens`.
pub fn check(user: &User, estimate: i64) -> Result<(), QuotaExceeded> {
    if user.token_limit == -1 || !user.api_keys.is_empty() {
        return Ok(());
    }
    let allowance = user.token_limit + user.purchased_tokens;
    if user.tokens_used + estimate <= allowance {
        Ok(())
    } else {
        Err(QuotaExceeded {
            user_id: user.id.clone(),
            needed: estimate,
            used: user.tokens_used,
            limit: allowance,
        })
    }
}
