use chrono::{Duration, NaiveDateTime};
use rand::Rng;

pub const RESET_TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct PasswordResetToken {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub created_at: NaiveDateTime,
    pub used: bool,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbPasswordResetToken {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub token: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub used: Option<bool>,
}

impl From<DbPasswordResetToken> for PasswordResetToken {
    fn from(token: DbPasswordResetToken) -> Self {
        Self {
            id: token.id.unwrap_or_default(),
            user_id: token.user_id.unwrap_or_default(),
            token: token.token.unwrap_or_default(),
            created_at: token.created_at.unwrap_or_default(),
            used: token.used.unwrap_or(true),
        }
    }
}

impl PasswordResetToken {
    /// Six digits, zero padded.
    pub fn generate_code() -> String {
        format!("{:06}", rand::rng().random_range(0..1_000_000))
    }

    pub fn expires_at(&self) -> NaiveDateTime {
        self.created_at + Duration::hours(RESET_TOKEN_TTL_HOURS)
    }

    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        now > self.expires_at()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_six_digits() {
        for _ in 0..50 {
            let code = PasswordResetToken::generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_token_expires_after_a_day() {
        let created_at =
            NaiveDateTime::parse_from_str("2025-04-10 08:00", "%Y-%m-%d %H:%M").unwrap();
        let token = PasswordResetToken {
            id: 1,
            user_id: 1,
            token: "123456".into(),
            created_at,
            used: false,
        };

        let deadline = created_at + Duration::hours(RESET_TOKEN_TTL_HOURS);
        assert_eq!(token.expires_at(), deadline);
        assert!(!token.is_expired(deadline));
        assert!(token.is_expired(deadline + Duration::minutes(1)));
    }
}
