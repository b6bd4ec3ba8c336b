use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Owner;

/// Upper bound on successful redirects. Persisted as `-1` for unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum ClickLimit {
    #[default]
    Unlimited,
    Max(i64),
}

impl ClickLimit {
    pub const UNLIMITED_SENTINEL: i64 = -1;

    pub fn is_reached(self, total_clicks: i64) -> bool {
        match self {
            ClickLimit::Unlimited => false,
            ClickLimit::Max(limit) => total_clicks >= limit,
        }
    }
}

impl TryFrom<i64> for ClickLimit {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            ClickLimit::UNLIMITED_SENTINEL => Ok(ClickLimit::Unlimited),
            v if v >= 0 => Ok(ClickLimit::Max(v)),
            v => Err(format!("click limit must be -1 or non-negative, got {v}")),
        }
    }
}

impl From<ClickLimit> for i64 {
    fn from(limit: ClickLimit) -> Self {
        match limit {
            ClickLimit::Unlimited => ClickLimit::UNLIMITED_SENTINEL,
            ClickLimit::Max(v) => v,
        }
    }
}

/// A stored short URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortUrl {
    pub id: i64,
    pub original_url: String,
    pub short_code: Option<String>,
    pub owner: Owner,
    pub is_active: bool,
    pub tracking_enabled: bool,
    pub click_limit: ClickLimit,
    pub total_clicks: i64,
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub is_private: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

/// The first validity check a short URL fails, in resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocked {
    Inactive,
    Expired,
    LimitReached,
}

impl ShortUrl {
    pub fn is_password_protected(&self) -> bool {
        self.password_hash.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    pub fn is_click_limit_reached(&self) -> bool {
        self.click_limit.is_reached(self.total_clicks)
    }

    /// Evaluates active, expiry and click-limit checks in that order.
    pub fn blocked_at(&self, now: DateTime<Utc>) -> Option<Blocked> {
        if !self.is_active {
            Some(Blocked::Inactive)
        } else if self.is_expired_at(now) {
            Some(Blocked::Expired)
        } else if self.is_click_limit_reached() {
            Some(Blocked::LimitReached)
        } else {
            None
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.blocked_at(now).is_none()
    }
}

/// Input for creating a short URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewShortUrl {
    pub original_url: String,
    pub owner: Owner,
    #[serde(default)]
    pub custom_code: Option<String>,
    #[serde(default = "default_true")]
    pub tracking_enabled: bool,
    #[serde(default)]
    pub click_limit: ClickLimit,
    /// Plaintext credential; hashed before it reaches storage.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl NewShortUrl {
    pub fn new(original_url: impl Into<String>, owner: Owner) -> Self {
        Self {
            original_url: original_url.into(),
            owner,
            custom_code: None,
            tracking_enabled: true,
            click_limit: ClickLimit::Unlimited,
            password: None,
            is_private: false,
            expires_at: None,
        }
    }

    pub fn with_custom_code(mut self, code: impl Into<String>) -> Self {
        self.custom_code = Some(code.into());
        self
    }

    pub fn with_click_limit(mut self, limit: ClickLimit) -> Self {
        self.click_limit = limit;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn private(mut self) -> Self {
        self.is_private = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(now: DateTime<Utc>) -> ShortUrl {
        ShortUrl {
            id: 1,
            original_url: "https://example.com".to_string(),
            short_code: Some("abc234".to_string()),
            owner: Owner::user(1),
            is_active: true,
            tracking_enabled: true,
            click_limit: ClickLimit::Unlimited,
            total_clicks: 0,
            password_hash: None,
            is_private: false,
            expires_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    #[test]
    fn test_click_limit_conversions() {
        assert_eq!(ClickLimit::try_from(-1), Ok(ClickLimit::Unlimited));
        assert_eq!(ClickLimit::try_from(0), Ok(ClickLimit::Max(0)));
        assert_eq!(ClickLimit::try_from(5), Ok(ClickLimit::Max(5)));
        assert!(ClickLimit::try_from(-2).is_err());
        assert_eq!(i64::from(ClickLimit::Unlimited), -1);
        assert_eq!(i64::from(ClickLimit::Max(9)), 9);
    }

    #[test]
    fn test_click_limit_deserialize_rejects_below_sentinel() {
        assert!(serde_json::from_str::<ClickLimit>("-5").is_err());
        assert_eq!(
            serde_json::from_str::<ClickLimit>("3").unwrap(),
            ClickLimit::Max(3)
        );
    }

    #[test]
    fn test_blocked_order_inactive_first() {
        let now = Utc::now();
        let mut url = sample(now);
        url.is_active = false;
        url.expires_at = Some(now - Duration::hours(1));
        url.click_limit = ClickLimit::Max(0);
        assert_eq!(url.blocked_at(now), Some(Blocked::Inactive));

        url.is_active = true;
        assert_eq!(url.blocked_at(now), Some(Blocked::Expired));

        url.expires_at = None;
        assert_eq!(url.blocked_at(now), Some(Blocked::LimitReached));

        url.click_limit = ClickLimit::Unlimited;
        assert!(url.is_valid_at(now));
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let now = Utc::now();
        let mut url = sample(now);
        url.expires_at = Some(now);
        assert!(url.is_expired_at(now));
        assert!(!url.is_expired_at(now - Duration::milliseconds(1)));
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let mut url = sample(Utc::now());
        url.password_hash = Some("$argon2id$secret".to_string());
        let json = serde_json::to_string(&url).unwrap();
        assert!(!json.contains("argon2id"));
    }
}
