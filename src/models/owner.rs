use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Persisted discriminator for the owner variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerType {
    User,
    Organization,
    Anonymous,
}

impl OwnerType {
    pub const fn as_i16(self) -> i16 {
        match self {
            OwnerType::User => 0,
            OwnerType::Organization => 1,
            OwnerType::Anonymous => 2,
        }
    }

    pub const fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(OwnerType::User),
            1 => Some(OwnerType::Organization),
            2 => Some(OwnerType::Anonymous),
            _ => None,
        }
    }
}

/// Who owns a short URL. Exactly one variant applies to every row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Owner {
    User {
        user_id: i64,
    },
    /// Organization ownership always records the member who acted.
    Organization {
        organization_id: i64,
        created_by_member_id: i64,
    },
    Anonymous {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ip: Option<IpAddr>,
    },
}

impl Owner {
    pub fn user(user_id: i64) -> Self {
        Owner::User { user_id }
    }

    pub fn organization(organization_id: i64, created_by_member_id: i64) -> Self {
        Owner::Organization {
            organization_id,
            created_by_member_id,
        }
    }

    pub fn anonymous(session_id: impl Into<String>, client_ip: Option<IpAddr>) -> Self {
        Owner::Anonymous {
            session_id: session_id.into(),
            client_ip,
        }
    }

    pub fn owner_type(&self) -> OwnerType {
        match self {
            Owner::User { .. } => OwnerType::User,
            Owner::Organization { .. } => OwnerType::Organization,
            Owner::Anonymous { .. } => OwnerType::Anonymous,
        }
    }

    /// Key used for per-owner accounting and query scoping.
    pub fn key(&self) -> OwnerKey {
        match self {
            Owner::User { user_id } => OwnerKey::User(*user_id),
            Owner::Organization {
                organization_id, ..
            } => OwnerKey::Organization(*organization_id),
            Owner::Anonymous { session_id, .. } => OwnerKey::Anonymous(session_id.clone()),
        }
    }
}

/// Owner identity without the per-row details (acting member, client IP).
///
/// Used to scope queries and to key usage counters: links created by different
/// members of one organization all belong to the same `OwnerKey`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum OwnerKey {
    User(i64),
    Organization(i64),
    Anonymous(String),
}

impl std::fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnerKey::User(id) => write!(f, "user:{id}"),
            OwnerKey::Organization(id) => write!(f, "organization:{id}"),
            OwnerKey::Anonymous(session) => write!(f, "anonymous:{session}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_type_discriminator_round_trips() {
        for owner_type in [OwnerType::User, OwnerType::Organization, OwnerType::Anonymous] {
            assert_eq!(OwnerType::from_i16(owner_type.as_i16()), Some(owner_type));
        }
        assert_eq!(OwnerType::from_i16(3), None);
        assert_eq!(OwnerType::from_i16(-1), None);
    }

    #[test]
    fn test_organization_members_share_owner_key() {
        let a = Owner::organization(7, 100);
        let b = Owner::organization(7, 200);
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().to_string(), "organization:7");
    }

    #[test]
    fn test_owner_serializes_with_tag() {
        let json = serde_json::to_value(Owner::user(42)).unwrap();
        assert_eq!(json["type"], "user");
        assert_eq!(json["user_id"], 42);
    }
}
