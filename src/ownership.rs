//! Ownership shape validation.
//!
//! The in-memory model is the [`Owner`] sum type. The flat, nullable column
//! shape only exists at the persistence boundary; this module converts between
//! the two and rejects every combination that is not one of the three variants.

use std::net::IpAddr;

use crate::error::{Error, Result};
use crate::models::{Owner, OwnerType};

const MAX_SESSION_ID_LEN: usize = 128;

/// Flat ownership columns as stored alongside a short URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnershipColumns {
    pub owner_type: i16,
    pub user_id: Option<i64>,
    pub organization_id: Option<i64>,
    pub created_by_member_id: Option<i64>,
    pub anonymous_session_id: Option<String>,
    pub anonymous_ip: Option<String>,
}

impl From<&Owner> for OwnershipColumns {
    fn from(owner: &Owner) -> Self {
        let owner_type = owner.owner_type().as_i16();
        match owner {
            Owner::User { user_id } => Self {
                owner_type,
                user_id: Some(*user_id),
                ..Self::default()
            },
            Owner::Organization {
                organization_id,
                created_by_member_id,
            } => Self {
                owner_type,
                organization_id: Some(*organization_id),
                created_by_member_id: Some(*created_by_member_id),
                ..Self::default()
            },
            Owner::Anonymous {
                session_id,
                client_ip,
            } => Self {
                owner_type,
                anonymous_session_id: Some(session_id.clone()),
                anonymous_ip: client_ip.map(|ip| ip.to_string()),
                ..Self::default()
            },
        }
    }
}

/// Validates the flat ownership shape and lifts it into an [`Owner`].
///
/// Accepts exactly:
/// - `User`: user id only
/// - `Organization`: organization id and acting member id only
/// - `Anonymous`: session id only
pub fn validate(
    owner_type: OwnerType,
    user_id: Option<i64>,
    organization_id: Option<i64>,
    created_by_member_id: Option<i64>,
    anonymous_session_id: Option<&str>,
) -> Result<Owner> {
    let owner = match (
        owner_type,
        user_id,
        organization_id,
        created_by_member_id,
        anonymous_session_id,
    ) {
        (OwnerType::User, Some(user_id), None, None, None) => Owner::User { user_id },
        (OwnerType::Organization, None, Some(organization_id), Some(created_by_member_id), None) => {
            Owner::Organization {
                organization_id,
                created_by_member_id,
            }
        }
        (OwnerType::Anonymous, None, None, None, Some(session_id)) => Owner::Anonymous {
            session_id: session_id.to_string(),
            client_ip: None,
        },
        (OwnerType::Organization, None, Some(_), None, None) => {
            return Err(Error::validation(
                "organization ownership requires the acting member",
            ))
        }
        _ => {
            return Err(Error::validation(format!(
                "ownership fields do not match the {owner_type:?} variant"
            )))
        }
    };

    validate_owner(&owner)?;
    Ok(owner)
}

/// Checks the payload of an already-typed owner.
pub fn validate_owner(owner: &Owner) -> Result<()> {
    match owner {
        Owner::User { user_id } => positive("user id", *user_id),
        Owner::Organization {
            organization_id,
            created_by_member_id,
        } => {
            positive("organization id", *organization_id)?;
            positive("member id", *created_by_member_id)
        }
        Owner::Anonymous { session_id, .. } => {
            let trimmed = session_id.trim();
            if trimmed.is_empty() {
                return Err(Error::validation("anonymous session id cannot be empty"));
            }
            if session_id.len() > MAX_SESSION_ID_LEN {
                return Err(Error::validation(format!(
                    "anonymous session id exceeds {MAX_SESSION_ID_LEN} characters"
                )));
            }
            Ok(())
        }
    }
}

fn positive(field: &str, value: i64) -> Result<()> {
    if value > 0 {
        Ok(())
    } else {
        Err(Error::validation(format!("{field} must be positive, got {value}")))
    }
}

impl TryFrom<OwnershipColumns> for Owner {
    type Error = Error;

    fn try_from(columns: OwnershipColumns) -> Result<Self> {
        let owner_type = OwnerType::from_i16(columns.owner_type).ok_or_else(|| {
            Error::validation(format!("unknown owner type {}", columns.owner_type))
        })?;

        if owner_type != OwnerType::Anonymous && columns.anonymous_ip.is_some() {
            return Err(Error::validation(
                "client IP is only recorded for anonymous owners",
            ));
        }

        let owner = validate(
            owner_type,
            columns.user_id,
            columns.organization_id,
            columns.created_by_member_id,
            columns.anonymous_session_id.as_deref(),
        )?;

        match (owner, columns.anonymous_ip) {
            (Owner::Anonymous { session_id, .. }, Some(ip)) => {
                let client_ip = ip
                    .parse::<IpAddr>()
                    .map_err(|_| Error::validation(format!("invalid client IP '{ip}'")))?;
                Ok(Owner::Anonymous {
                    session_id,
                    client_ip: Some(client_ip),
                })
            }
            (owner, _) => Ok(owner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_exactly_one_shape_per_variant() {
        let user_ids = [None, Some(1)];
        let org_ids = [None, Some(2)];
        let member_ids = [None, Some(3)];
        let sessions = [None, Some("sess-1")];

        for owner_type in [OwnerType::User, OwnerType::Organization, OwnerType::Anonymous] {
            let mut accepted = 0;
            for user_id in user_ids {
                for organization_id in org_ids {
                    for member_id in member_ids {
                        for session in sessions {
                            let result =
                                validate(owner_type, user_id, organization_id, member_id, session);
                            let expected = match owner_type {
                                OwnerType::User => {
                                    user_id.is_some()
                                        && organization_id.is_none()
                                        && member_id.is_none()
                                        && session.is_none()
                                }
                                OwnerType::Organization => {
                                    user_id.is_none()
                                        && organization_id.is_some()
                                        && member_id.is_some()
                                        && session.is_none()
                                }
                                OwnerType::Anonymous => {
                                    user_id.is_none()
                                        && organization_id.is_none()
                                        && member_id.is_none()
                                        && session.is_some()
                                }
                            };
                            assert_eq!(
                                result.is_ok(),
                                expected,
                                "{owner_type:?} {user_id:?} {organization_id:?} {member_id:?} {session:?}"
                            );
                            if let Ok(owner) = result {
                                assert_eq!(owner.owner_type(), owner_type);
                                accepted += 1;
                            }
                        }
                    }
                }
            }
            assert_eq!(accepted, 1, "exactly one shape accepted for {owner_type:?}");
        }
    }

    #[test]
    fn test_rejects_all_null_and_all_set() {
        for owner_type in [OwnerType::User, OwnerType::Organization, OwnerType::Anonymous] {
            assert!(validate(owner_type, None, None, None, None).is_err());
            assert!(validate(owner_type, Some(1), Some(2), Some(3), Some("s")).is_err());
        }
    }

    #[test]
    fn test_organization_without_member_has_specific_message() {
        let err = validate(OwnerType::Organization, None, Some(5), None, None).unwrap_err();
        assert!(err.to_string().contains("acting member"));
    }

    #[test]
    fn test_payload_sanity() {
        assert!(validate_owner(&Owner::user(0)).is_err());
        assert!(validate_owner(&Owner::organization(1, -4)).is_err());
        assert!(validate_owner(&Owner::anonymous("   ", None)).is_err());
        assert!(validate_owner(&Owner::anonymous("x".repeat(129), None)).is_err());
        assert!(validate_owner(&Owner::anonymous("visitor", None)).is_ok());
    }

    #[test]
    fn test_columns_round_trip_through_owner() {
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        for owner in [
            Owner::user(10),
            Owner::organization(20, 21),
            Owner::anonymous("session-a", Some(ip)),
            Owner::anonymous("session-b", None),
        ] {
            let columns = OwnershipColumns::from(&owner);
            assert_eq!(Owner::try_from(columns).unwrap(), owner);
        }
    }

    #[test]
    fn test_client_ip_rejected_for_non_anonymous_columns() {
        let mut columns = OwnershipColumns::from(&Owner::user(10));
        columns.anonymous_ip = Some("10.0.0.1".to_string());
        assert!(Owner::try_from(columns).is_err());
    }
}
