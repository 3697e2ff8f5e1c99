//! Data access functions, one module per table group
//!
//! Queries are plain runtime `sqlx::query` calls. Row structs derive
//! `sqlx::FromRow` and serialize directly as API responses.

pub mod bookings;
pub mod companies;
pub mod cs_owners;
pub mod deliveries;
pub mod diagnostics;
pub mod insights;
pub mod invites;
pub mod notifications;
pub mod surveys;
pub mod users;

use csops_common::{Principal, Role};
use sqlx::{QueryBuilder, Sqlite};

/// New random row id
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Which companies a principal may see, as a SQL filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    All,
    /// Companies assigned to this CS owner profile
    Owner(String),
    /// A single company (client roles)
    Company(String),
    /// No profile bound; sees nothing
    Nothing,
}

impl Visibility {
    pub fn for_principal(principal: &Principal) -> Self {
        match principal.role {
            Role::Admin => Visibility::All,
            Role::CsOwner => principal
                .cs_owner_id
                .clone()
                .map(Visibility::Owner)
                .unwrap_or(Visibility::Nothing),
            Role::Client | Role::ClientMember => principal
                .company_id
                .clone()
                .map(Visibility::Company)
                .unwrap_or(Visibility::Nothing),
        }
    }

    /// Append ` AND <condition>` restricting `company_col` (a column holding a
    /// company id) to the visible companies
    pub fn push_filter(&self, qb: &mut QueryBuilder<'_, Sqlite>, company_col: &str) {
        match self {
            Visibility::All => {}
            Visibility::Owner(owner_id) => {
                qb.push(" AND ")
                    .push(company_col)
                    .push(" IN (SELECT id FROM companies WHERE cs_owner_id = ")
                    .push_bind(owner_id.clone())
                    .push(")");
            }
            Visibility::Company(company_id) => {
                qb.push(" AND ")
                    .push(company_col)
                    .push(" = ")
                    .push_bind(company_id.clone());
            }
            Visibility::Nothing => {
                qb.push(" AND 0");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_for_roles() {
        let mut principal = Principal {
            user_id: "u1".to_string(),
            role: Role::CsOwner,
            company_id: None,
            cs_owner_id: Some("o1".to_string()),
        };
        assert_eq!(
            Visibility::for_principal(&principal),
            Visibility::Owner("o1".to_string())
        );

        principal.cs_owner_id = None;
        assert_eq!(Visibility::for_principal(&principal), Visibility::Nothing);

        principal.role = Role::ClientMember;
        principal.company_id = Some("c1".to_string());
        assert_eq!(
            Visibility::for_principal(&principal),
            Visibility::Company("c1".to_string())
        );
    }

    #[test]
    fn test_filter_sql() {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT id FROM deliveries WHERE 1 = 1");
        Visibility::Owner("o1".to_string()).push_filter(&mut qb, "company_id");
        assert_eq!(
            qb.sql(),
            "SELECT id FROM deliveries WHERE 1 = 1 AND company_id IN \
             (SELECT id FROM companies WHERE cs_owner_id = ?)"
        );
    }
}
