//! Roles and tenant access rules
//!
//! Internal users (ADMIN, CS_OWNER) work across client companies; client
//! users (CLIENT, CLIENT_MEMBER) only ever see their own company.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// User role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    CsOwner,
    Client,
    ClientMember,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::CsOwner => "CS_OWNER",
            Role::Client => "CLIENT",
            Role::ClientMember => "CLIENT_MEMBER",
        }
    }

    /// ADMIN and CS_OWNER
    pub fn is_internal(&self) -> bool {
        matches!(self, Role::Admin | Role::CsOwner)
    }

    /// CLIENT and CLIENT_MEMBER
    pub fn is_client(&self) -> bool {
        !self.is_internal()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Role::Admin),
            "CS_OWNER" => Ok(Role::CsOwner),
            "CLIENT" => Ok(Role::Client),
            "CLIENT_MEMBER" => Ok(Role::ClientMember),
            other => Err(Error::InvalidInput(format!("Unknown role: {}", other))),
        }
    }
}

/// The authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
    /// Set for client roles
    pub company_id: Option<String>,
    /// Set for CS_OWNER users with an owner profile
    pub cs_owner_id: Option<String>,
}

/// The tenant fields access decisions depend on
#[derive(Debug, Clone, Copy)]
pub struct CompanyScope<'a> {
    pub company_id: &'a str,
    pub cs_owner_id: Option<&'a str>,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_internal(&self) -> bool {
        self.role.is_internal()
    }

    fn owns(&self, company: CompanyScope<'_>) -> bool {
        self.role == Role::CsOwner
            && self.cs_owner_id.is_some()
            && self.cs_owner_id.as_deref() == company.cs_owner_id
    }

    fn belongs_to(&self, company: CompanyScope<'_>) -> bool {
        self.role.is_client() && self.company_id.as_deref() == Some(company.company_id)
    }

    /// Read access to a company and everything under it
    pub fn can_view_company(&self, company: CompanyScope<'_>) -> bool {
        self.is_admin() || self.owns(company) || self.belongs_to(company)
    }

    /// Write access to a company's internal records (deliveries, surveys, ...)
    pub fn can_manage_company(&self, company: CompanyScope<'_>) -> bool {
        self.is_admin() || self.owns(company)
    }

    /// Client-side delivery approval is reserved to CLIENT users
    pub fn can_approve_as_client(&self, company: CompanyScope<'_>) -> bool {
        self.role == Role::Client && self.belongs_to(company)
    }

    /// Whether this principal may invite a user with `target` role.
    ///
    /// `company` is the company the invitee will belong to (None for internal
    /// invitees).
    pub fn can_invite(&self, target: Role, company: Option<CompanyScope<'_>>) -> bool {
        match self.role {
            Role::Admin => true,
            Role::CsOwner => {
                target.is_client() && company.map(|c| self.owns(c)).unwrap_or(false)
            }
            Role::Client => {
                target == Role::ClientMember
                    && company.map(|c| self.belongs_to(c)).unwrap_or(false)
            }
            Role::ClientMember => false,
        }
    }

    /// Returns a Forbidden error unless `allowed`
    pub fn require(&self, allowed: bool, action: &str) -> crate::Result<()> {
        if allowed {
            Ok(())
        } else {
            Err(Error::Forbidden(format!(
                "{} is not allowed to {}",
                self.role, action
            )))
        }
    }
}
