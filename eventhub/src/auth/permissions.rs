use crate::{auth::current_user::CurrentUser, errors::Error, types::Role, AppState};
use axum::{extract::FromRequestParts, http::request::Parts};
use std::marker::PhantomData;

/// Type-level role gate. Each marker lists the roles allowed through.
pub trait RoleRequirement {
    const ALLOWED: &'static [Role];
    const ACTION: &'static str;
}

pub mod role {
    use super::RoleRequirement;
    use crate::types::Role;

    pub struct Customer;
    pub struct Organizer;
    pub struct Admin;
    pub struct OrganizerOrAdmin;

    impl RoleRequirement for Customer {
        const ALLOWED: &'static [Role] = &[Role::Customer];
        const ACTION: &'static str = "customer operation";
    }

    impl RoleRequirement for Organizer {
        const ALLOWED: &'static [Role] = &[Role::Organizer];
        const ACTION: &'static str = "organizer operation";
    }

    impl RoleRequirement for Admin {
        const ALLOWED: &'static [Role] = &[Role::Admin];
        const ACTION: &'static str = "admin operation";
    }

    impl RoleRequirement for OrganizerOrAdmin {
        const ALLOWED: &'static [Role] = &[Role::Organizer, Role::Admin];
        const ACTION: &'static str = "event management";
    }
}

pub struct RequiresRole<R: RoleRequirement> {
    pub current_user: CurrentUser,
    _marker: PhantomData<R>,
}

pub fn has_role<R: RoleRequirement>(user: &CurrentUser) -> bool {
    R::ALLOWED.contains(&user.role)
}

impl<R: RoleRequirement> RequiresRole<R> {
    pub fn check(current_user: CurrentUser) -> Result<Self, Error> {
        if has_role::<R>(&current_user) {
            Ok(Self {
                current_user,
                _marker: PhantomData,
            })
        } else {
            Err(Error::InsufficientRole {
                required: R::ALLOWED[0],
                action: R::ACTION.to_string(),
            })
        }
    }
}

impl<R: RoleRequirement> FromRequestParts<AppState> for RequiresRole<R> {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let current_user = CurrentUser::from_request_parts(parts, state).await?;
        Self::check(current_user)
    }
}

// Handlers use the gate as if it were the user
impl<R: RoleRequirement> std::ops::Deref for RequiresRole<R> {
    type Target = CurrentUser;

    fn deref(&self) -> &Self::Target {
        &self.current_user
    }
}
