use async_graphql::{Context, ErrorExtensions, Guard, Result};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::user::User;

pub struct LoggedIn;

#[async_trait::async_trait]
impl Guard for LoggedIn {
    async fn check(&self, ctx: &Context<'_>) -> Result<()> {
        if ctx.data_opt::<User>().is_some() {
            Ok(())
        } else {
            Err(AppError::Unauthorized.extend())
        }
    }
}

/// Officers and administrators.
pub struct Staff;

#[async_trait::async_trait]
impl Guard for Staff {
    async fn check(&self, ctx: &Context<'_>) -> Result<()> {
        match ctx.data_opt::<User>() {
            Some(user) if user.is_staff || user.is_admin() => Ok(()),
            Some(_) => Err(AppError::Forbidden.extend()),
            None => Err(AppError::Unauthorized.extend()),
        }
    }
}

/// Lets users see their own private details, and staff see anyone's.
pub fn ensure_self_or_staff(ctx: &Context<'_>, user_id: Uuid) -> Result<()> {
    match ctx.data_opt::<User>() {
        Some(user) if user.id == user_id || user.is_staff || user.is_admin() => Ok(()),
        Some(_) => Err(AppError::Forbidden.extend()),
        None => Err(AppError::Unauthorized.extend()),
    }
}
