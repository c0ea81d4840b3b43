use tracing::info;
use uuid::Uuid;

use crate::db::{EventRepository, UserRepository};
use crate::error::{AppError, AppResult};
use crate::models::event::Event;
use crate::models::user::User;

/// A user's RSVP for an event. Each user can join an event once.
#[derive(Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
pub struct EventParticipation {
    pub event_id: Uuid,
    pub user_id: Uuid,
}

impl EventParticipation {
    pub async fn join<R>(event_id: Uuid, user_id: Uuid, repo: &R) -> AppResult<Self>
    where
        R: EventRepository + UserRepository + ?Sized,
    {
        Event::with_id(event_id, repo).await?;
        User::with_id(user_id, repo).await?;

        let participation = repo.insert_participation(event_id, user_id).await?;
        info!(event = %event_id, user = %user_id, "joined event");

        Ok(participation)
    }

    pub async fn leave<R>(event_id: Uuid, user_id: Uuid, repo: &R) -> AppResult<()>
    where
        R: EventRepository + ?Sized,
    {
        if repo.delete_participation(event_id, user_id).await? {
            info!(event = %event_id, user = %user_id, "left event");
            Ok(())
        } else {
            Err(AppError::not_found(format!(
                "participation of user {user_id} in event {event_id}"
            )))
        }
    }

    pub async fn participants<R>(event_id: Uuid, repo: &R) -> AppResult<Vec<User>>
    where
        R: EventRepository + ?Sized,
    {
        repo.participants(event_id).await
    }
}
