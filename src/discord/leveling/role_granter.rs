// Role grants for level links, addressed by role name.

use super::http_status;
use crate::core::leveling::{GrantError, RoleGranter};
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

const AUDIT_REASON: &str = "Leveler role link";

pub struct SerenityRoleGranter {
    http: Arc<serenity::Http>,
}

impl SerenityRoleGranter {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }

    async fn role_id(&self, guild_id: u64, role_name: &str) -> Result<serenity::RoleId, GrantError> {
        let roles = self
            .http
            .get_guild_roles(serenity::GuildId::new(guild_id))
            .await
            .map_err(classify)?;
        roles
            .into_iter()
            .find(|role| role.name == role_name)
            .map(|role| role.id)
            .ok_or_else(|| GrantError::RoleNotFound(role_name.to_string()))
    }
}

fn classify(err: serenity::Error) -> GrantError {
    match http_status(&err) {
        Some(403) => GrantError::PermissionDenied,
        _ => GrantError::Http(err.to_string()),
    }
}

#[async_trait]
impl RoleGranter for SerenityRoleGranter {
    async fn add_role(&self, guild_id: u64, user_id: u64, role_name: &str) -> Result<(), GrantError> {
        let role_id = self.role_id(guild_id, role_name).await?;
        self.http
            .add_member_role(
                serenity::GuildId::new(guild_id),
                serenity::UserId::new(user_id),
                role_id,
                Some(AUDIT_REASON),
            )
            .await
            .map_err(classify)?;
        tracing::debug!(guild_id, user_id, role = role_name, "Role granted");
        Ok(())
    }

    async fn remove_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_name: &str,
    ) -> Result<(), GrantError> {
        let role_id = self.role_id(guild_id, role_name).await?;
        self.http
            .remove_member_role(
                serenity::GuildId::new(guild_id),
                serenity::UserId::new(user_id),
                role_id,
                Some(AUDIT_REASON),
            )
            .await
            .map_err(classify)?;
        tracing::debug!(guild_id, user_id, role = role_name, "Role removed");
        Ok(())
    }
}
