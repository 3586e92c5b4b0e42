// Serenity adapters for the leveling core.

pub mod leveling_announcements;
pub mod role_granter;

pub use leveling_announcements::SerenityNotifier;
pub use role_granter::SerenityRoleGranter;

use poise::serenity_prelude as serenity;

/// HTTP status of a failed Discord request, if the failure came from Discord.
fn http_status(err: &serenity::Error) -> Option<u16> {
    match err {
        serenity::Error::Http(serenity::HttpError::UnsuccessfulRequest(response)) => {
            Some(response.status_code.as_u16())
        }
        _ => None,
    }
}
