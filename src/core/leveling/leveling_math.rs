// XP ledger math.
//
// Level `n` needs `139n + 65` experience to advance, so the experience
// accumulated by reaching level `L` is a closed-form arithmetic sum and the
// inverse is a quadratic root. The root is taken with an integer square
// root so the two functions are exact inverses. Intermediate products are
// taken in u128; results past u64::MAX saturate.

use super::leveling_models::{LevelUpEvent, UserRecord};

const LEVEL_STEP: u64 = 139;
const LEVEL_BASE: u64 = 65;

/// Experience needed to go from `level` to `level + 1`. Zero for negative levels.
pub fn required_experience(level: i64) -> u64 {
    if level < 0 {
        return 0;
    }
    LEVEL_STEP
        .saturating_mul(level as u64)
        .saturating_add(LEVEL_BASE)
}

/// Experience accumulated by reaching `level` from level 0.
pub fn cumulative_experience_for_level(level: u32) -> u64 {
    let level = u128::from(level);
    // level * (level - 1) is always even
    let total = u128::from(LEVEL_BASE) * level
        + u128::from(LEVEL_STEP) * level * level.saturating_sub(1) / 2;
    u64::try_from(total).unwrap_or(u64::MAX)
}

/// Highest level whose cumulative requirement is `<= total`.
pub fn level_for_cumulative_experience(total: u64) -> u32 {
    let discriminant = 81 + 1112 * u128::from(total);
    let level = (9 + integer_sqrt(discriminant)) / 278;
    u32::try_from(level).unwrap_or(u32::MAX)
}

fn integer_sqrt(n: u128) -> u128 {
    if n < 2 {
        return n;
    }
    let mut root = (n as f64).sqrt() as u128;
    while root * root > n {
        root -= 1;
    }
    while (root + 1) * (root + 1) <= n {
        root += 1;
    }
    root
}

/// Credit `delta` experience to a user in a guild.
///
/// Partial progress rolls over as many times as it covers the requirement of
/// the current level; one [`LevelUpEvent`] is produced per level crossed.
/// `total_exp` grows by `delta` regardless.
pub fn apply_experience(
    record: &mut UserRecord,
    guild_id: u64,
    delta: u64,
    channel_id: Option<u64>,
) -> Vec<LevelUpEvent> {
    record.total_exp = record.total_exp.saturating_add(delta);
    let total_xp = record.total_exp;
    let user_id = record.user_id;

    let progress = record.progress_mut(guild_id);
    progress.current_exp = progress.current_exp.saturating_add(delta);

    let mut events = Vec::new();
    loop {
        let required = required_experience(i64::from(progress.level));
        if progress.current_exp < required {
            break;
        }
        progress.current_exp -= required;
        progress.level += 1;
        events.push(LevelUpEvent {
            user_id,
            guild_id,
            old_level: progress.level - 1,
            new_level: progress.level,
            total_xp,
            channel_id,
        });
    }
    events
}

/// Force a user's level in a guild.
///
/// Experience attributable to the old level (and its partial progress) is
/// taken out of `total_exp` and the cumulative requirement of the new level
/// is put back in, so totals stay consistent with levels.
pub fn assign_level(record: &mut UserRecord, guild_id: u64, level: u32) {
    let old = record.progress(guild_id);
    let old_exp = cumulative_experience_for_level(old.level).saturating_add(old.current_exp);

    record.total_exp = record
        .total_exp
        .saturating_sub(old_exp)
        .saturating_add(cumulative_experience_for_level(level));

    let progress = record.progress_mut(guild_id);
    progress.level = level;
    progress.current_exp = 0;
}
