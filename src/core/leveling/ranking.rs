// Leaderboard ranker.
//
// Boards are built from whatever records the store hands back: the ranker
// applies inclusion floors, a stable descending sort and the global cap.
// Ties keep the order the records were encountered in.

use super::leveling_models::UserRecord;
use super::leveling_store::{SortKey, UserQuery};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Global boards never rank beyond this position.
pub const GLOBAL_RANK_CAP: usize = 1000;

/// Minimum total experience to appear on the global XP board.
pub const GLOBAL_EXP_FLOOR: u64 = 10;

/// Minimum reputation to appear on a reputation board.
pub const REP_FLOOR: u32 = 1;

pub const PAGE_SIZE: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardScope {
    Guild(u64),
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardMetric {
    Experience,
    Reputation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardQuery {
    pub scope: BoardScope,
    pub metric: BoardMetric,
}

impl BoardQuery {
    pub fn new(scope: BoardScope, metric: BoardMetric) -> Self {
        Self { scope, metric }
    }

    /// The store query that fetches every candidate for this board.
    pub fn store_query(&self) -> UserQuery {
        match (self.scope, self.metric) {
            (BoardScope::Global, BoardMetric::Experience) => UserQuery {
                min_total_exp: Some(GLOBAL_EXP_FLOOR),
                sort: Some(SortKey::TotalExp),
                limit: Some(GLOBAL_RANK_CAP),
                ..UserQuery::default()
            },
            (BoardScope::Global, BoardMetric::Reputation) => UserQuery {
                min_rep: Some(REP_FLOOR),
                sort: Some(SortKey::Rep),
                limit: Some(GLOBAL_RANK_CAP),
                ..UserQuery::default()
            },
            (BoardScope::Guild(guild_id), BoardMetric::Experience) => UserQuery::in_guild(guild_id),
            (BoardScope::Guild(guild_id), BoardMetric::Reputation) => UserQuery {
                min_rep: Some(REP_FLOOR),
                sort: Some(SortKey::Rep),
                ..UserQuery::in_guild(guild_id)
            },
        }
    }

    /// Metric value for a record, or `None` if it is below the inclusion floor.
    pub fn metric_value(&self, record: &UserRecord) -> Option<u64> {
        if let BoardScope::Guild(guild_id) = self.scope {
            if !record.is_in_guild(guild_id) {
                return None;
            }
        }
        match (self.scope, self.metric) {
            (BoardScope::Global, BoardMetric::Experience) => {
                Some(record.total_exp).filter(|xp| *xp >= GLOBAL_EXP_FLOOR)
            }
            (BoardScope::Guild(guild_id), BoardMetric::Experience) => {
                record.guild_experience(guild_id)
            }
            (_, BoardMetric::Reputation) => {
                Some(u64::from(record.rep)).filter(|rep| *rep >= u64::from(REP_FLOOR))
            }
        }
    }
}

/// 1-based position on a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rank {
    Ranked(usize),
    Unranked,
}

impl Rank {
    #[cfg(test)]
    fn position(&self) -> Option<usize> {
        match self {
            Rank::Ranked(position) => Some(*position),
            Rank::Unranked => None,
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rank::Ranked(position) => write!(f, "#{}", position),
            Rank::Unranked => write!(f, "unranked"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedEntry {
    pub user_id: u64,
    pub username: String,
    pub value: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageError {
    #[error("There are no results to display")]
    Empty,

    #[error("Please enter a valid page number! (1 - {pages})")]
    OutOfRange { pages: usize },
}

#[derive(Debug, Clone)]
pub struct LeaderboardPage<'a> {
    pub page: usize,
    pub pages: usize,
    /// Rank of the first entry on this page.
    pub first_rank: usize,
    pub entries: &'a [RankedEntry],
}

#[derive(Debug, Clone)]
pub struct Leaderboard {
    pub query: BoardQuery,
    entries: Vec<RankedEntry>,
}

impl Leaderboard {
    /// Build a board from candidate records.
    ///
    /// `members` restricts guild boards to users still in the guild; it is
    /// ignored for global boards.
    pub fn build<'a, I>(query: BoardQuery, records: I, members: Option<&HashSet<u64>>) -> Self
    where
        I: IntoIterator<Item = &'a UserRecord>,
    {
        let member_filter = match query.scope {
            BoardScope::Guild(_) => members,
            BoardScope::Global => None,
        };

        let mut entries: Vec<RankedEntry> = records
            .into_iter()
            .filter(|record| member_filter.map_or(true, |m| m.contains(&record.user_id)))
            .filter_map(|record| {
                query.metric_value(record).map(|value| RankedEntry {
                    user_id: record.user_id,
                    username: record.username.clone(),
                    value,
                })
            })
            .collect();

        // sort_by is stable, so equal values keep encounter order
        entries.sort_by(|a, b| b.value.cmp(&a.value));

        if query.scope == BoardScope::Global {
            entries.truncate(GLOBAL_RANK_CAP);
        }

        Self { query, entries }
    }

    #[cfg(test)]
    fn entries(&self) -> &[RankedEntry] {
        &self.entries
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn rank_of(&self, user_id: u64) -> Rank {
        self.entries
            .iter()
            .position(|entry| entry.user_id == user_id)
            .map_or(Rank::Unranked, |index| Rank::Ranked(index + 1))
    }

    pub fn value_of(&self, user_id: u64) -> Option<u64> {
        self.entries
            .iter()
            .find(|entry| entry.user_id == user_id)
            .map(|entry| entry.value)
    }

    pub fn page_count(&self) -> usize {
        self.entries.len().div_ceil(PAGE_SIZE)
    }

    /// 1-based page of [`PAGE_SIZE`] entries.
    pub fn page(&self, page: usize) -> Result<LeaderboardPage<'_>, PageError> {
        let pages = self.page_count();
        if pages == 0 {
            return Err(PageError::Empty);
        }
        if page == 0 || page > pages {
            return Err(PageError::OutOfRange { pages });
        }

        let start = (page - 1) * PAGE_SIZE;
        let end = (start + PAGE_SIZE).min(self.entries.len());
        Ok(LeaderboardPage {
            page,
            pages,
            first_rank: start + 1,
            entries: &self.entries[start..end],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::leveling::leveling_models::GuildProgress;

    fn user(user_id: u64, total_exp: u64, rep: u32) -> UserRecord {
        let mut record = UserRecord::new(user_id, format!("user{user_id}"));
        record.total_exp = total_exp;
        record.rep = rep;
        record
    }

    fn in_guild(mut record: UserRecord, guild_id: u64, level: u32, current_exp: u64) -> UserRecord {
        record
            .servers
            .insert(guild_id, GuildProgress { level, current_exp });
        record
    }

    fn global_xp() -> BoardQuery {
        BoardQuery::new(BoardScope::Global, BoardMetric::Experience)
    }

    #[test]
    fn global_board_sorts_descending_and_is_stable() {
        let records = vec![user(1, 50, 0), user(2, 300, 0), user(3, 50, 0), user(4, 120, 0)];
        let board = Leaderboard::build(global_xp(), &records, None);
        let order: Vec<u64> = board.entries().iter().map(|e| e.user_id).collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
        assert!(board
            .entries()
            .windows(2)
            .all(|pair| pair[0].value >= pair[1].value));
    }

    #[test]
    fn floors_exclude_low_metrics() {
        let records = vec![user(1, 9, 0), user(2, 10, 1), user(3, 500, 0)];
        let xp_board = Leaderboard::build(global_xp(), &records, None);
        assert_eq!(xp_board.rank_of(1), Rank::Unranked);
        assert_eq!(xp_board.rank_of(2), Rank::Ranked(2));

        let rep_board = Leaderboard::build(
            BoardQuery::new(BoardScope::Global, BoardMetric::Reputation),
            &records,
            None,
        );
        assert_eq!(rep_board.len(), 1);
        assert_eq!(rep_board.rank_of(3), Rank::Unranked);
    }

    #[test]
    fn guild_board_uses_level_derived_experience() {
        let records = vec![
            // level 2 + 0 = 269
            in_guild(user(1, 10_000, 0), 7, 2, 0),
            // level 1 + 100 = 165
            in_guild(user(2, 20_000, 0), 7, 1, 100),
            // level 3 + 0 = 612
            in_guild(user(3, 5, 0), 7, 3, 0),
            // other guild only
            in_guild(user(4, 90_000, 0), 8, 30, 0),
        ];
        let board = Leaderboard::build(
            BoardQuery::new(BoardScope::Guild(7), BoardMetric::Experience),
            &records,
            None,
        );
        let values: Vec<(u64, u64)> = board.entries().iter().map(|e| (e.user_id, e.value)).collect();
        assert_eq!(values, vec![(3, 612), (1, 269), (2, 165)]);
        assert_eq!(board.rank_of(4), Rank::Unranked);
    }

    #[test]
    fn guild_board_respects_membership() {
        let records = vec![in_guild(user(1, 0, 0), 7, 2, 0), in_guild(user(2, 0, 0), 7, 5, 0)];
        let members: HashSet<u64> = [1].into_iter().collect();
        let board = Leaderboard::build(
            BoardQuery::new(BoardScope::Guild(7), BoardMetric::Experience),
            &records,
            Some(&members),
        );
        assert_eq!(board.rank_of(1), Rank::Ranked(1));
        assert_eq!(board.rank_of(2), Rank::Unranked);
    }

    #[test]
    fn global_board_is_capped() {
        let records: Vec<UserRecord> = (1..=1_005u64).map(|id| user(id, 100_000 - id, 0)).collect();
        let board = Leaderboard::build(global_xp(), &records, None);
        assert_eq!(board.len(), GLOBAL_RANK_CAP);
        assert_eq!(board.rank_of(1000), Rank::Ranked(1000));
        assert_eq!(board.rank_of(1001), Rank::Unranked);
        assert_eq!(board.rank_of(1001).position(), None);
    }

    #[test]
    fn pages_are_fifteen_long() {
        let records: Vec<UserRecord> = (1..=20u64).map(|id| user(id, 1_000 - id, 0)).collect();
        let board = Leaderboard::build(global_xp(), &records, None);
        assert_eq!(board.page_count(), 2);

        let second = board.page(2).unwrap();
        assert_eq!(second.first_rank, 16);
        assert_eq!(second.entries.len(), 5);
        assert_eq!(board.page(3).unwrap_err(), PageError::OutOfRange { pages: 2 });
        assert_eq!(board.page(0).unwrap_err(), PageError::OutOfRange { pages: 2 });

        let empty = Leaderboard::build(global_xp(), &Vec::new(), None);
        assert_eq!(empty.page(1).unwrap_err(), PageError::Empty);
    }

    #[test]
    fn rank_display() {
        assert_eq!(Rank::Ranked(3).to_string(), "#3");
        assert_eq!(Rank::Unranked.to_string(), "unranked");
    }

    #[test]
    fn store_queries_follow_the_board() {
        let query = BoardQuery::new(BoardScope::Guild(5), BoardMetric::Reputation).store_query();
        assert_eq!(query.guild_id, Some(5));
        assert_eq!(query.min_rep, Some(REP_FLOOR));
        assert_eq!(query.limit, None);

        let global = global_xp().store_query();
        assert_eq!(global.limit, Some(GLOBAL_RANK_CAP));
        assert_eq!(global.sort, Some(SortKey::TotalExp));
    }
}
