// Discord commands module.
// Each feature gets its own command file.

pub mod leveling;

// Server configuration for the leveler
pub mod lvladmin;

// Role and badge rewards
pub mod links;

// Level imports from Mee6 and Tatsumaki
pub mod imports;
