// Command name constants

// Counter reads and writes
pub const COMMAND_VIEW: &str = "view";
pub const COMMAND_TOTAL: &str = "total";
pub const COMMAND_COUNTERS: &str = "counters";
pub const COMMAND_STATS: &str = "stats";

// Replication
pub const COMMAND_SYNC: &str = "sync";
pub const COMMAND_FORCE_SYNC: &str = "force-sync";

// Server operations
pub const COMMAND_METRICS: &str = "metrics";
pub const COMMAND_HEALTH: &str = "health";
pub const COMMAND_CONNECT: &str = "connect";
