//! Process exit codes.
//!
//! These are the only structured signal scripting callers get, so the
//! values are stable.

pub const SUCCESS: i32 = 0;
pub const ERR_GENERIC: i32 = 1;
pub const ERR_API: i32 = 102;
pub const ERR_CONFIG_FILE_PARSE: i32 = 103;
pub const ERR_AUTH: i32 = 104;
pub const ERR_CONFIG_FILE_READ: i32 = 110;
pub const ERR_CONFIG_FILE_WRITE: i32 = 111;
pub const ERR_BACKOFF: i32 = 112;
