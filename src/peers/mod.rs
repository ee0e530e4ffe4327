//! Server-to-server discovery: a directory of known servers and the task
//! that keeps it fresh.

pub mod directory;
pub mod sync;

/// Header carrying the shared secret on `/api/healthcheck`
pub const HEALTH_SECRET_HEADER: &str = "x-health-secret";
