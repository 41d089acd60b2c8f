/// Request id reserved for the global (session level) watcher.
pub const GLOBAL_WATCHER_REQ_ID: i64 = -1;

/// First id handed out by a fresh registry.
pub(crate) const FIRST_REQ_ID: i64 = 1;

/// Version argument accepted by `set`/`delete`/`set_acl` meaning "any version".
pub const ANY_VERSION: i32 = -1;

/// Node creation flags
pub const CREATE_EPHEMERAL: u32 = 1;
pub const CREATE_SEQUENCE: u32 = 2;

/// ACL permission bits
pub const PERM_READ: u32 = 1 << 0;
pub const PERM_WRITE: u32 = 1 << 1;
pub const PERM_CREATE: u32 = 1 << 2;
pub const PERM_DELETE: u32 = 1 << 3;
pub const PERM_ADMIN: u32 = 1 << 4;
pub const PERM_ALL: u32 = PERM_READ | PERM_WRITE | PERM_CREATE | PERM_DELETE | PERM_ADMIN;

/// Config env prefix
pub(crate) const CONFIG_ENV_PREFIX: &str = "ZK";
