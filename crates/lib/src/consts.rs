pub const APP_NAME: &str = "forge";

/// Magic tag at the start of every database file.
pub const DB_MAGIC: [u8; 3] = *b"FDB";

/// Database layout version. Bump on any header or body change.
pub const DB_VERSION: u8 = 4;

/// Size of the database header: magic(3) + version(1).
pub const DB_HEADER_SIZE: usize = 4;

/// Extension used for database files.
pub const DB_EXTENSION: &str = "fdb";

/// Default configuration file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "forge.json";

/// Input placeholder in tool argument strings.
pub const ARG_INPUTS: &str = "%1";

/// Output placeholder in tool argument strings.
pub const ARG_OUTPUT: &str = "%2";

/// Environment variable overriding the default worker count.
pub const ENV_WORKERS: &str = "FORGE_WORKERS";
