//! Default configuration values and on-disk names for scribepool.

/// Default currency for task rewards.
pub const CURRENCY: &str = "USD";

/// Default time a worker has to finish one task.
pub const DEADLINE: &str = "3h";

/// Default time a task stays listed on the marketplace.
pub const LIFETIME: &str = "2d";

/// Default time after submission before work is auto-approved.
pub const APPROVAL: &str = "1d";

/// Default number of independent transcriptions per chunk.
pub const COPIES: &str = "1";

/// Default S3 region when `remote-object-store.region` is unset.
pub const S3_REGION: &str = "us-east-1";

/// Name of the project's data directory.
pub const DATA_DIR: &str = "data";

/// File holding the project's stable identifier.
pub const ID_FILE: &str = "id.txt";

/// Production record table.
pub const RECORD_TABLE: &str = "assignment.csv";

/// Record table used for sandbox runs.
pub const SANDBOX_RECORD_TABLE: &str = "sandbox-assignment.csv";

/// Length of the random suffix appended to derived remote names.
pub const RANDOM_SUFFIX_LEN: usize = 6;
