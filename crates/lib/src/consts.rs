//! Crate-wide constants.

/// Application name used for cache and config directories.
pub const APP_NAME: &str = "wasmpipe";

/// Default configuration file name, looked up in the project root.
pub const CONFIG_FILENAME: &str = "wasmpipe.toml";

/// Environment variable overriding the cache root.
pub const CACHE_DIR_ENV: &str = "WASMPIPE_CACHE_DIR";

/// Subdirectory of the cache root holding native module entries.
pub const NATIVE_CACHE_SUBDIR: &str = "native";

/// Cache entry metadata file inside a fingerprint directory.
pub const CACHE_ENTRY_FILENAME: &str = "entry.json";

/// Version of the cache entry format; other versions are cache misses.
pub const CACHE_ENTRY_VERSION: u32 = 1;

/// Probe file used to check that the output directory is writable.
pub const WRITE_PROBE_FILENAME: &str = ".wasmpipe-write-probe";

/// `SOURCE_DATE_EPOCH` handed to the native toolchain (1980-01-01, the ZIP epoch).
pub const SOURCE_DATE_EPOCH: &str = "315532800";

/// Directory names never included in a native source fingerprint.
pub const FINGERPRINT_EXCLUSIONS: &[&str] = &["target", ".git", "node_modules"];

/// The only triple `wasm-pack` can build.
pub const WASM_TARGET_TRIPLE: &str = "wasm32-unknown-unknown";
