use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Maximum cumulative bytes a single user may store.
pub const MAX_STORAGE_LIMIT: i64 = 50 * 1024 * 1024; // 50 MiB

/// Default per-file upload cap, applied to most accepted types.
pub const MAX_FILE_SIZE_BYTES: i64 = 4 * 1024 * 1024;

const MIB: i64 = 1024 * 1024;

/// Per-type upload size cap for an accepted MIME type, or `None` when the
/// type is not accepted at all.
pub fn max_size_for_mime(mime_type: &str) -> Option<i64> {
    match mime_type {
        // images
        "image/jpeg" | "image/png" | "image/gif" | "image/webp" | "image/svg+xml" => {
            Some(MAX_FILE_SIZE_BYTES)
        }
        // documents
        "application/pdf"
        | "application/msword"
        | "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        | "text/plain"
        | "text/csv"
        | "application/rtf" => Some(MAX_FILE_SIZE_BYTES),
        // spreadsheets
        "application/vnd.ms-excel"
        | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
            Some(MAX_FILE_SIZE_BYTES)
        }
        // presentations
        "application/vnd.ms-powerpoint"
        | "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
            Some(MAX_FILE_SIZE_BYTES)
        }
        // audio
        "audio/mpeg" | "audio/ogg" => Some(10 * MIB),
        "audio/wav" => Some(20 * MIB),
        // video
        "video/mp4" | "video/webm" => Some(50 * MIB),
        // archives
        "application/zip" | "application/x-rar-compressed" => Some(MAX_FILE_SIZE_BYTES),
        _ => None,
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub blob_dir: String,
    pub database_url: String,
    /// Token required by `POST /internal/users`. Provisioning is disabled
    /// when unset.
    pub admin_token: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Better Drive — personal cloud storage API")]
pub struct Args {
    /// Host to bind to (overrides BETTER_DRIVE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BETTER_DRIVE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where blob payloads are stored (overrides BETTER_DRIVE_BLOB_DIR)
    #[arg(long)]
    pub blob_dir: Option<String>,

    /// Database URL (overrides BETTER_DRIVE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Admin token for user provisioning (overrides BETTER_DRIVE_ADMIN_TOKEN)
    #[arg(long)]
    pub admin_token: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        let env_host = env::var("BETTER_DRIVE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("BETTER_DRIVE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing BETTER_DRIVE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading BETTER_DRIVE_PORT"),
        };
        let env_blob_dir =
            env::var("BETTER_DRIVE_BLOB_DIR").unwrap_or_else(|_| "./data/blobs".into());
        let env_db = env::var("BETTER_DRIVE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/better_drive.db".into());
        let env_admin = env::var("BETTER_DRIVE_ADMIN_TOKEN").ok();

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            blob_dir: args.blob_dir.unwrap_or(env_blob_dir),
            database_url: args.database_url.unwrap_or(env_db),
            admin_token: args.admin_token.or(env_admin),
        };

        Ok((cfg, args.migrate))
    }

    /// Configuration used by tests: no provisioning token checks beyond the
    /// fixed `test-admin` value, everything else left at throwaway values.
    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            blob_dir: String::new(),
            database_url: "sqlite::memory:".into(),
            admin_token: Some("test-admin".into()),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_types_have_caps() {
        assert_eq!(max_size_for_mime("image/png"), Some(MAX_FILE_SIZE_BYTES));
        assert_eq!(max_size_for_mime("audio/wav"), Some(20 * MIB));
        assert_eq!(max_size_for_mime("video/mp4"), Some(50 * MIB));
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert_eq!(max_size_for_mime("application/x-sh"), None);
        assert_eq!(max_size_for_mime(""), None);
    }
}
