//! Database migration management.
//!
//! This module handles SQLx migrations embedded into the binary at compile
//! time. Migrations are extracted to a temporary directory at runtime and
//! then executed, so distributed binaries work without the migrations
//! directory present alongside the executable.

use include_dir::{include_dir, Dir};
use sqlx::{Pool, Sqlite};
use tempfile::TempDir;

// Embed migrations directory into the binary at compile time
static MIGRATIONS_DIR: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/migrations");

/// Runs SQLx migrations embedded in the binary.
///
/// In development builds, it uses the source migrations directory directly
/// (faster). In distributed binaries, it extracts embedded migrations to a
/// temp directory. A migration failure is fatal at startup.
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<(), anyhow::Error> {
    // In development, try to use the source migrations directory first (faster)
    let source_migrations = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");

    if source_migrations.exists() {
        let migrator = sqlx::migrate::Migrator::new(source_migrations.as_path()).await?;
        migrator.run(pool).await?;
        Ok(())
    } else {
        // Keep temp_dir in scope for the entire function so files stay available
        let _temp_dir = TempDir::new()?;
        let migrations_path = _temp_dir.path().join("migrations");
        std::fs::create_dir_all(&migrations_path)?;

        for file in MIGRATIONS_DIR.files() {
            let file_path = migrations_path.join(file.path());
            if let Some(parent) = file_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&file_path, file.contents())?;
        }

        let migrator = sqlx::migrate::Migrator::new(migrations_path.as_path()).await?;
        migrator.run(pool).await?;
        Ok(())
    }
}
