use std::env;

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub blob_path: String,
    pub remote_snapshot_path: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub storage: StorageConfig,
    pub max_connections: u32,
    pub transaction_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Config {
            db_path: env::var("NATURE_ALBUM_DB_PATH")
                .unwrap_or_else(|_| "./data/database/nature-album.db".to_string()),
            storage: StorageConfig {
                blob_path: env::var("NATURE_ALBUM_BLOB_PATH")
                    .unwrap_or_else(|_| "./data/blobs".to_string()),
                remote_snapshot_path: env::var("NATURE_ALBUM_REMOTE_PATH")
                    .unwrap_or_else(|_| "./data/remote.json".to_string()),
            },
            max_connections: env::var("NATURE_ALBUM_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "4".to_string())
                .parse()?,
            transaction_attempts: env::var("NATURE_ALBUM_TRANSACTION_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env vars are process-global, so every case lives in one test.
    #[test]
    fn test_from_env_defaults_and_overrides() {
        env::remove_var("NATURE_ALBUM_DB_PATH");
        env::remove_var("NATURE_ALBUM_MAX_CONNECTIONS");
        env::remove_var("NATURE_ALBUM_TRANSACTION_ATTEMPTS");

        let config = Config::from_env().unwrap();
        assert_eq!(config.db_path, "./data/database/nature-album.db");
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.transaction_attempts, 5);

        env::set_var("NATURE_ALBUM_TRANSACTION_ATTEMPTS", "9");
        assert_eq!(Config::from_env().unwrap().transaction_attempts, 9);

        env::set_var("NATURE_ALBUM_TRANSACTION_ATTEMPTS", "many");
        assert!(Config::from_env().is_err());

        env::remove_var("NATURE_ALBUM_TRANSACTION_ATTEMPTS");
    }
}
