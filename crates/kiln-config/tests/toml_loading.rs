//! Integration tests for TOML and environment configuration loading.
//!
//! Uses figment::Jail for sandboxed file and env var manipulation.

use std::path::Path;

use figment::Jail;
use kiln_config::KilnConfig;

#[test]
fn explicit_file_overrides_defaults() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "kiln.toml",
            r#"
[catalog]
base_url = "http://localhost:8080"
cache_ttl_secs = 30
max_attempts = 5

[import]
concurrency = 2
rules_path = "rules/monsters.toml"

[store]
path = ":memory:"
stale_claim_secs = 60
"#,
        )?;

        let config: KilnConfig = KilnConfig::figment(Some(Path::new("kiln.toml"))).extract()?;
        assert_eq!(config.catalog.base_url, "http://localhost:8080");
        assert_eq!(config.catalog.cache_ttl_secs, 30);
        assert_eq!(config.catalog.max_attempts, 5);
        assert_eq!(config.catalog.timeout_secs, 10);
        assert_eq!(config.import.concurrency, 2);
        assert_eq!(config.import.rules_path, "rules/monsters.toml");
        assert_eq!(config.store.path, ":memory:");
        assert_eq!(config.store.stale_claim_age().as_secs(), 60);
        Ok(())
    });
}

#[test]
fn project_file_is_picked_up() {
    Jail::expect_with(|jail| {
        jail.create_dir(".kiln")?;
        jail.create_file(".kiln/config.toml", "[import]\nconcurrency = 8\n")?;

        let config: KilnConfig = KilnConfig::figment(None).extract()?;
        assert_eq!(config.import.concurrency, 8);
        Ok(())
    });
}

#[test]
fn env_beats_toml() {
    Jail::expect_with(|jail| {
        jail.create_file("kiln.toml", "[import]\nconcurrency = 2\n")?;
        jail.set_env("KILN_IMPORT__CONCURRENCY", "6");
        jail.set_env("KILN_CATALOG__BASE_URL", "http://mirror.local");

        let config: KilnConfig = KilnConfig::figment(Some(Path::new("kiln.toml"))).extract()?;
        assert_eq!(config.import.concurrency, 6);
        assert_eq!(config.catalog.base_url, "http://mirror.local");
        Ok(())
    });
}

#[test]
fn load_rejects_zero_attempts() {
    Jail::expect_with(|jail| {
        jail.set_env("KILN_CATALOG__MAX_ATTEMPTS", "0");
        assert!(KilnConfig::load().is_err());
        Ok(())
    });
}
