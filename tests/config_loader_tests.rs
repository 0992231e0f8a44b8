use healthhub::config::{ConfigLoader, StoreBackend};
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

const VARS: [&str; 8] = [
    "HEALTHHUB_PROFILE",
    "HEALTHHUB_API_BIND_ADDR",
    "HEALTHHUB_LOG_LEVEL",
    "HEALTHHUB_JWT_SECRET",
    "HEALTHHUB_STORE_BACKEND",
    "HEALTHHUB_DATABASE_URL",
    "HEALTHHUB_MAX_LOGIN_ATTEMPTS",
    "HEALTHHUB_CACHE_TTL_SECONDS",
];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    for var in VARS {
        unsafe {
            env::remove_var(var);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

fn loader(dir: &TempDir) -> ConfigLoader {
    ConfigLoader::with_base_dir(PathBuf::from(dir.path()))
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    let cfg = loader(&temp_dir).load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.store_backend, StoreBackend::Memory);
    assert_eq!(cfg.max_login_attempts, 3);
    assert!(!cfg.jwt_secret.is_empty(), "local profile gets a development secret");
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "HEALTHHUB_API_BIND_ADDR=127.0.0.1:3000\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "HEALTHHUB_API_BIND_ADDR=192.168.0.10:5000\nHEALTHHUB_CACHE_TTL_SECONDS=30\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "HEALTHHUB_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "HEALTHHUB_PROFILE=test\nHEALTHHUB_API_BIND_ADDR=127.0.0.1:4000\n",
    );

    let cfg = loader(&temp_dir)
        .load()
        .expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    assert_eq!(cfg.cache_ttl_seconds, 30);
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "HEALTHHUB_API_BIND_ADDR=127.0.0.1:3000\nHEALTHHUB_MAX_LOGIN_ATTEMPTS=5\n",
    );

    unsafe {
        env::set_var("HEALTHHUB_API_BIND_ADDR", "0.0.0.0:9090");
        env::set_var("HEALTHHUB_MAX_LOGIN_ATTEMPTS", "4");
    }

    let cfg = loader(&temp_dir).load().expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");
    assert_eq!(cfg.max_login_attempts, 4);

    clear_env();
}

#[test]
fn production_profile_requires_a_strong_secret() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    unsafe {
        env::set_var("HEALTHHUB_PROFILE", "production");
    }
    let err = loader(&temp_dir)
        .load()
        .expect_err("production without a secret should fail");
    assert!(err.to_string().contains("HEALTHHUB_JWT_SECRET"));

    unsafe {
        env::set_var("HEALTHHUB_JWT_SECRET", "too-short");
    }
    let err = loader(&temp_dir).load().expect_err("weak secret should fail");
    assert!(err.to_string().contains("at least"));

    unsafe {
        env::set_var(
            "HEALTHHUB_JWT_SECRET",
            "a-production-secret-that-is-long-enough-0123",
        );
    }
    let cfg = loader(&temp_dir).load().expect("strong secret loads");
    assert_eq!(cfg.profile, "production");

    clear_env();
}

#[test]
fn database_backend_is_selected_from_env() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "HEALTHHUB_STORE_BACKEND=Database\nHEALTHHUB_DATABASE_URL=postgres://app:secret@db:5432/healthhub\n",
    );

    let cfg = loader(&temp_dir).load().expect("database config loads");
    assert_eq!(cfg.store_backend, StoreBackend::Database);
    let redacted = cfg.redacted_json().unwrap();
    assert!(!redacted.contains("secret@"));
    assert!(redacted.contains("[REDACTED]"));

    clear_env();
}

#[test]
fn invalid_values_return_errors() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    unsafe {
        env::set_var("HEALTHHUB_API_BIND_ADDR", "not-an-addr");
    }
    let err = loader(&temp_dir)
        .load()
        .expect_err("invalid bind addr should fail");
    assert!(format!("{}", err).contains("invalid api bind address"));
    clear_env();

    unsafe {
        env::set_var("HEALTHHUB_MAX_LOGIN_ATTEMPTS", "three");
    }
    let err = loader(&temp_dir)
        .load()
        .expect_err("non-numeric value should fail");
    assert!(err.to_string().contains("HEALTHHUB_MAX_LOGIN_ATTEMPTS"));
    clear_env();

    unsafe {
        env::set_var("HEALTHHUB_STORE_BACKEND", "redis");
    }
    let err = loader(&temp_dir)
        .load()
        .expect_err("unknown backend should fail");
    assert!(err.to_string().contains("store backend"));

    clear_env();
}
