//! Integration tests for configuration loading

use std::fs;
use std::io::Write;

use educ::config;
use tempfile::NamedTempFile;

/// Helper function to create a temporary config file with given content
fn create_temp_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp config");
    file.write_all(content.as_bytes())
        .expect("Failed to write temp config");
    file
}

#[test]
fn test_config_load_full_file() {
    let file = create_temp_config(
        r#"# educ configuration
username = "alice";
password = "s3cret";
hostname = "home.example.com|cabin.example.com";
ip_addr = "WAN_address";
sp_hostname = "dynupdate.noip.com";
port = "443";
update_interval_seconds = "3600";
primary_ip_lookup_srv = "ip1.dynupdate.no-ip.com";
backup_ip_lookup_srv = "ip2.dynupdate.no-ip.com";
force_update = "NO";
"#,
    );

    let settings = config::load(file.path()).unwrap();
    assert_eq!(settings.get("username"), "alice");
    assert_eq!(settings.get("port"), "443");
    assert_eq!(settings.get_int("update_interval_seconds", 600, 172800, 1800), 3600);
    assert!(!settings.get_bool("force_update", true));
    assert!(settings.validate().is_ok());
}

#[test]
fn test_config_load_minimal_uses_defaults() {
    let file = create_temp_config("username = \"bob\";\npassword = \"pw\";\n");

    let settings = config::load(file.path()).unwrap();
    assert_eq!(settings.get("sp_hostname"), "dynupdate.noip.com");
    assert_eq!(settings.get("port"), "80");
    assert!(settings.get_bool("force_update", false));
}

#[test]
fn test_config_load_reports_path_and_line() {
    let file = create_temp_config("username = \"bob\";\npassword = pw;\n");

    let err = config::load(file.path()).unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains(&format!("{}:2: error:", file.path().display())));
    assert!(message.contains("expected string"));
}

#[test]
fn test_config_load_rejects_duplicate() {
    let file = create_temp_config("port = \"80\";\nport = \"80\";\n");
    assert!(config::load(file.path()).is_err());
}

#[test]
fn test_config_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = config::load(&dir.path().join("absent.conf")).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to stat config"));
}

#[test]
fn test_config_load_rejects_directory() {
    let dir = tempfile::tempdir().unwrap();
    let err = config::load(dir.path()).unwrap_err();
    assert!(err.to_string().contains("not a regular file"));
}

#[test]
fn test_config_validation_catches_bad_port() {
    let file = create_temp_config("port = \"8080\";\n");
    let settings = config::load(file.path()).unwrap();
    assert!(settings.validate().is_err());
}

#[test]
fn test_config_validation_catches_bad_lookup_host() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("educ.conf");
    fs::write(&path, "primary_ip_lookup_srv = \"ip1!example\";\n").unwrap();

    let settings = config::load(&path).unwrap();
    assert!(settings.validate().is_err());
}
