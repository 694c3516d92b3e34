use std::fs;

use assert_cmd::Command;
use predicates::str::contains;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn checkgate(home: &TempDir) -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("checkgate")?;
    cmd.arg("--home")
        .arg(home.path())
        .env("RUST_LOG", "off")
        .current_dir(home.path());
    Ok(cmd)
}

#[test]
fn prints_whitelist_in_insertion_order() -> Result<(), Box<dyn std::error::Error>> {
    let home = TempDir::new()?;
    let data = home.path().join("data");
    fs::create_dir_all(&data)?;
    fs::write(data.join("whitelist.json"), r#"{"carol": true, "alice": true}"#)?;

    checkgate(&home)?
        .arg("whitelist")
        .assert()
        .success()
        .stdout("username\ncarol\nalice\n");
    Ok(())
}

#[test]
fn lists_submitters_missing_from_whitelist_without_writing() -> Result<(), Box<dyn std::error::Error>> {
    let home = TempDir::new()?;
    let data = home.path().join("data");
    fs::create_dir_all(&data)?;
    fs::write(
        data.join("paychecks.json"),
        r#"{"555": {"submitter": "dave", "source": "filename", "ingested_at": "2026-01-01T00:00:00Z"}}"#,
    )?;
    fs::write(data.join("whitelist.json"), r#"{"carol": true}"#)?;

    let out = home.path().join("reports").join("whitelist.csv");
    checkgate(&home)?
        .arg("whitelist")
        .arg("--out")
        .arg(&out)
        .assert()
        .success()
        .stderr(contains("2 users"));
    assert_eq!(fs::read_to_string(&out)?, "username\ncarol\ndave\n");
    assert_eq!(fs::read_to_string(data.join("whitelist.json"))?, r#"{"carol": true}"#);
    Ok(())
}

#[test]
fn corrupt_stores_are_left_untouched() -> Result<(), Box<dyn std::error::Error>> {
    let home = TempDir::new()?;
    let data = home.path().join("data");
    fs::create_dir_all(&data)?;
    fs::write(data.join("whitelist.json"), "not json")?;

    checkgate(&home)?
        .arg("whitelist")
        .assert()
        .success()
        .stdout("username\n");
    assert_eq!(fs::read_to_string(data.join("whitelist.json"))?, "not json");
    assert!(!data.join("whitelist.json.bak1").exists());
    Ok(())
}

#[test]
fn run_requires_a_bot_token() -> Result<(), Box<dyn std::error::Error>> {
    let home = TempDir::new()?;
    checkgate(&home)?
        .arg("run")
        .env_remove("CHECKGATE_TOKEN")
        .env_remove("TOKEN")
        .assert()
        .failure()
        .stderr(contains("CHECKGATE_TOKEN is not set"));
    Ok(())
}
