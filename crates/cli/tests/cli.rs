//! End-to-end tests for the `dw` binary

mod common;

use anyhow::Result;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_config_example_is_valid_toml() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let result = dw!(temp_dir.path(), "config", "--example").assert_success()?;

    let value: toml::Value = toml::from_str(&result.stdout)?;
    assert_eq!(value["watch"]["buffer_size"].as_integer(), Some(16384));
    assert_eq!(value["output"]["poll_interval_ms"].as_integer(), Some(100));
    Ok(())
}

#[test]
fn test_config_path_honors_environment() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let result = dw!(temp_dir.path(), "config", "--path").assert_success()?;

    assert_eq!(
        result.stdout.trim(),
        temp_dir.path().join("config.toml").display().to_string()
    );
    Ok(())
}

#[test]
fn test_config_shows_file_values() -> Result<()> {
    let temp_dir = TempDir::new()?;
    std::fs::write(
        temp_dir.path().join("config.toml"),
        "[watch]\nbuffer_size = 65536\n",
    )?;

    let result = dw!(temp_dir.path(), "config").assert_success()?;
    assert!(result.contains_stdout("buffer_size = 65536"));
    Ok(())
}

#[test]
fn test_invalid_config_is_rejected() -> Result<()> {
    let temp_dir = TempDir::new()?;
    std::fs::write(temp_dir.path().join("config.toml"), "[watch]\nbuffer_size = 1\n")?;

    let result = dw!(temp_dir.path(), "config").assert_failure()?;
    assert!(result.contains_stderr("buffer_size"));
    Ok(())
}

#[test]
fn test_watch_requires_a_path() -> Result<()> {
    let temp_dir = TempDir::new()?;
    dw!(temp_dir.path(), "watch").assert_failure()?;
    Ok(())
}

#[test]
fn test_watch_missing_directory_exits() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let missing = temp_dir.path().join("missing");
    let missing = missing.to_str().unwrap();

    let result = dw!(temp_dir.path(), "watch", "--json", missing).assert_failure()?;
    assert!(result.contains_stderr("No directories left to watch"));

    let kinds: Vec<String> = result
        .stdout
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap())
        .map(|value| value["kind"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(kinds, vec!["error", "task_terminate"]);
    Ok(())
}

#[test]
fn test_piped_human_output_has_no_color_codes() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let missing = temp_dir.path().join("missing");
    let missing = missing.to_str().unwrap();

    let result = dw!(temp_dir.path(), "watch", missing).assert_failure()?;
    assert!(result.contains_stdout("error"));
    assert!(!result.stdout.contains('\u{1b}'));
    Ok(())
}

#[cfg(target_os = "linux")]
#[test]
fn test_watch_streams_json_and_applies_excludes() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let watched = temp_dir.path().join("watched");
    std::fs::create_dir(&watched)?;
    let watched_str = watched.to_str().unwrap();

    let running = dw!(
        temp_dir.path(),
        "watch",
        "--json",
        "--no-recursive",
        "--exclude",
        "*.tmp",
        watched_str
    )
    .spawn()?;

    let timeout = Duration::from_secs(10);
    running.wait_for_line(timeout, |line| line.contains("\"task_add\""))?;

    std::fs::write(watched.join("skip.tmp"), b"x")?;
    std::fs::write(watched.join("keep.txt"), b"x")?;

    let line = running.wait_for_line(timeout, |line| line.contains("\"create\""))?;
    let value: serde_json::Value = serde_json::from_str(&line)?;
    assert_eq!(
        value["payload"].as_str(),
        Some(watched.join("keep.txt").to_str().unwrap())
    );
    Ok(())
}
