//! Integration tests for the loopctl binary.
//!
//! These tests verify end-to-end behavior including:
//! - Input snapshot loading and error reporting
//! - Forecast output (human, JSON and CSV)
//! - Recommendation kinds
//! - Configuration handling

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Helper to create a test data directory
fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Helper to get the path to the CLI binary
fn cli() -> Command {
    Command::cargo_bin("loopctl").expect("Failed to find loopctl binary")
}

/// Snapshot with steady glucose at `glucose` mg/dL over the last hour
fn snapshot(glucose: f64) -> Value {
    let history: Vec<Value> = (0..12)
        .map(|i| {
            let minute = 5 * (i + 1);
            json!({
                "timestamp": format!("2024-03-01T{}:{:02}:00Z", 11 + minute / 60, minute % 60),
                "value": glucose,
            })
        })
        .collect();
    let segment = |value: Value| json!([{ "start": "2024-02-29T00:00:00Z", "value": value }]);

    json!({
        "glucose_history": history,
        "basal": segment(json!(1.0)),
        "sensitivity": segment(json!(50.0)),
        "carb_ratio": segment(json!(10.0)),
        "target": segment(json!({ "min": 100.0, "max": 120.0 })),
        "suspend_threshold": 70.0,
        "max_bolus": 10.0,
        "max_basal_rate": 4.0,
    })
}

fn write_input(dir: &Path, value: &Value) -> PathBuf {
    let path = dir.join("input.json");
    fs::write(&path, serde_json::to_string_pretty(value).unwrap()).expect("Failed to write input");
    path
}

/// Config path that never exists, so defaults apply regardless of the host
fn no_config(dir: &Path) -> PathBuf {
    dir.join("missing").join("config.toml")
}

/// Run with `--json` and the default config, returning parsed stdout
fn run_json(args: &[&str], input: &Path) -> Value {
    let home = input.parent().expect("input has a parent");
    let output = cli()
        .env("XDG_CONFIG_HOME", home)
        .args(args)
        .arg("--input")
        .arg(input)
        .arg("--json")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("stdout is not JSON")
}

#[test]
fn test_cli_help() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Glucose forecasting and insulin dosing engine"));
}

#[test]
fn test_predict_human_output() {
    let temp_dir = setup_test_dir();
    let input = write_input(temp_dir.path(), &snapshot(150.0));

    cli()
        .env("XDG_CONFIG_HOME", temp_dir.path())
        .arg("predict")
        .arg("--input")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("GLUCOSE FORECAST"))
        .stdout(predicate::str::contains("Eventual:  150 mg/dL"));
}

#[test]
fn test_predict_json_is_flat_for_steady_glucose() {
    let temp_dir = setup_test_dir();
    let input = write_input(temp_dir.path(), &snapshot(150.0));

    let output = run_json(&["predict"], &input);
    let prediction = output["prediction"].as_array().unwrap();
    assert!(prediction.len() > 2);
    assert!(prediction.iter().all(|p| (p["value"].as_f64().unwrap() - 150.0).abs() < 1e-9));
    assert!(output["recommendation"].is_null());
    assert!(output["effects"]["insulin"].is_array());
}

#[test]
fn test_predict_writes_csv() {
    let temp_dir = setup_test_dir();
    let input = write_input(temp_dir.path(), &snapshot(120.0));
    let csv_path = temp_dir.path().join("export").join("forecast.csv");

    cli()
        .env("XDG_CONFIG_HOME", temp_dir.path())
        .arg("predict")
        .arg("--input")
        .arg(&input)
        .arg("--csv")
        .arg(&csv_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote"));

    let content = fs::read_to_string(&csv_path).expect("Failed to read CSV");
    assert!(content.starts_with("timestamp,unit,forecast,insulin"));
}

#[test]
fn test_recommend_high_glucose_temp_basal() {
    let temp_dir = setup_test_dir();
    let input = write_input(temp_dir.path(), &snapshot(150.0));

    let output = run_json(&["recommend"], &input);
    assert_eq!(output["correction"]["type"], "above_range");
    assert_eq!(output["recommendation"]["kind"], "temp_basal");
    let rate = output["recommendation"]["dose"]["units_per_hour"].as_f64().unwrap();
    assert!((1.0..=4.0).contains(&rate), "rate {}", rate);
}

#[test]
fn test_recommend_low_glucose_suspends() {
    let temp_dir = setup_test_dir();
    let input = write_input(temp_dir.path(), &snapshot(65.0));

    let output = run_json(&["recommend"], &input);
    assert_eq!(output["correction"]["type"], "suspend");
    assert_eq!(output["recommendation"]["dose"]["units_per_hour"], 0.0);
}

#[test]
fn test_recommend_manual_bolus_kind() {
    let temp_dir = setup_test_dir();
    let input = write_input(temp_dir.path(), &snapshot(200.0));

    let output = run_json(&["recommend", "--kind", "manual-bolus"], &input);
    assert_eq!(output["recommendation"]["kind"], "manual_bolus");
    let amount = output["recommendation"]["dose"]["amount"].as_f64().unwrap();
    assert!((amount - 1.8).abs() < 1e-3, "amount {}", amount);
}

#[test]
fn test_recommend_human_output() {
    let temp_dir = setup_test_dir();
    let input = write_input(temp_dir.path(), &snapshot(110.0));

    cli()
        .env("XDG_CONFIG_HOME", temp_dir.path())
        .arg("recommend")
        .arg("--input")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("Correction: in range"))
        .stdout(predicate::str::contains("No basal change"));
}

#[test]
fn test_missing_glucose_fails() {
    let temp_dir = setup_test_dir();
    let mut value = snapshot(120.0);
    value["glucose_history"] = json!([]);
    let input = write_input(temp_dir.path(), &value);

    cli()
        .env("XDG_CONFIG_HOME", temp_dir.path())
        .arg("predict")
        .arg("--input")
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("MissingGlucose"));
}

#[test]
fn test_malformed_input_fails() {
    let temp_dir = setup_test_dir();
    let input = temp_dir.path().join("input.json");
    fs::write(&input, "{ not json").unwrap();

    cli()
        .env("XDG_CONFIG_HOME", temp_dir.path())
        .arg("predict")
        .arg("--input")
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Json"));
}

#[test]
fn test_config_init_and_override() {
    let temp_dir = setup_test_dir();
    let config_path = temp_dir.path().join("loopctl").join("config.toml");

    cli()
        .arg("config")
        .arg("--init")
        .arg("--config")
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote default config"));
    assert!(config_path.exists());

    // Lower the continuation interval and read it back
    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(&config_path, content.replace("continuation_interval = 11.0", "continuation_interval = 20.0")).unwrap();

    cli()
        .arg("config")
        .arg("--config")
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("continuation_interval = 20.0"));
}

#[test]
fn test_invalid_config_rejected() {
    let temp_dir = setup_test_dir();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "[algorithm.dosing]\nautomatic_bolus_application_factor = 2.0\n").unwrap();
    let input = write_input(temp_dir.path(), &snapshot(120.0));

    cli()
        .arg("predict")
        .arg("--input")
        .arg(&input)
        .arg("--config")
        .arg(&config_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("automatic_bolus_application_factor"));
}

#[test]
fn test_missing_explicit_config_fails() {
    let temp_dir = setup_test_dir();
    let input = write_input(temp_dir.path(), &snapshot(120.0));

    cli()
        .arg("predict")
        .arg("--input")
        .arg(&input)
        .arg("--config")
        .arg(no_config(temp_dir.path()))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));
}

#[test]
fn test_config_loaded_from_default_location() {
    let temp_dir = setup_test_dir();
    let config_dir = temp_dir.path().join("loopctl");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(config_dir.join("config.toml"), "[algorithm.dosing]\ncontinuation_interval = 20.0\n").unwrap();

    cli()
        .env("XDG_CONFIG_HOME", temp_dir.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("continuation_interval = 20.0"));
}
