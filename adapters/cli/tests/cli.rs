use std::process::{Command, Output};

fn pathway(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pathway"))
        .args(args)
        .output()
        .expect("failed to invoke the pathway binary")
}

#[test]
fn static_generation_prints_the_level_anchors() {
    let output = pathway(&["generate", "--level", "1", "--mode", "static", "--seed", "1"]);
    assert!(output.status.success(), "{output:?}");

    let path: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json path");
    let points = path["points"].as_array().expect("points");
    assert_eq!(points.len(), 10);
    assert_eq!(points[0]["x"], 20.0);
    assert_eq!(path["mode"], "static");
}

#[test]
fn validation_flags_out_of_bounds_points() {
    let output = pathway(&["validate", "--profile", "lenient", "20,300", "100,300", "180,-50"]);
    assert!(output.status.success(), "{output:?}");

    let stdout = String::from_utf8(output.stdout).expect("utf8");
    assert!(stdout.contains("bounds"), "{stdout}");
}

#[test]
fn unknown_profile_fails_in_development() {
    let output = pathway(&["validate", "--profile", "brutal", "20,300", "100,300"]);
    assert!(!output.status.success());
}

#[test]
fn exported_snapshot_imports_cleanly() {
    let export = pathway(&["export"]);
    assert!(export.status.success(), "{export:?}");
    let snapshot = String::from_utf8(export.stdout).expect("utf8");
    assert!(snapshot.starts_with("pathway:v1:"));

    let import = pathway(&["import", snapshot.trim()]);
    assert!(import.status.success(), "{import:?}");
    let stdout = String::from_utf8(import.stdout).expect("utf8");
    assert!(stdout.contains("imported 3 level(s)"), "{stdout}");
}

#[test]
fn profiles_lists_the_builtin_profiles() {
    let output = pathway(&["profiles"]);
    assert!(output.status.success(), "{output:?}");

    let stdout = String::from_utf8(output.stdout).expect("utf8");
    for name in ["strict", "balanced", "lenient"] {
        assert!(stdout.contains(name), "{stdout}");
    }
    assert!(stdout.contains("* balanced"));
}
