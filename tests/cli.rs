use std::fs;
use std::path::Path;
use std::process::Command;

use mortality::config::{AnalysisConfig, RunFit};
use mortality::models::{ModelKind, weibull};
use mortality::report::load_reports;
use tempfile::tempdir;

fn write_weibull_film(path: &Path) {
    let mut text = String::new();
    for i in 0..1000 {
        let t = i as f64 * 0.1;
        text.push_str(&format!("{t}\t{}\n", 200.0 * weibull(t, 1.5, 50.0)));
    }
    fs::write(path, text).expect("write survival data");
}

fn mortality_cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_mortality"))
}

#[test]
fn template_writes_a_loadable_default_config() {
    let tmp = tempdir().expect("temporary directory");
    let config_path = tmp.path().join("config.toml");

    let status = mortality_cli()
        .args(["template", config_path.to_str().expect("path str")])
        .status()
        .expect("run mortality cli");
    assert!(status.success(), "CLI exited with status {status:?}");

    let loaded = AnalysisConfig::load(&config_path).expect("load template");
    assert_eq!(loaded, AnalysisConfig::default());
}

#[test]
fn run_writes_series_curves_and_fit_summary() {
    let tmp = tempdir().expect("temporary directory");
    write_weibull_film(&tmp.path().join("survival.tsv"));

    let mut config = AnalysisConfig::default();
    config.fit.run = RunFit::Weibull;
    config.fit.start_time = 5.0;
    config.fit.end_time = 80.0;
    let config_path = tmp.path().join("config.toml");
    config.save(&config_path).expect("save config");

    let output_dir = tmp.path().join("out");
    let status = mortality_cli()
        .args([
            "run",
            "--config",
            config_path.to_str().expect("path str"),
            "--output-dir",
            output_dir.to_str().expect("path str"),
        ])
        .status()
        .expect("run mortality cli");
    assert!(status.success(), "CLI exited with status {status:?}");

    for name in [
        "scaled.tsv",
        "clean.tsv",
        "mortality.tsv",
        "weibull_survival.tsv",
        "fits.toml",
    ] {
        assert!(output_dir.join(name).exists(), "{name} missing");
    }

    let clean = fs::read_to_string(output_dir.join("clean.tsv")).expect("read clean.tsv");
    let mut lines = clean.lines();
    assert_eq!(lines.next(), Some("time\tsurvival"));
    assert_eq!(lines.count(), 1000 / 10 - 5 + 1);

    let reports = load_reports(&output_dir.join("fits.toml")).expect("load fits");
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].model.kind(), ModelKind::Weibull);
    let [k, lambda] = reports[0].model.parameters();
    assert!((k - 1.5).abs() < 0.075, "k = {k}");
    assert!((lambda - 50.0).abs() < 2.5, "lambda = {lambda}");
}

#[test]
fn run_fails_cleanly_on_missing_data() {
    let tmp = tempdir().expect("temporary directory");
    let config_path = tmp.path().join("config.toml");
    AnalysisConfig::default()
        .save(&config_path)
        .expect("save config");

    let output = mortality_cli()
        .args(["run", "--config", config_path.to_str().expect("path str")])
        .current_dir(tmp.path())
        .output()
        .expect("run mortality cli");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error:"));
}
