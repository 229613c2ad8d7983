use std::fs;

use seam_cli::{execute, CliCommand};
use seam_core::{SeamConfig, SiteManifest};
use tempfile::TempDir;

const SHOP: &str = r#"
@Instrument
class Shop {
    static int discount = 2;
    private int price(int qty) { return qty * 10; }
    int total(int qty) { return price(qty) - discount; }
    static int fail() { return 1 / 0; }
}
"#;

fn write_shop(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("shop.seam");
    fs::write(&path, SHOP).unwrap();
    path
}

#[test]
fn test_instrument_directory() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_shop(&src);

    let output = execute(
        &CliCommand::Instrument {
            source: src.path().to_path_buf(),
            out: out.path().to_path_buf(),
            parallel: false,
        },
        &SeamConfig::default(),
    )
    .unwrap();

    assert!(output.success);
    assert!(output
        .text
        .contains("Processed 1 file(s): 1 instrumented, 1 class(es), 2 site(s)"));
    assert!(output.text.contains("Agent published to"));
    assert!(out.path().join("shop.seam").exists());
    assert!(out.path().join("seam.agent").exists());
}

#[test]
fn test_instrument_reports_parse_errors() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    fs::write(src.path().join("broken.seam"), "class {").unwrap();

    let output = execute(
        &CliCommand::Instrument {
            source: src.path().to_path_buf(),
            out: out.path().to_path_buf(),
            parallel: true,
        },
        &SeamConfig::default(),
    )
    .unwrap();

    assert!(!output.success);
    assert!(output.text.contains("error["));
}

#[test]
fn test_sites_table_and_json() {
    let dir = TempDir::new().unwrap();
    let file = write_shop(&dir);

    let table = execute(
        &CliCommand::Sites {
            file: file.clone(),
            json: false,
        },
        &SeamConfig::default(),
    )
    .unwrap();
    assert!(table.text.starts_with("Shop (2 site(s))"));
    assert!(table.text.contains("Shop#total(int)/call:Shop.price(int)#0"));
    assert!(table.text.contains("Shop#total(int)/get:Shop.discount#0"));

    let json = execute(&CliCommand::Sites { file, json: true }, &SeamConfig::default()).unwrap();
    let manifests: Vec<SiteManifest> = serde_json::from_str(&json.text).unwrap();
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0].sites.len(), 2);
}

#[test]
fn test_run_instance_and_static_methods() {
    let dir = TempDir::new().unwrap();
    let file = write_shop(&dir);
    let run = |method: &str, args: Vec<String>, agent: bool| {
        execute(
            &CliCommand::Run {
                file: file.clone(),
                class: "Shop".to_string(),
                method: method.to_string(),
                args,
                agent,
            },
            &SeamConfig::default(),
        )
        .unwrap()
    };

    let built = run("total", vec!["3".to_string()], false);
    assert!(built.success);
    assert_eq!(built.text, "28\n");
    assert_eq!(run("total", vec!["3".to_string()], true), built);

    let failed = run("fail", vec![], false);
    assert!(!failed.success);
    assert_eq!(failed.text, "Uncaught ArithmeticException: / by zero\n");
}

#[test]
fn test_run_unknown_class() {
    let dir = TempDir::new().unwrap();
    let file = write_shop(&dir);
    let result = execute(
        &CliCommand::Run {
            file,
            class: "Nope".to_string(),
            method: "m".to_string(),
            args: vec![],
            agent: false,
        },
        &SeamConfig::default(),
    );
    assert!(result.is_err());
}
