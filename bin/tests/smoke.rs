use std::{
    env, fs,
    path::PathBuf,
    process::{Command, Output},
};

static SIM_CONFIG: &str = r#"
token: smoke-token
renewal_interval: 1s
select:
  make: X
simulation:
  org: acme
  devices:
    - id: stb-1
      make: X
    - id: stb-2
      make: X
    - id: stb-3
      make: Y
"#;

fn write_config(name: &str, contents: &str) -> PathBuf {
    let path = env::temp_dir().join(format!("devpool-smoke-{}-{name}.yaml", std::process::id()));
    fs::write(&path, contents).expect("write config");
    path
}

fn devpool(config: &PathBuf, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_devpool"))
        .env_remove("DEVPOOL_TOKEN")
        .env_remove("DEVPOOL_DEVICES")
        .env("DEVPOOL_LOG", "debug")
        .arg("--config-path")
        .arg(config)
        .args(args)
        .output()
        .expect("failed to run devpool")
}

#[test]
fn reserves_selected_devices_and_exits() {
    let config = write_config("select", SIM_CONFIG);
    let out = devpool(&config, &["--deeplink", "app://home", "--workers", "2"]);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(out.status.success(), "devpool failed: {stdout}");
    assert!(stdout.contains("deeplink sent"));
    assert!(stdout.contains("device released"));
    fs::remove_file(config).ok();
}

#[test]
fn named_devices_override_select() {
    let config = write_config("named", SIM_CONFIG);
    let out = devpool(&config, &["--device", "stb-3"]);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(out.status.success(), "devpool failed: {stdout}");
    assert!(stdout.contains("acme/stb-3"));
    fs::remove_file(config).ok();
}

#[test]
fn missing_simulation_fails() {
    let config = write_config("no-sim", "token: t\n");
    let out = devpool(&config, &[]);
    assert!(!out.status.success());
    fs::remove_file(config).ok();
}
