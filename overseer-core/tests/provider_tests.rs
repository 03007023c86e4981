use overseer_core::config::{ProcessConfig, SupervisorConfig};
use overseer_core::provider::ConfigProvider;
use tempfile::TempDir;

fn sample_config() -> SupervisorConfig {
    let mut cnf = SupervisorConfig {
        admin_listen: 8899,
        ..Default::default()
    };
    let mut p = ProcessConfig {
        name: "svc".into(),
        command: "/bin/sleep".into(),
        args: vec!["5".into()],
        ..Default::default()
    };
    p.fill_defaults();
    cnf.process.push(p);
    cnf
}

fn write_config(dir: &TempDir, cnf: &SupervisorConfig) -> std::path::PathBuf {
    let file = dir.path().join("supervisord.conf");
    std::fs::write(&file, cnf.to_toml().unwrap()).unwrap();
    file
}

#[test]
fn test_master_writes_and_removes_lock() {
    let dir = TempDir::new().unwrap();
    let file = write_config(&dir, &sample_config());
    let lock = dir.path().join(".supervisord.conf.lock");

    let prov = ConfigProvider::from_file(&file, true).unwrap();
    assert!(lock.exists(), "master load must create the lock copy");
    assert_eq!(prov.get_config().admin_listen, 8899);

    prov.close();
    assert!(!lock.exists(), "close must remove the lock copy");
}

#[test]
fn test_client_prefers_lock_copy() {
    let dir = TempDir::new().unwrap();
    let file = write_config(&dir, &sample_config());

    // The running master's effective config differs from the file on disk.
    let mut live = sample_config();
    live.admin_listen = 9911;
    std::fs::write(
        dir.path().join(".supervisord.conf.lock"),
        live.to_toml().unwrap(),
    )
    .unwrap();

    let prov = ConfigProvider::from_file(&file, false).unwrap();
    assert_eq!(prov.get_config().admin_listen, 9911);
}

#[test]
fn test_client_falls_back_to_canonical_file() {
    let dir = TempDir::new().unwrap();
    let file = write_config(&dir, &sample_config());

    let prov = ConfigProvider::from_file(&file, false).unwrap();
    assert_eq!(prov.get_config().admin_listen, 8899);
}

#[test]
fn test_reload_reads_canonical_not_lock() {
    let dir = TempDir::new().unwrap();
    let file = write_config(&dir, &sample_config());
    let prov = ConfigProvider::from_file(&file, true).unwrap();

    let mut updated = sample_config();
    updated.admin_listen = 9100;
    std::fs::write(&file, updated.to_toml().unwrap()).unwrap();

    let cnf = prov.reload().unwrap();
    assert_eq!(cnf.admin_listen, 9100);

    // The lock copy must now carry the reloaded config too.
    let lock_text =
        std::fs::read_to_string(dir.path().join(".supervisord.conf.lock")).unwrap();
    let lock_cnf = SupervisorConfig::from_toml(&lock_text).unwrap();
    assert_eq!(lock_cnf.admin_listen, 9100);
}

#[test]
fn test_update_persists_and_syncs_lock() {
    let dir = TempDir::new().unwrap();
    let file = write_config(&dir, &sample_config());
    let prov = ConfigProvider::from_file(&file, true).unwrap();

    let mut cnf = (*prov.get_config()).clone();
    cnf.add_process_config(ProcessConfig {
        name: "extra".into(),
        command: "/bin/true".into(),
        ..Default::default()
    });
    prov.update(cnf).unwrap();

    let on_disk =
        SupervisorConfig::from_toml(&std::fs::read_to_string(&file).unwrap()).unwrap();
    assert!(on_disk.exist_process("extra"));

    let in_lock = SupervisorConfig::from_toml(
        &std::fs::read_to_string(dir.path().join(".supervisord.conf.lock")).unwrap(),
    )
    .unwrap();
    assert!(in_lock.exist_process("extra"));
}

#[test]
fn test_check_config_file_rejects_bad_toml() {
    let dir = TempDir::new().unwrap();
    let file = write_config(&dir, &sample_config());
    let prov = ConfigProvider::from_file(&file, true).unwrap();
    assert!(prov.check_config_file().is_ok());

    std::fs::write(&file, "process = not-toml [").unwrap();
    assert!(prov.check_config_file().is_err());
}
