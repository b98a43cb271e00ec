use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

use serde_json::Value;

struct Workdir {
    root: PathBuf,
}

impl Workdir {
    fn new() -> Self {
        let root =
            std::env::temp_dir().join(format!("mexc-ledger-cli-{:016x}", rand::random::<u64>()));
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("config.toml"), "").unwrap();
        Self { root }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_mexc-ledger"))
            .arg("--config")
            .arg(self.path("config.toml"))
            .arg("--state")
            .arg(self.path("ledger.json"))
            .arg("--output")
            .arg("json")
            .args(args)
            .output()
            .unwrap()
    }

    fn run_ok(&self, args: &[&str]) -> Value {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "{args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).unwrap()
    }

    fn keygen(&self, name: &str) -> (String, PathBuf) {
        let dir = self.path(name);
        let out = self.run_ok(&["keygen", "--out-dir", path_str(&dir)]);
        let address = out["address"].as_str().unwrap().to_string();
        (address, dir.join("sk.hex"))
    }
}

impl Drop for Workdir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn state_file_survives_mint_and_reload() {
    let dir = Workdir::new();
    let (admin, admin_key) = dir.keygen("admin");
    assert!(admin_key.exists());
    assert!(dir.path("admin").join("pk.hex").exists());

    let status = dir.run_ok(&["init", "--admin", &admin]);
    assert_eq!(status["symbol"], "MEXC");
    assert_eq!(status["transfer_disabled"], true);

    let receipt = dir.run_ok(&["mint", "--key", path_str(&admin_key), &admin, "4000"]);
    assert_eq!(receipt["operation"], "mint");
    assert_eq!(receipt["total_supply"], "4000000000000000000000");

    let supply = dir.run_ok(&["supply"]);
    assert_eq!(supply["total_supply"], "4000");
    assert_eq!(supply["raw"], "4000000000000000000000");

    let balance = dir.run_ok(&["balance", &admin]);
    assert_eq!(balance["raw"], "4000000000000000000000");
    assert_eq!(balance["blacklisted"], false);

    let verify = dir.run_ok(&["verify"]);
    assert_eq!(verify["ok"], true);
}

#[test]
fn sanctions_persist_across_invocations() {
    let dir = Workdir::new();
    let (admin, admin_key) = dir.keygen("admin");
    let (holder, holder_key) = dir.keygen("holder");
    let (peer, _) = dir.keygen("peer");
    let admin_key = path_str(&admin_key);
    let holder_key = path_str(&holder_key);

    dir.run_ok(&["init", "--admin", &admin]);
    dir.run_ok(&["allow-transfers", "--key", admin_key]);
    dir.run_ok(&["mint", "--key", admin_key, &holder, "12.5"]);
    dir.run_ok(&["transfer", "--key", holder_key, &peer, "2.5"]);
    dir.run_ok(&["blacklist", "--key", admin_key, &holder]);

    let rejected = dir.run(&["transfer", "--key", holder_key, &peer, "1"]);
    assert!(!rejected.status.success());

    dir.run_ok(&["confiscate", "--key", admin_key, &holder]);
    assert_eq!(dir.run_ok(&["balance", &holder])["raw"], "0");
    assert_eq!(dir.run_ok(&["balance", &admin])["balance"], "10");
    assert_eq!(dir.run_ok(&["balance", &peer])["balance"], "2.5");
    assert_eq!(dir.run_ok(&["supply"])["total_supply"], "12.5");

    let events = dir.run_ok(&["events"]);
    let events = events.as_array().unwrap();
    assert_eq!(events.last().unwrap()["type"], "confiscate");
    assert_eq!(events.last().unwrap()["seized"], "10000000000000000000");
    assert_eq!(dir.run_ok(&["verify"])["ok"], true);
}
