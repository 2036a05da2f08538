use std::process::Command;

use insta_cmd::get_cargo_bin;

pub fn run_cli() -> Command {
    let mut cmd = Command::new(get_cargo_bin("mossdb"));
    cmd.env_remove("MOSSDB_LOG");
    cmd
}
