use std::process::Command;

fn main() {
    println!("cargo:rerun-if-env-changed=RESPAWN_GIT_REVISION");
    println!("cargo:rerun-if-env-changed=RESPAWN_VCS_TIME");
    println!("cargo:rerun-if-changed=../../.git/HEAD");

    stamp("RESPAWN_GIT_REVISION", &["rev-parse", "HEAD"]);
    stamp("RESPAWN_VCS_TIME", &["log", "-1", "--format=%cI"]);
}

/// Forward `var` from the build environment, or fill it in from git.
fn stamp(var: &str, git_args: &[&str]) {
    if std::env::var_os(var).is_some() {
        return;
    }
    let Ok(output) = Command::new("git").args(git_args).output() else {
        return;
    };
    if !output.status.success() {
        return;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !value.is_empty() {
        println!("cargo:rustc-env={var}={value}");
    }
}
