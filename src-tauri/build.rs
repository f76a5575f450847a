use std::process::Command;

fn main() {
    tauri_build::build();

    // Short git SHA for the about screen; "unknown" outside a checkout.
    let git_sha = git_output(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=BUILD_GIT_SHA={git_sha}");

    // Reproducible builds pin the timestamp through SOURCE_DATE_EPOCH.
    let built_at = std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .or_else(|| git_output(&["log", "-1", "--format=%ct"]))
        .unwrap_or_else(|| "0".into());
    println!("cargo:rustc-env=BUILD_EPOCH={built_at}");

    println!("cargo:rerun-if-changed=../.git/HEAD");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
}

fn git_output(args: &[&str]) -> Option<String> {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
