use std::process::Command;

fn main() {
    // Short commit hash of the tree being built, "unknown" outside a checkout
    let git_hash = run("git", &["rev-parse", "--short", "HEAD"]);
    println!("cargo:rustc-env=DIALPILOT_GIT_HASH={}", git_hash);

    let build_date = run("date", &["+%Y-%m-%d"]);
    println!("cargo:rustc-env=DIALPILOT_BUILD_DATE={}", build_date);

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");
}

/// Run a command and return its trimmed stdout, or "unknown" on any failure.
fn run(program: &str, args: &[&str]) -> String {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
