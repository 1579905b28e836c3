use std::process::Command;

fn git_output(args: &[&str]) -> String {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_default()
}

/// Expose the current git commit (and release tag, when HEAD is tagged
/// directly) to the CLI crates as `GIT_COMMIT` / `RELEASE_VERSION`.
pub fn emit_git_metadata() {
    // Re-run when git state changes so cached CI builds pick up the
    // correct version after tagging.
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../build/shared_git_metadata.rs");
    println!("cargo:rerun-if-changed=../.git/HEAD");
    println!("cargo:rerun-if-changed=../.git/refs");
    println!("cargo:rerun-if-changed=../.git/packed-refs");

    let commit = git_output(&["rev-list", "-1", "HEAD"]);
    println!("cargo:rustc-env=GIT_COMMIT={commit}");

    let release = git_output(&["tag", "--points-at", "HEAD"]);
    println!("cargo:rustc-env=RELEASE_VERSION={release}");
}
