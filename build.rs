use std::{
    process::Command,
    time::{SystemTime, UNIX_EPOCH},
};

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    // Self-update picks the release asset built for the same target triple.
    let target = std::env::var("TARGET").unwrap_or_default();
    println!("cargo:rustc-env=MODMAN_TARGET={}", target);

    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output();

    let pkg_version = std::env::var("CARGO_PKG_VERSION").unwrap_or_default();

    let version = match output {
        Ok(o) if o.status.success() => {
            let git_output = String::from_utf8(o.stdout)
                .unwrap_or_default()
                .trim()
                .to_string();

            // Strip 'v' prefix if present (e.g., "v1.0.0" -> "1.0.0")
            let described = git_output.strip_prefix('v').unwrap_or(&git_output);

            if described.is_empty() {
                pkg_version.clone()
            } else if described.ends_with("-dirty") {
                format!("{} ({}-{})", pkg_version, described, timestamp())
            } else {
                format!("{} ({})", pkg_version, described)
            }
        }
        // Not a git checkout: the package version is all we know
        _ => pkg_version.clone(),
    };

    println!("cargo:rustc-env=MODMAN_VERSION={}", version);
}

fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs()
}
