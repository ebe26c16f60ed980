use std::env;

fn main() {
    // Release builds pass the version in from CI; local builds use Cargo.toml's.
    let version = env::var("CARGO_PACKAGE_VERSION")
        .or_else(|_| env::var("CARGO_PKG_VERSION"))
        .unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rerun-if-env-changed=CARGO_PACKAGE_VERSION");
    println!("cargo:rustc-env=CARGO_PACKAGE_VERSION={}", version);
}
