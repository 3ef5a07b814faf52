// build.rs - Build metadata for towerwatch

use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    println!(
        "cargo:rustc-env=TOWERWATCH_BUILD_TIMESTAMP={}",
        chrono::Utc::now().to_rfc3339()
    );

    let target = env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=TOWERWATCH_TARGET={}", target);

    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=TOWERWATCH_PROFILE={}", profile);
}
