/// Build script for eBPF programs
///
/// The stage handlers and record layout live in the shared crate, so the
/// object must be rebuilt whenever they change.

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../shared/src");
}
