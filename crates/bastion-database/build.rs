// Re-embed migrations when the directory changes.
fn main() {
    println!("cargo:rerun-if-changed=migrations");
}
