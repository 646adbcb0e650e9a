//! Generates the Kotlin and Swift bindings for `sqlbridge-core`.

fn main() {
    uniffi::uniffi_bindgen_main();
}
