fn main() {
    // Only binaries built with the TFLite backend need the C API at link time.
    if std::env::var_os("CARGO_FEATURE_VISION_TFLITE").is_none() {
        return;
    }
    println!("cargo:rerun-if-env-changed=TFLITE_LIB_DIR");
    if let Ok(dir) = std::env::var("TFLITE_LIB_DIR") {
        println!("cargo:rustc-link-search=native={}", dir);
    }
    println!("cargo:rustc-link-lib=tensorflowlite_c");

    // EdgeTPU delegate comes from libedgetpu, linked by the extern block in tflite.rs.
}
