fn main() {
    // libuhd is only needed by the hardware backend
    if std::env::var_os("CARGO_FEATURE_USRP").is_some() {
        println!("cargo:rustc-link-lib=uhd");
    }
}
