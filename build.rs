fn main() {
    // The ESP-IDF environment is only needed for the Xtensa firmware images.
    // Host builds (tests, simulated boards) skip it entirely.
    println!("cargo:rerun-if-env-changed=TARGET");
    if let Ok(target) = std::env::var("TARGET") {
        if target.contains("xtensa") {
            embuild::espidf::sysenv::output();
        }
    }
}
