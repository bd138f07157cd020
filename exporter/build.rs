fn main() {
    // Host builds have no ESP-IDF environment to export.
    if std::env::var_os("CARGO_FEATURE_ESP32").is_some() {
        embuild::espidf::sysenv::output();
    }
}
