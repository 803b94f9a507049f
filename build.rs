fn main() {
    // Compiled-in credentials are read with option_env!, so a changed secret
    // must rebuild the crate.
    for var in ["WIFI_SSID", "WIFI_PASSWORD", "API_BASE_URL", "API_KEY"] {
        println!("cargo:rerun-if-env-changed={}", var);
    }

    // Only run ESP-IDF build system when targeting ESP32 (Xtensa architecture)
    // Build scripts run on the host, so we check the TARGET env var
    if let Ok(target) = std::env::var("TARGET") {
        if target.contains("xtensa") {
            embuild::espidf::sysenv::output();
        }
    }
}
