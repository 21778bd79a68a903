#![no_main]
//! Fuzz target for config TOML parsing
//!
//! Feeds random bytes as TOML to the session config parser. Parsing and
//! validation must never panic, and an accepted config must survive a
//! serialize and reparse.

use libfuzzer_sys::fuzz_target;

use wm::Config;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = toml::from_str::<Config>(s) {
            if config.validate().is_ok() {
                let _ = config.world_config(0);
                if let Ok(text) = toml::to_string(&config) {
                    let reparsed: Config = toml::from_str(&text).expect("serialized config must parse");
                    assert_eq!(reparsed, config);
                }
            }
        }
    }
});
