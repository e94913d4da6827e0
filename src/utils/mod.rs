use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Returns the current unix timestamp in milliseconds.
pub fn curr_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

pub fn sleep_for_ms(ms: u64) {
    thread::sleep(Duration::from_millis(ms));
}

pub fn is_blank(path: &str) -> bool {
    path.trim().is_empty()
}
