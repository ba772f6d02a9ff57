use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn now_sec() -> u64 {
    now_millis() / 1000
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_follow_millis() {
        let sec = now_sec();
        let millis = now_millis();
        assert!(millis / 1000 >= sec);
        assert!(millis / 1000 - sec <= 1);
    }
}
