use ledgerlimit::config::LimiterSettings;
use ledgerlimit::error::LimiterError;
use ledgerlimit::ratelimit::RateLimiter;

fn limiters(max_requests: i64, window_seconds: i64) -> Vec<(String, RateLimiter)> {
    let mut limiters = Vec::new();
    for concurrency in ["global", "per_key", "sharded"] {
        for insert_mode in ["monotonic", "ordered"] {
            let yaml = format!(
                "max_requests: {}\nwindow_seconds: {}\nconcurrency: {}\ninsert_mode: {}\n",
                max_requests, window_seconds, concurrency, insert_mode
            );
            let limiter = LimiterSettings::from_yaml(&yaml).unwrap().build().unwrap();
            limiters.push((format!("{}/{}", concurrency, insert_mode), limiter));
        }
    }
    limiters
}

#[test]
fn boundary_exactness() {
    for (name, limiter) in limiters(3, 10) {
        limiter.hit("user_1", 1);
        limiter.hit("user_1", 2);
        assert!(limiter.allowed("user_1", 3), "{}", name);

        limiter.hit("user_1", 3);
        assert!(!limiter.allowed("user_1", 4), "{}", name);
        assert!(limiter.allowed("user_1", 12), "{}", name);
        assert_eq!(limiter.count("user_1"), 2, "{}", name);
    }
}

#[test]
fn out_of_order_insertion() {
    for (name, limiter) in limiters(2, 10) {
        assert!(limiter.check_and_hit("user_2", 10), "{}", name);
        assert!(limiter.check_and_hit("user_2", 5), "{}", name);
        assert_eq!(limiter.hits("user_2"), vec![5, 10], "{}", name);
        assert!(!limiter.check_and_hit("user_2", 11), "{}", name);
    }
}

#[test]
fn window_slides_forward() {
    for (name, limiter) in limiters(2, 5) {
        assert!(limiter.check_and_hit("k", 0), "{}", name);
        assert!(limiter.check_and_hit("k", 1), "{}", name);
        assert!(!limiter.check_and_hit("k", 4), "{}", name);
        // t=0 expires exactly at 5
        assert!(limiter.check_and_hit("k", 5), "{}", name);
        assert!(!limiter.check_and_hit("k", 5), "{}", name);
        assert!(limiter.check_and_hit("k", 6), "{}", name);
        assert_eq!(limiter.hits("k"), vec![5, 6], "{}", name);
    }
}

#[test]
fn eviction_is_idempotent() {
    for (name, limiter) in limiters(10, 10) {
        for t in [1, 2, 8, 9, 15] {
            limiter.hit("k", t);
        }
        let first = limiter.evict("k", 18);
        assert_eq!(limiter.evict("k", 18), first, "{}", name);
        assert_eq!(limiter.count("k"), 2, "{}", name);
    }
}

#[test]
fn invalid_limits_fail_construction() {
    assert!(matches!(
        RateLimiter::with_limits(0, 10),
        Err(LimiterError::Config(_))
    ));
    assert!(matches!(
        RateLimiter::with_limits(3, -1),
        Err(LimiterError::Config(_))
    ));

    let settings = LimiterSettings::from_yaml("max_requests: 0\nwindow_seconds: 10\n").unwrap();
    assert!(settings.build().is_err());
}
