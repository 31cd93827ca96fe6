//! Tests for the retry module

use super::*;
use std::time::Duration;

use sqlpool_core::DriverError;

use crate::error::ErrorKind;

mod policy_tests {
    use super::*;

    fn no_jitter(max_retries: u32, base_ms: u64) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(base_ms)).with_jitter_fraction(0.0)
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.base_delay(), Duration::from_secs(1));
        assert_eq!(policy.multiplier(), 2.0);
        assert_eq!(policy.jitter_fraction(), 0.1);
    }

    #[test]
    fn test_exponential_growth() {
        let policy = no_jitter(3, 100);

        // Attempt 0: 100ms
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));

        // Attempt 1: 200ms
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));

        // Attempt 2: 400ms
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));

        // Attempt 3: 800ms
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_custom_multiplier() {
        let policy = no_jitter(3, 100).with_multiplier(3.0);
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(300));
        assert_eq!(policy.delay_for(2), Duration::from_millis(900));
    }

    #[test]
    fn test_multiplier_below_one_is_raised() {
        let policy = no_jitter(3, 100).with_multiplier(0.5);
        assert_eq!(policy.multiplier(), 1.0);
        assert_eq!(policy.delay_for(5), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_fraction_is_clamped() {
        let policy = RetryPolicy::default().with_jitter_fraction(-0.5);
        assert_eq!(policy.jitter_fraction(), 0.0);
        let policy = RetryPolicy::default().with_jitter_fraction(4.0);
        assert_eq!(policy.jitter_fraction(), 1.0);
        let policy = RetryPolicy::default().with_jitter_fraction(f64::NAN);
        assert_eq!(policy.jitter_fraction(), 0.0);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100)).with_jitter_fraction(0.1);

        for attempt in 0..4 {
            let base = policy.base_delay_for(attempt);
            let upper = base.mul_f64(1.1) + Duration::from_nanos(1);
            for _ in 0..200 {
                let delay = policy.delay_for(attempt);
                assert!(delay >= base, "attempt {attempt}: {delay:?} < {base:?}");
                assert!(delay <= upper, "attempt {attempt}: {delay:?} > {upper:?}");
            }
        }
    }

    #[test]
    fn test_huge_attempt_saturates() {
        let policy = no_jitter(3, 1_000);
        assert_eq!(policy.delay_for(10_000), Duration::MAX);
        assert_eq!(
            RetryPolicy::new(3, Duration::from_secs(1)).delay_for(10_000),
            Duration::MAX
        );
    }

    #[test]
    fn test_zero_base_delay() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        assert_eq!(policy.delay_for(2), Duration::ZERO);
    }

    #[test]
    fn test_should_retry_retryable_kinds() {
        let policy = RetryPolicy::default();
        for kind in [ErrorKind::Network, ErrorKind::Timeout, ErrorKind::Unknown] {
            assert!(policy.should_retry(kind, 0), "{kind}");
            assert!(policy.should_retry(kind, 2), "{kind}");
            assert!(!policy.should_retry(kind, 3), "{kind}");
            assert!(!policy.should_retry(kind, 10), "{kind}");
        }
    }

    #[test]
    fn test_should_retry_fatal_kinds() {
        let policy = RetryPolicy::default();
        for kind in [
            ErrorKind::Permission,
            ErrorKind::Syntax,
            ErrorKind::PoolTimeout,
            ErrorKind::ConnectionCreate,
            ErrorKind::PoolClosed,
            ErrorKind::InvalidInput,
        ] {
            assert!(!policy.should_retry(kind, 0), "{kind}");
        }
    }

    #[test]
    fn test_zero_retries_never_retries() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1));
        assert!(!policy.should_retry(ErrorKind::Network, 0));
    }
}

mod classify_tests {
    use super::*;

    #[test]
    fn test_tagged_variants() {
        assert_eq!(
            classify(&DriverError::Timeout("deadline".into())),
            ErrorKind::Timeout
        );
        assert_eq!(
            classify(&DriverError::Authentication("bad token".into())),
            ErrorKind::Permission
        );
        assert_eq!(classify(&DriverError::Closed), ErrorKind::Network);
        assert_eq!(
            classify(&DriverError::Connection("peer went away".into())),
            ErrorKind::Network
        );
        assert_eq!(
            classify(&DriverError::Connection("connect timed out".into())),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn test_io_errors() {
        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(classify(&DriverError::Io(timed_out)), ErrorKind::Timeout);

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(classify(&DriverError::Io(reset)), ErrorKind::Network);

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(classify(&DriverError::Io(denied)), ErrorKind::Permission);
    }

    #[test]
    fn test_http_statuses() {
        let http = |status| DriverError::Http {
            status,
            message: String::new(),
        };
        assert_eq!(classify(&http(401)), ErrorKind::Permission);
        assert_eq!(classify(&http(403)), ErrorKind::Permission);
        assert_eq!(classify(&http(408)), ErrorKind::Timeout);
        assert_eq!(classify(&http(504)), ErrorKind::Timeout);
        assert_eq!(classify(&http(429)), ErrorKind::Network);
        assert_eq!(classify(&http(502)), ErrorKind::Network);
        assert_eq!(classify(&http(404)), ErrorKind::Unknown);
    }

    #[test]
    fn test_query_codes() {
        assert_eq!(
            classify(&DriverError::query_with_code("42601", "unexpected token")),
            ErrorKind::Syntax
        );
        assert_eq!(
            classify(&DriverError::query_with_code("42501", "no grant")),
            ErrorKind::Permission
        );
        assert_eq!(
            classify(&DriverError::query_with_code("28000", "invalid authorization")),
            ErrorKind::Permission
        );
        assert_eq!(
            classify(&DriverError::query_with_code("08006", "link failure")),
            ErrorKind::Network
        );
        assert_eq!(
            classify(&DriverError::query_with_code("000630", "statement canceled")),
            ErrorKind::Timeout
        );
        assert_eq!(
            classify(&DriverError::query_with_code(
                "001003",
                "SQL compilation error: syntax error line 1 at position 7"
            )),
            ErrorKind::Syntax
        );
    }

    #[test]
    fn test_unknown_code_falls_back_to_message() {
        assert_eq!(
            classify(&DriverError::query_with_code("99999", "Connection reset by peer")),
            ErrorKind::Network
        );
        assert_eq!(
            classify(&DriverError::query_with_code("99999", "division by zero")),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn test_message_keywords() {
        let cases = [
            ("Read timeout after 30s", ErrorKind::Timeout),
            ("socket timed out", ErrorKind::Timeout),
            ("Connection refused", ErrorKind::Network),
            ("broken pipe", ErrorKind::Network),
            ("Service Unavailable", ErrorKind::Network),
            ("request throttled, rate limit exceeded", ErrorKind::Network),
            ("backend returned 503", ErrorKind::Network),
            ("permission denied for table orders", ErrorKind::Permission),
            ("Insufficient privileges to operate on schema", ErrorKind::Permission),
            ("syntax error at or near \"SELEC\"", ErrorKind::Syntax),
            ("numeric value 'abc' is not recognized", ErrorKind::Unknown),
        ];
        for (message, expected) in cases {
            assert_eq!(classify(&DriverError::query(message)), expected, "{message}");
        }
    }

    #[test]
    fn test_status_tokens_need_word_boundaries() {
        assert_eq!(
            classify(&DriverError::query("row 15003 has a bad date")),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn test_keyword_precedence() {
        // Timeout wins over network
        assert_eq!(
            classify(&DriverError::Other("network timeout".into())),
            ErrorKind::Timeout
        );
        // Permission wins over syntax
        assert_eq!(
            classify(&DriverError::query(
                "SQL compilation error: Object 'X' does not exist or not authorized."
            )),
            ErrorKind::Permission
        );
    }

    #[test]
    fn test_other_without_keywords_is_unknown() {
        assert_eq!(
            classify(&DriverError::Other("something odd".into())),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn test_custom_classifier_closure() {
        let classifier = |error: &DriverError| match error.code() {
            Some("XX001") => ErrorKind::Network,
            _ => classify(error),
        };
        assert_eq!(
            classifier.classify(&DriverError::query_with_code("XX001", "data corrupted")),
            ErrorKind::Network
        );
        assert_eq!(
            DefaultClassifier.classify(&DriverError::query_with_code("XX001", "data corrupted")),
            ErrorKind::Unknown
        );
    }
}
