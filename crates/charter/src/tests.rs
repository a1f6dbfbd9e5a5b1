#[cfg(test)]
mod charter_tests {
    use crate::limits::{CharterError, PolicyLimits};
    use crate::precheck::CharterPrecheck;
    use approx::assert_relative_eq;
    use trade_core::{Side, TradeCandidate};

    fn limits() -> &'static PolicyLimits {
        PolicyLimits::load().expect("canonical charter passes its self-test")
    }

    #[test]
    fn test_self_test_passes_for_canonical_charter() {
        assert!(PolicyLimits::CHARTER.self_test().is_ok());
        assert_eq!(limits().version, "2.0_IMMUTABLE");
    }

    #[test]
    fn test_self_test_rejects_tampered_constants() {
        let tampered = PolicyLimits {
            min_risk_reward: 2.0,
            ..PolicyLimits::CHARTER
        };
        match tampered.self_test() {
            Err(CharterError::SelfTestFailed(msg)) => {
                assert!(msg.contains("min_risk_reward"));
                assert!(msg.contains("rr 3.1 invalid"));
            }
            Ok(()) => panic!("tampered charter must fail"),
        }

        let loose = PolicyLimits {
            max_hold_hours: 8.0,
            ..PolicyLimits::CHARTER
        };
        assert!(loose.self_test().is_err());
    }

    #[test]
    fn test_notional_boundary_is_exact() {
        let l = limits();
        assert!(!l.validate_notional(14_999.0));
        assert!(!l.validate_notional(14_999.99));
        assert!(l.validate_notional(15_000.0));
        assert!(l.validate_notional(250_000.0));
    }

    #[test]
    fn test_risk_reward_boundary() {
        let l = limits();
        assert!(l.validate_risk_reward(3.2));
        assert!(!l.validate_risk_reward(3.19));
        assert!(l.validate_risk_reward(4.0));
    }

    #[test]
    fn test_hold_duration_and_daily_pnl() {
        let l = limits();
        assert!(l.validate_hold_duration(0.5));
        assert!(l.validate_hold_duration(6.0));
        assert!(!l.validate_hold_duration(6.01));
        assert!(!l.validate_hold_duration(-1.0));

        assert!(l.validate_daily_pnl(0.0));
        assert!(l.validate_daily_pnl(-4.99));
        assert!(!l.validate_daily_pnl(-5.0));
    }

    #[test]
    fn test_timeframes_fail_closed() {
        let l = limits();
        for tf in ["M15", "M30", "H1"] {
            assert!(l.validate_timeframe(tf), "{tf} should be allowed");
        }
        for tf in ["M1", "M5", "H4", "m15", ""] {
            assert!(!l.validate_timeframe(tf), "{tf} should be rejected");
        }
    }

    #[test]
    fn test_pin_and_asset_class_multipliers() {
        let l = limits();
        assert!(l.validate_pin(841_921));
        assert!(!l.validate_pin(0));
        assert_relative_eq!(l.stop_atr_multiplier("EUR_USD"), 1.2);
        assert_relative_eq!(l.stop_atr_multiplier("BTC-USD"), 1.5);
        assert_relative_eq!(l.spread_atr_multiplier("BTC-USD"), 0.10);
    }

    #[test]
    fn test_summary_omits_pin() {
        let json = serde_json::to_value(limits().summary()).unwrap();
        assert!(json.get("pin").is_none());
        assert_eq!(json["max_concurrent_positions"], 3);
        assert_eq!(json["allowed_timeframes"][0], "M15");
    }

    // -----------------------------------------------------------------------
    // Pre-check
    // -----------------------------------------------------------------------

    fn candidate(units: f64, stop: f64, target: f64) -> TradeCandidate {
        TradeCandidate::new("EUR_USD", Side::Buy, units).with_brackets(stop, target)
    }

    #[test]
    fn test_precheck_notional_boundary() {
        let precheck = CharterPrecheck::new(limits());

        let below = precheck.evaluate(&candidate(14_999.0, 0.99, 1.04), Some(1.0));
        assert!(!below.passed);
        assert!(below.reason().contains("Notional"));

        let at = precheck.evaluate(&candidate(15_000.0, 0.99, 1.04), Some(1.0));
        assert!(at.passed, "unexpected rejection: {}", at.reason());
        assert_relative_eq!(at.notional, 15_000.0);
    }

    #[test]
    fn test_precheck_risk_reward_scenarios() {
        let precheck = CharterPrecheck::new(limits());

        let good = precheck.evaluate(&candidate(20_000.0, 1.0900, 1.1400), Some(1.1000));
        assert!(good.passed, "unexpected rejection: {}", good.reason());
        assert_relative_eq!(good.risk_reward.unwrap(), 4.0, epsilon = 1e-9);

        let poor = precheck.evaluate(&candidate(20_000.0, 1.0900, 1.1250), Some(1.1000));
        assert!(!poor.passed);
        assert_relative_eq!(poor.risk_reward.unwrap(), 2.5, epsilon = 1e-9);
        assert!(poor.reason().contains("Risk/reward 2.50"));
    }

    #[test]
    fn test_precheck_missing_and_inverted_brackets() {
        let precheck = CharterPrecheck::new(limits());

        let naked = TradeCandidate::new("EUR_USD", Side::Buy, 20_000.0);
        let outcome = precheck.evaluate(&naked, Some(1.1));
        assert!(!outcome.passed);
        assert!(outcome.reasons.iter().any(|r| r == "Missing stop-loss"));
        assert!(outcome.reasons.iter().any(|r| r == "Missing take-profit"));

        let inverted = precheck.evaluate(&candidate(20_000.0, 1.12, 1.20), Some(1.10));
        assert!(!inverted.passed);
        assert!(inverted.risk_reward.is_none());

        let no_entry = precheck.evaluate(&candidate(20_000.0, 1.09, 1.14), None);
        assert!(!no_entry.passed);
    }

    #[test]
    fn test_precheck_expected_pnl_and_timeframe() {
        let precheck = CharterPrecheck::new(limits());

        // RR is fine but the target is only worth $40
        let tiny = precheck.evaluate(&candidate(20_000.0, 0.9995, 1.002), Some(1.0));
        assert!(!tiny.passed);
        assert!(tiny.reason().contains("Expected profit"));

        let mut scalper = candidate(20_000.0, 0.99, 1.04);
        scalper.timeframe = "M1".to_string();
        let outcome = precheck.evaluate(&scalper, Some(1.0));
        assert!(!outcome.passed);
        assert!(outcome.reason().contains("Timeframe M1"));
    }
}
