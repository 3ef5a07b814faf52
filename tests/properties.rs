use proptest::prelude::*;
use towerwatch::{
    classify, AlarmClass, AlarmTimes, Channel, DeviceAlarmConfig, Evaluator, SampleBuffer, ThresholdSet,
};

fn thresholds() -> impl Strategy<Value = ThresholdSet> {
    prop::collection::vec(0u32..=10_000, 4)
        .prop_filter("distinct bands", |v| {
            let mut sorted = v.clone();
            sorted.sort_unstable();
            sorted.dedup();
            sorted.len() == 4
        })
        .prop_map(|mut v| {
            v.sort_unstable();
            ThresholdSet {
                low_low: v[0] as f64,
                low: v[1] as f64,
                high: v[2] as f64,
                high_high: v[3] as f64,
            }
        })
}

proptest! {
    #[test]
    fn test_buffer_keeps_last_n_in_order(
        capacity in 1usize..20,
        values in prop::collection::vec(-1000.0f64..5000.0, 0..60)
    ) {
        let mut buffer = SampleBuffer::new(capacity);
        for v in &values {
            buffer.push(*v);
        }

        let snapshot = buffer.snapshot();
        prop_assert_eq!(snapshot.len(), capacity);

        let tail: Vec<f64> = values.iter().rev().take(capacity).rev().copied().collect();
        let padding = capacity - tail.len();
        prop_assert!(snapshot[..padding].iter().all(|v| *v == 0.0));
        prop_assert_eq!(&snapshot[padding..], &tail[..]);
    }

    #[test]
    fn test_classification_follows_priority(
        set in thresholds(),
        value in -100.0f64..11_000.0
    ) {
        let expected = if value <= set.low_low {
            Some(AlarmClass::LowLow)
        } else if value >= set.high_high {
            Some(AlarmClass::HighHigh)
        } else if value <= set.low {
            Some(AlarmClass::Low)
        } else if value >= set.high {
            Some(AlarmClass::High)
        } else {
            None
        };
        prop_assert_eq!(classify(value, &set), expected);
    }

    #[test]
    fn test_boundaries_are_inclusive(set in thresholds()) {
        prop_assert_eq!(classify(set.low_low, &set), Some(AlarmClass::LowLow));
        prop_assert_eq!(classify(set.low, &set), Some(AlarmClass::Low));
        prop_assert_eq!(classify(set.high, &set), Some(AlarmClass::High));
        prop_assert_eq!(classify(set.high_high, &set), Some(AlarmClass::HighHigh));
    }

    #[test]
    fn test_short_window_never_confirms(
        need in 2u32..8,
        value in 0.5f64..150.0
    ) {
        let set = ThresholdSet::new(200.0, 400.0, 1600.0, 2000.0).unwrap();
        let device = DeviceAlarmConfig::new("t1", set, AlarmTimes::uniform(need));
        let mut ev = Evaluator::new(vec![device]);

        for _ in 1..need {
            ev.set_reading("t1", Channel::North, value);
            let report = ev.tick(chrono::Utc::now());
            prop_assert!(report.events.is_empty());
        }
        prop_assert_eq!(ev.active_alarms().count(), 0);

        ev.set_reading("t1", Channel::North, value);
        ev.tick(chrono::Utc::now());
        prop_assert_eq!(ev.active_alarms().count(), 1);
    }
}
