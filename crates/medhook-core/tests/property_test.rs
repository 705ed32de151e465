//! Property-based tests for endpoint and delivery invariants.
//!
//! Exercises the model-level transition logic that both stores reuse, so the
//! rules hold regardless of which backend persists them.

#![allow(clippy::unwrap_used)]

use chrono::{TimeDelta, Utc};
use medhook_core::{
    AttemptCapture, AttemptRecord, AttemptTransition, DeliveryStatus, EndpointStatus,
    EventEnvelope, EventId, EventType, NewEndpoint, TenantId, WebhookDelivery, WebhookEndpoint,
};
use proptest::{prelude::*, test_runner::Config as ProptestConfig};

fn proptest_config() -> ProptestConfig {
    ProptestConfig { cases: 128, failure_persistence: None, ..ProptestConfig::default() }
}

fn endpoint(retry_count: u32) -> WebhookEndpoint {
    let input = NewEndpoint {
        name: "ward feed".into(),
        description: None,
        url: "https://ward.example.com/hooks".into(),
        event_types: vec![EventType::parse("patient.admitted").unwrap()],
        timeout_seconds: 30,
        retry_count,
    };
    WebhookEndpoint::new(TenantId::new(), input, "whsec_prop".into(), Utc::now())
}

fn status_strategy() -> impl Strategy<Value = EndpointStatus> {
    prop::sample::select(vec![
        EndpointStatus::Active,
        EndpointStatus::Inactive,
        EndpointStatus::Paused,
        EndpointStatus::Failed,
    ])
}

proptest! {
    #![proptest_config(proptest_config())]

    /// Operators can never move an endpoint into `failed`, and only leaving
    /// `failed` clears the failure count.
    #[test]
    fn manual_transitions_never_reach_failed(
        requests in prop::collection::vec(status_strategy(), 1..30),
        initial_failures in 0u32..20,
    ) {
        let mut ep = endpoint(3);
        ep.failure_count = initial_failures;
        let now = Utc::now();

        for to in requests {
            let before = ep.clone();
            match ep.apply_manual_status(to, now) {
                Ok(()) => {
                    if before.status != to {
                        prop_assert_ne!(to, EndpointStatus::Failed);
                    }
                    if before.status == EndpointStatus::Failed && to == EndpointStatus::Active {
                        prop_assert_eq!(ep.failure_count, 0);
                    } else {
                        prop_assert_eq!(ep.failure_count, before.failure_count);
                    }
                },
                Err(_) => prop_assert_eq!(&ep, &before),
            }
        }
    }

    /// The failure count is exactly the number of terminal failures since the
    /// last success, and the endpoint trips once a run reaches the threshold.
    #[test]
    fn failure_count_tracks_consecutive_terminal_failures(
        outcomes in prop::collection::vec(any::<bool>(), 1..60),
        threshold in 1u32..12,
    ) {
        let mut ep = endpoint(0);
        let now = Utc::now();
        let mut run = 0u32;
        let mut longest_run = 0u32;
        let mut trips = 0;

        for succeeded in outcomes {
            if succeeded {
                ep.record_success(now);
                run = 0;
            } else {
                if ep.record_terminal_failure(threshold, now) {
                    trips += 1;
                }
                run += 1;
                longest_run = longest_run.max(run);
            }
            prop_assert_eq!(ep.failure_count, run);
        }

        prop_assert_eq!(ep.status == EndpointStatus::Failed, longest_run >= threshold);
        prop_assert!(trips <= 1);
    }

    /// However many failures a receiver produces, a delivery driven by the
    /// retry rule never makes more than `retry_count + 1` calls.
    #[test]
    fn attempt_stays_within_bounds(retry_count in 0u32..=5, failures in 0usize..10) {
        let ep = endpoint(retry_count);
        let now = Utc::now();
        let envelope = EventEnvelope {
            event_id: EventId::new(),
            event_type: EventType::parse("patient.admitted").unwrap(),
            created_at: now,
            tenant_id: ep.tenant_id,
            data: serde_json::Value::Null,
        };
        let mut delivery = WebhookDelivery::pending(&envelope, &ep, "{}".into(), now);
        let mut calls = 0u32;

        while !delivery.status.is_terminal() {
            calls += 1;
            let transition = if (calls as usize) > failures {
                AttemptTransition::Succeeded
            } else if delivery.attempt < ep.max_attempts() {
                AttemptTransition::Retrying { next_retry_at: now + TimeDelta::seconds(5) }
            } else {
                AttemptTransition::Failed
            };
            delivery.apply_attempt(&AttemptRecord {
                capture: AttemptCapture { attempted_at: now, ..Default::default() },
                transition,
            });

            prop_assert!(delivery.attempt >= 1);
            prop_assert!(delivery.attempt <= ep.max_attempts());
        }

        prop_assert_eq!(delivery.attempt, calls);
        let expected = if failures < ep.max_attempts() as usize {
            DeliveryStatus::Success
        } else {
            DeliveryStatus::Failed
        };
        prop_assert_eq!(delivery.status, expected);
    }

    /// Well-formed event type names survive parsing unchanged.
    #[test]
    fn event_type_names_round_trip(name in "[a-z][a-z0-9_]{0,20}(\\.[a-z0-9_]{1,20}){1,3}") {
        let parsed = EventType::parse(&name).unwrap();
        prop_assert_eq!(parsed.as_str(), name.as_str());
    }
}
