//! End-to-end delivery tests against real HTTP receivers.
//!
//! The engine uses the production `reqwest` client and posts to `wiremock`
//! servers; only time is simulated, so retry schedules play out instantly.

#![allow(clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use medhook_core::{
    storage::memory::MemoryStore, DeliveryId, DeliveryStatus, EventCatalog, TenantId, TestClock,
    WebhookDelivery,
};
use medhook_delivery::{
    client::{
        HEADER_DELIVERY_ATTEMPT, HEADER_DELIVERY_ID, HEADER_EVENT_ID, HEADER_EVENT_TYPE,
        HEADER_SIGNATURE, HEADER_TIMESTAMP,
    },
    signing, DeliveryConfig, DeliveryEngine, RetryPolicy,
};
use medhook_testing::EndpointBuilder;
use serde_json::{json, Value};
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

struct Harness {
    engine: DeliveryEngine,
    clock: TestClock,
    tenant: TenantId,
}

impl Harness {
    fn new() -> Self {
        let clock = TestClock::new();
        let config = DeliveryConfig {
            retry_policy: RetryPolicy { jitter_factor: 0.0, ..RetryPolicy::default() },
            ..DeliveryConfig::default()
        };
        let engine = DeliveryEngine::new(
            Arc::new(MemoryStore::new()),
            EventCatalog::default(),
            config,
            Arc::new(clock.clone()),
        )
        .unwrap();
        Self { engine, clock, tenant: TenantId::new() }
    }

    async fn delivery(&self, id: DeliveryId) -> WebhookDelivery {
        self.engine.get_delivery(self.tenant, id).await.unwrap()
    }

    async fn settle(&self, id: DeliveryId) -> WebhookDelivery {
        for _ in 0..16 {
            self.engine.run_pending().await.unwrap();
            let delivery = self.delivery(id).await;
            match delivery.next_retry_at {
                Some(at) if delivery.status == DeliveryStatus::Retrying => {
                    self.clock.jump_to(at.into());
                },
                _ => return delivery,
            }
        }
        panic!("delivery {id} did not settle");
    }
}

fn receiver(server: &MockServer) -> EndpointBuilder {
    EndpointBuilder::with_defaults().url(format!("{}/hooks", server.uri()))
}

#[tokio::test]
async fn receiver_gets_signed_payload_with_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let endpoint =
        harness.engine.create_endpoint(harness.tenant, receiver(&server).build()).await.unwrap();
    let submitted = harness
        .engine
        .submit_event(
            harness.tenant,
            "billing.created",
            json!({"invoice": "INV-42", "amount": 120}),
        )
        .await
        .unwrap();
    let delivery = harness.settle(submitted.deliveries[0]).await;

    assert_eq!(delivery.status, DeliveryStatus::Success);
    assert_eq!(delivery.response_body.as_deref(), Some("ok"));

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    let header_value =
        |name: &str| request.headers.get(name).unwrap().to_str().unwrap().to_string();

    assert_eq!(request.body, delivery.payload.as_bytes());
    assert!(signing::verify(&endpoint.secret, &request.body, &header_value(HEADER_SIGNATURE)));
    assert_eq!(header_value(HEADER_EVENT_ID), submitted.event_id.to_string());
    assert_eq!(header_value(HEADER_EVENT_TYPE), "billing.created");
    assert_eq!(header_value(HEADER_DELIVERY_ID), delivery.id.to_string());
    assert_eq!(header_value(HEADER_DELIVERY_ATTEMPT), "1");
    assert!(!header_value(HEADER_TIMESTAMP).is_empty());

    let body: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["eventId"], submitted.event_id.to_string());
    assert_eq!(body["tenantId"], harness.tenant.to_string());
    assert_eq!(body["data"]["invoice"], "INV-42");
}

#[tokio::test]
async fn two_failures_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

    let harness = Harness::new();
    let endpoint =
        harness.engine.create_endpoint(harness.tenant, receiver(&server).build()).await.unwrap();
    let submitted =
        harness.engine.submit_event(harness.tenant, "billing.created", json!({})).await.unwrap();
    let delivery = harness.settle(submitted.deliveries[0]).await;

    assert_eq!(delivery.status, DeliveryStatus::Success);
    assert_eq!(delivery.attempt, 3);
    assert_eq!(delivery.http_status, Some(200));
    assert!(delivery.error_message.is_none());

    let endpoint = harness.engine.get_endpoint(harness.tenant, endpoint.id).await.unwrap();
    assert_eq!(endpoint.failure_count, 0);

    let attempts: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.headers.get(HEADER_DELIVERY_ATTEMPT).unwrap().to_str().unwrap().to_string())
        .collect();
    assert_eq!(attempts, ["1", "2", "3"]);
}

#[tokio::test]
async fn redirects_count_as_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("location", "https://elsewhere.example.com"),
        )
        .mount(&server)
        .await;

    let harness = Harness::new();
    harness
        .engine
        .create_endpoint(harness.tenant, receiver(&server).retry_count(0).build())
        .await
        .unwrap();
    let submitted =
        harness.engine.submit_event(harness.tenant, "billing.created", json!({})).await.unwrap();
    let delivery = harness.settle(submitted.deliveries[0]).await;

    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert_eq!(delivery.http_status, Some(302));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn large_responses_are_truncated_on_the_ledger() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(10_000)))
        .mount(&server)
        .await;

    let harness = Harness::new();
    harness.engine.create_endpoint(harness.tenant, receiver(&server).build()).await.unwrap();
    let submitted =
        harness.engine.submit_event(harness.tenant, "billing.created", json!({})).await.unwrap();
    let delivery = harness.settle(submitted.deliveries[0]).await;

    let body = delivery.response_body.unwrap();
    let suffix = "... (truncated)";
    assert_eq!(body.len(), 4096);
    assert!(body.starts_with(&"x".repeat(4096 - suffix.len())));
    assert!(body.ends_with(suffix));
}

#[tokio::test]
async fn test_event_mirrors_a_regular_delivery() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(204)).mount(&server).await;

    let harness = Harness::new();
    let endpoint =
        harness.engine.create_endpoint(harness.tenant, receiver(&server).build()).await.unwrap();

    harness
        .engine
        .submit_event(harness.tenant, "billing.created", json!({"invoice": "INV-1"}))
        .await
        .unwrap();
    harness.engine.send_test_event(harness.tenant, endpoint.id).await.unwrap();
    harness.engine.run_pending().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);

    let bodies: Vec<Value> =
        requests.iter().map(|r| serde_json::from_slice(&r.body).unwrap()).collect();
    let regular = bodies.iter().find(|b| b["eventType"] == "billing.created").unwrap();
    let test = bodies.iter().find(|b| b["eventType"] == "webhook.test").unwrap();

    let keys = |v: &Value| {
        let mut keys: Vec<String> = v.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    };
    assert_eq!(keys(regular), keys(test));
    assert_eq!(test["data"]["test"], true);
    assert_eq!(test["data"]["endpointId"], endpoint.id.to_string());

    for request in &requests {
        let signature = request.headers.get(HEADER_SIGNATURE).unwrap().to_str().unwrap();
        assert!(signing::verify(&endpoint.secret, &request.body, signature));
    }
}

#[tokio::test]
async fn matching_is_repeatable_and_tenant_scoped() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

    let harness = Harness::new();
    let other_tenant = TenantId::new();
    for _ in 0..2 {
        harness.engine.create_endpoint(harness.tenant, receiver(&server).build()).await.unwrap();
    }
    harness.engine.create_endpoint(other_tenant, receiver(&server).build()).await.unwrap();
    harness
        .engine
        .create_endpoint(
            harness.tenant,
            receiver(&server).event_types(["lab.result_ready"]).build(),
        )
        .await
        .unwrap();

    let first =
        harness.engine.submit_event(harness.tenant, "billing.created", json!({})).await.unwrap();
    let second =
        harness.engine.submit_event(harness.tenant, "billing.created", json!({})).await.unwrap();
    let none =
        harness.engine.submit_event(harness.tenant, "patient.discharged", json!({})).await.unwrap();

    assert_eq!(first.deliveries.len(), 2);
    assert_eq!(second.deliveries.len(), 2);
    assert_ne!(first.event_id, second.event_id);
    assert!(none.deliveries.is_empty());

    assert_eq!(harness.engine.run_pending().await.unwrap(), 4);
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
}

#[tokio::test]
async fn abandoned_redelivery_still_records_its_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    let harness = Harness::new();
    harness.engine.create_endpoint(harness.tenant, receiver(&server).build()).await.unwrap();
    let submitted =
        harness.engine.submit_event(harness.tenant, "billing.created", json!({})).await.unwrap();
    let id = submitted.deliveries[0];

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        harness.engine.redeliver_now(harness.tenant, id),
    )
    .await;
    assert!(abandoned.is_err());

    let mut delivery = harness.delivery(id).await;
    for _ in 0..40 {
        if delivery.status == DeliveryStatus::Success {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        delivery = harness.delivery(id).await;
    }

    assert_eq!(delivery.status, DeliveryStatus::Success);
    assert_eq!(delivery.attempt, 1);
    assert_eq!(harness.engine.stats().await.in_flight_deliveries, 0);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}
