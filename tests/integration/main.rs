//! Drover integration tests.
//!
//! Every test runs against in-process mock servers bound to ephemeral
//! loopback ports; no external database is required. The mocks speak real
//! wire formats (VST 1.1 chunks, HTTP/1.1), so the full transport stack is
//! exercised end to end.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use drover::{
    retry_on_503, Agency, AgencyLock, AsyncJobConnection, Authentication, Body, ClusterConnection,
    Connection, HttpTransport, HttpTransportConfig, ReauthConnection, Request, RequestOptions,
    VstTransport, VstTransportConfig,
};
use drover_core::error;

use support::{scripted, spawn_http, spawn_vst, HttpReply};

fn http_transport(endpoint: &str) -> Arc<dyn Connection> {
    Arc::new(HttpTransport::new(endpoint, HttpTransportConfig::default()).unwrap())
}

// ══════════════════════════════════════════════════════════════════════════════
//  VST transport
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn vst_version_round_trip() {
    let server = spawn_vst(None).await;
    let transport = VstTransport::new(&server.endpoint, VstTransportConfig::default());

    let resp = transport.send(Request::get("/_api/version")).await.unwrap();
    assert_eq!(resp.status, 200);
    let value: Value = resp.deserialize().unwrap();
    assert_eq!(value["server"], "arango");
    assert_eq!(value["version"], "3.11.0");
}

#[tokio::test]
async fn vst_multi_chunk_messages_interleave_on_one_socket() {
    let server = spawn_vst(None).await;
    // Tiny chunks force every message across several chunks.
    let config = VstTransportConfig {
        max_chunk_size: 64,
        connection_limit: 1,
        ..VstTransportConfig::default()
    };
    let transport = Arc::new(VstTransport::new(&server.endpoint, config));

    let mut tasks = Vec::new();
    for i in 0..10 {
        let transport = transport.clone();
        tasks.push(tokio::spawn(async move {
            let payload = json!({"task": i, "fill": "x".repeat(200 + i)});
            let mut req = Request::post("/echo");
            req.set_body(Body::Value(payload.clone()));
            let resp = transport.send(req).await.unwrap();
            let echoed: Value = resp.deserialize().unwrap();
            assert_eq!(echoed, payload);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(server.requests.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn vst_plain_handshake_gates_requests() {
    let server = spawn_vst(Some(("root", "openSesame"))).await;
    let transport = VstTransport::new(&server.endpoint, VstTransportConfig::default());

    // Without credentials the server answers 401.
    let resp = transport.send(Request::get("/_api/version")).await.unwrap();
    assert_eq!(resp.status, 401);

    transport
        .set_authentication(Authentication::basic("root", "openSesame"))
        .await
        .unwrap();
    let resp = transport.send(Request::get("/_api/version")).await.unwrap();
    assert_eq!(resp.status, 200);
    assert!(server.authenticated.load(Ordering::SeqCst));
}

#[tokio::test]
async fn vst_connection_loss_cancels_waiters() {
    let server = spawn_vst(None).await;
    let transport = VstTransport::new(&server.endpoint, VstTransportConfig::default());

    let mut req = Request::get("/close");
    req.options.deadline = Some(Instant::now() + Duration::from_secs(5));
    let started = Instant::now();
    let err = transport.send(req).await.unwrap_err();
    assert!(error::is_deadline_exceeded(&err));
    assert!(
        started.elapsed() < Duration::from_secs(4),
        "waiter must be cancelled by connection loss, not by the timer"
    );
}

#[tokio::test]
async fn vst_sequential_requests_reuse_one_connection() {
    let server = spawn_vst(None).await;
    let transport = VstTransport::new(&server.endpoint, VstTransportConfig::default());

    for _ in 0..3 {
        let resp = transport.send(Request::get("/_api/version")).await.unwrap();
        assert_eq!(resp.status, 200);
    }
    assert_eq!(
        server.connections.load(Ordering::SeqCst),
        1,
        "an idle pooled connection must be reused"
    );
}

#[tokio::test]
async fn vst_unknown_route_maps_to_not_found() {
    let server = spawn_vst(None).await;
    let transport = VstTransport::new(&server.endpoint, VstTransportConfig::default());

    let mut req = Request::get("/_api/nope");
    req.options.allowed_status = Some(vec![200]);
    let err = transport.send(req).await.unwrap_err();
    assert!(error::is_not_found(&err));
}

// ══════════════════════════════════════════════════════════════════════════════
//  HTTP transport
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn http_sends_driver_header_and_decodes_version() {
    let server = spawn_http(Arc::new(|req| {
        HttpReply::json(
            200,
            json!({
                "server": "arango",
                "version": "3.11.0",
                "driver": req.header("x-arango-driver"),
                "accept": req.header("accept"),
            }),
        )
    }))
    .await;

    let transport = http_transport(&server.endpoint);
    let resp = transport.send(Request::get("/_api/version")).await.unwrap();
    let value: Value = resp.deserialize().unwrap();
    assert!(value["driver"]
        .as_str()
        .unwrap()
        .starts_with("drover/"));
    assert_eq!(value["accept"], "application/json");
}

#[tokio::test]
async fn http_basic_credentials_become_authorization_header() {
    let server = spawn_http(Arc::new(|req| {
        HttpReply::json(200, json!({"auth": req.header("authorization")}))
    }))
    .await;

    let transport = http_transport(&server.endpoint);
    transport
        .set_authentication(Authentication::basic("root", "openSesame"))
        .await
        .unwrap();
    let resp = transport.send(Request::get("/x")).await.unwrap();
    let value: Value = resp.deserialize().unwrap();
    assert_eq!(value["auth"], "Basic cm9vdDpvcGVuU2VzYW1l");
}

#[tokio::test]
async fn http_retry_wrapper_rides_out_503s() {
    let server = spawn_http(scripted(vec![
        HttpReply::empty(503),
        HttpReply::empty(503),
        HttpReply::json(200, json!({"server": "arango", "version": "3.11.0"})),
    ]))
    .await;

    let conn = retry_on_503(http_transport(&server.endpoint), 5);
    let resp = conn.send(Request::get("/_api/version")).await.unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(server.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn http_async_job_submit_then_poll() {
    let server = spawn_http(scripted(vec![
        HttpReply::empty(202).with_header("x-arango-async-id", "job-7"),
        HttpReply::empty(204),
        HttpReply::json(200, json!({"server": "arango", "version": "3.11.0"})),
    ]))
    .await;

    let conn = AsyncJobConnection::new(http_transport(&server.endpoint));

    // Submit: accepted, result not yet available.
    let mut submit = Request::post("/_admin/execute");
    submit.options.async_submit = true;
    let err = conn.send(submit).await.unwrap_err();
    let id = error::job_in_progress_id(&err).unwrap().to_string();
    assert_eq!(id, "job-7");

    // First poll: still running.
    let mut poll = Request::get("/_admin/execute");
    poll.options.async_id = Some(id.clone());
    let err = conn.send(poll.clone()).await.unwrap_err();
    assert_eq!(error::job_in_progress_id(&err), Some(id.as_str()));

    // Second poll: done, result forwarded.
    let resp = conn.send(poll).await.unwrap();
    assert_eq!(resp.status, 200);
    let value: Value = resp.deserialize().unwrap();
    assert_eq!(value["version"], "3.11.0");
}

#[tokio::test]
async fn http_reauth_refreshes_once_and_retries() {
    let refreshes = Arc::new(AtomicUsize::new(0));
    let server = spawn_http(Arc::new(|req| {
        match req.header("authorization") {
            Some("Bearer fresh-token") => HttpReply::json(200, json!({"ok": true})),
            _ => HttpReply::empty(401),
        }
    }))
    .await;

    let transport = http_transport(&server.endpoint);
    let counted = refreshes.clone();
    let conn = ReauthConnection::new(
        transport,
        Arc::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(Authentication::bearer("fresh-token")) })
        }),
    );

    let resp = conn.send(Request::get("/_api/version")).await.unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn http_gzip_request_bodies_are_decompressable() {
    use std::io::Read;

    let server = spawn_http(Arc::new(|req| {
        assert_eq!(req.header("content-encoding"), Some("gzip"));
        let mut decoder = flate2::read::GzDecoder::new(&req.body[..]);
        let mut decoded = Vec::new();
        decoder.read_to_end(&mut decoded).unwrap();
        HttpReply::json(200, serde_json::from_slice(&decoded).unwrap())
    }))
    .await;

    let config = HttpTransportConfig {
        compression: Some(drover_http::Compression::Gzip),
        ..HttpTransportConfig::default()
    };
    let transport = HttpTransport::new(&server.endpoint, config).unwrap();

    let payload = json!({"doc": "z".repeat(1000)});
    let mut req = Request::post("/_api/document/test");
    req.set_body(Body::Value(payload.clone()));
    let resp = transport.send(req).await.unwrap();
    let echoed: Value = resp.deserialize().unwrap();
    assert_eq!(echoed, payload);
}

#[tokio::test]
async fn http_status_whitelist_decodes_server_errors() {
    let server = spawn_http(scripted(vec![HttpReply::json(
        404,
        json!({"error": true, "code": 404, "errorNum": 1202,
               "errorMessage": "document not found"}),
    )]))
    .await;

    let transport = http_transport(&server.endpoint);
    let mut req = Request::get("/_api/document/test/missing");
    req.options.allowed_status = Some(vec![200]);
    let err = transport.send(req).await.unwrap_err();
    assert!(error::is_not_found(&err));
}

// ══════════════════════════════════════════════════════════════════════════════
//  Cluster failover
// ══════════════════════════════════════════════════════════════════════════════

/// An endpoint that refuses connections: bind, record the port, drop.
async fn dead_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    endpoint
}

#[tokio::test]
async fn cluster_fails_over_past_a_dead_server() {
    let dead = dead_endpoint().await;
    let live = spawn_http(scripted(vec![HttpReply::json(
        200,
        json!({"server": "arango", "version": "3.11.0"}),
    )]))
    .await;

    let cluster = ClusterConnection::new(vec![
        http_transport(&dead),
        http_transport(&live.endpoint),
    ])
    .unwrap();

    let resp = cluster.send(Request::get("/_api/version")).await.unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.endpoint, live.endpoint);
}

#[tokio::test]
async fn cluster_treats_server_rejection_as_final() {
    let first = spawn_http(scripted(vec![HttpReply::json(
        404,
        json!({"error": true, "code": 404, "errorNum": 1202, "errorMessage": "gone"}),
    )]))
    .await;
    let second = spawn_http(scripted(vec![HttpReply::json(200, json!({}))])).await;

    let cluster = ClusterConnection::new(vec![
        http_transport(&first.endpoint),
        http_transport(&second.endpoint),
    ])
    .unwrap();

    let mut req = Request::get("/_api/document/c/k");
    req.options.allowed_status = Some(vec![200]);
    let err = cluster.send(req).await.unwrap_err();
    assert!(error::is_not_found(&err));
    assert_eq!(second.hits.load(Ordering::SeqCst), 0, "404 must not fail over");
}

// ══════════════════════════════════════════════════════════════════════════════
//  Agency
// ══════════════════════════════════════════════════════════════════════════════

/// Mock agency over HTTP: an in-memory KV honoring `oldEmpty`/`old`.
async fn spawn_agency() -> support::MockHttp {
    let store: Arc<Mutex<std::collections::HashMap<String, Value>>> = Arc::default();
    spawn_http(Arc::new(move |req| {
        assert_eq!(req.path, "/_api/agency/write");
        let body = req.json();
        let txn = &body[0];
        let (updates, conditions) = (&txn[0], &txn[1]);

        let mut store = store.lock().unwrap();
        let mut holds = true;
        for (key, condition) in conditions.as_object().unwrap() {
            for (name, expected) in condition.as_object().unwrap() {
                let current = store.get(key);
                holds &= match name.as_str() {
                    "oldEmpty" => current.is_none() == expected.as_bool().unwrap(),
                    "old" => current == Some(expected),
                    _ => false,
                };
            }
        }
        let result = if holds {
            for (key, op) in updates.as_object().unwrap() {
                match op["op"].as_str().unwrap() {
                    "set" => {
                        store.insert(key.clone(), op["new"].clone());
                    }
                    "delete" => {
                        store.remove(key);
                    }
                    _ => {}
                }
            }
            1
        } else {
            0
        };
        HttpReply::json(200, json!({"results": [result]}))
    }))
    .await
}

#[tokio::test]
async fn agency_lock_contention_over_http() {
    let server = spawn_agency().await;
    let agency = Agency::new(http_transport(&server.endpoint));

    let first = AgencyLock::new(
        agency.clone(),
        vec!["arango".into(), "Target".into(), "Lock".into()],
        Duration::from_secs(5),
        Some("holder-1".into()),
    )
    .unwrap();
    let second = AgencyLock::new(
        agency,
        vec!["arango".into(), "Target".into(), "Lock".into()],
        Duration::from_secs(5),
        Some("holder-2".into()),
    )
    .unwrap();

    first.lock().await.unwrap();
    assert!(error::is_already_locked(
        &second.lock().await.unwrap_err()
    ));

    first.unlock().await.unwrap();
    second.lock().await.unwrap();
    second.unlock().await.unwrap();
}

#[tokio::test]
async fn agents_health_classifies_leader_and_followers() {
    let leader = spawn_http(scripted(vec![HttpReply::json(200, json!([{}]))])).await;
    let leader_endpoint = leader.endpoint.clone();
    let follower = spawn_http(Arc::new(move |_req| {
        HttpReply::empty(307).with_header(
            "location",
            &format!("{leader_endpoint}/_api/agency/read"),
        )
    }))
    .await;

    let agents: Vec<Arc<dyn Connection>> = vec![
        http_transport(&leader.endpoint),
        http_transport(&follower.endpoint),
    ];
    drover::are_agents_healthy(&agents, &RequestOptions::default())
        .await
        .unwrap();
}

// ══════════════════════════════════════════════════════════════════════════════
//  Full stack via the builder
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn builder_stack_serves_version_with_auth_and_retry() {
    let server = spawn_http(Arc::new(|req| {
        if req.header("authorization") != Some("Basic cm9vdDpwdw==") {
            return HttpReply::empty(401);
        }
        HttpReply::json(200, json!({"server": "arango", "version": "3.11.0"}))
    }))
    .await;

    let client = drover::ClientBuilder::new(vec![server.endpoint.clone()])
        .authentication(Authentication::basic("root", "pw"))
        .retry_on_503(2)
        .build()
        .await
        .unwrap();

    let info = client.version().await.unwrap();
    assert_eq!(info.server, "arango");
    assert_eq!(info.version, "3.11.0");
}
