use std::time::Duration;

use horde_video::{
    ArtifactLocation, ClientBuilder, HordeVideoError, HttpTransport, JobDescriptor, JobId, PollPolicy,
    RemoteState, Resolution, Transport,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport(server: &MockServer) -> HttpTransport {
    HttpTransport::new(server.uri(), "test-key", Duration::from_secs(5)).unwrap()
}

fn job() -> JobDescriptor {
    JobDescriptor::text_to_video("a red kite over dunes")
        .with_duration(4.0)
        .with_fps(24)
        .with_resolution(Resolution::HD_1024_576)
        .with_seed(42)
}

#[tokio::test]
async fn submit_sends_key_and_params() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/generate/video/async"))
        .and(header("apikey", "test-key"))
        .and(body_partial_json(json!({
            "prompt": "a red kite over dunes",
            "model": "stable-video-diffusion-1.1",
            "seed": 42,
            "params": {
                "duration": 4.0,
                "fps": 24,
                "resolution": "1024x576",
                "frame_count": 96
            }
        })))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "id": "abc123",
            "kudos": 40.0,
            "warnings": ["NoAvailableWorker"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let id = transport(&server).submit(&job()).await.unwrap();
    assert_eq!(id, JobId::from("abc123"));
}

#[tokio::test]
async fn status_maps_queue_and_partials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/generate/video/status/q1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "waiting": 1, "queue_position": 14, "wait_time": 300, "is_possible": true
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/generate/video/status/p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "processing": 1,
            "partial_generations": [
                {"id": "frame_ref_1", "video_url": "https://r2.example/f1.webp"}
            ]
        })))
        .mount(&server)
        .await;

    let t = transport(&server);

    let queued = t.status(&JobId::from("q1")).await.unwrap();
    assert_eq!(queued.state, RemoteState::Queued);
    assert_eq!(queued.queue_position, Some(14));
    assert_eq!(queued.estimated_wait, Duration::from_secs(300));

    let partial = t.status(&JobId::from("p1")).await.unwrap();
    assert_eq!(partial.state, RemoteState::Partial);
    assert_eq!(partial.partials.len(), 1);
    assert_eq!(partial.partials[0].id, "frame_ref_1");
}

#[tokio::test]
async fn done_status_carries_final_artifacts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/generate/video/status/d1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "done": true,
            "generations": [
                {
                    "id": "video_ref",
                    "video_url": "https://r2.example/video.mp4",
                    "worker_name": "rig-7",
                    "model": "animatediff-v3",
                    "seed": 7
                },
                {"id": "inline_ref", "video_base64": "AAAA"},
                {"id": "empty_ref"}
            ]
        })))
        .mount(&server)
        .await;

    let snap = transport(&server).status(&JobId::from("d1")).await.unwrap();
    assert_eq!(snap.state, RemoteState::Done);
    assert_eq!(snap.finals.len(), 2);
    assert_eq!(
        snap.finals[0].location,
        ArtifactLocation::Url("https://r2.example/video.mp4".into())
    );
    assert_eq!(snap.finals[0].worker_name.as_deref(), Some("rig-7"));
    assert_eq!(snap.finals[1].location, ArtifactLocation::Inline("AAAA".into()));
}

#[tokio::test]
async fn error_statuses_map_to_taxonomy() {
    let server = MockServer::start().await;
    Mock::given(path("/v2/generate/video/status/missing"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"message": "Request not found"})),
        )
        .mount(&server)
        .await;
    Mock::given(path("/v2/generate/video/status/locked"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "Invalid API Key"})))
        .mount(&server)
        .await;
    Mock::given(path("/v2/generate/video/status/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;
    Mock::given(path("/v2/generate/video/status/busy"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "7")
                .set_body_json(json!({"message": "Too many requests"})),
        )
        .mount(&server)
        .await;

    let t = transport(&server);

    match t.status(&JobId::from("missing")).await.unwrap_err() {
        HordeVideoError::NotFound { message } => assert_eq!(message, "Request not found"),
        other => panic!("expected NotFound, got {other:?}"),
    }

    let err = t.status(&JobId::from("locked")).await.unwrap_err();
    assert!(matches!(err, HordeVideoError::Authentication { .. }));
    assert!(!err.is_transient());

    match t.status(&JobId::from("broken")).await.unwrap_err() {
        err @ HordeVideoError::Api { status_code: 500, .. } => {
            assert!(err.is_transient());
            assert!(err.to_string().contains("upstream exploded"));
        }
        other => panic!("expected Api 500, got {other:?}"),
    }

    match t.status(&JobId::from("busy")).await.unwrap_err() {
        HordeVideoError::RateLimit { retry_after, .. } => assert_eq!(retry_after, Some(7.0)),
        other => panic!("expected RateLimit, got {other:?}"),
    }
}

#[tokio::test]
async fn rejected_submission_is_invalid_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/generate/video/async"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"message": "Input payload validation failed"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = ClientBuilder::new()
        .base_url(server.uri())
        .api_key("test-key")
        .build()
        .unwrap();
    let err = client.submit(&job()).await.unwrap_err();
    assert!(matches!(err, HordeVideoError::InvalidRequest { .. }));
    assert!(client.registry().is_empty().await);
}

#[tokio::test]
async fn unreachable_host_is_resubmit_safe() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let t = HttpTransport::new(format!("http://{addr}"), "k", Duration::from_secs(2)).unwrap();

    let err = t.submit(&job()).await.unwrap_err();
    assert!(matches!(err, HordeVideoError::Unreachable { .. }), "{err:?}");
    assert!(err.is_resubmit_safe());
}

#[tokio::test]
async fn cancel_and_models() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v2/generate/video/status/abc123"))
        .and(header("apikey", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": false, "faulted": false})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/status/video/models"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"models": ["animatediff-v3", "cogvideox-5b"]})),
        )
        .mount(&server)
        .await;

    let t = transport(&server);
    t.cancel(&JobId::from("abc123")).await.unwrap();
    assert_eq!(t.models().await.unwrap(), vec!["animatediff-v3", "cogvideox-5b"]);
}

#[tokio::test]
async fn client_tracks_job_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/generate/video/async"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"id": "e2e"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/generate/video/status/e2e"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"waiting": 1, "queue_position": 2})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/generate/video/status/e2e"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "processing": 1,
            "partial_generations": [{"id": "frame_ref_1", "video_url": "https://r2.example/f1.webp"}]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/generate/video/status/e2e"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "done": true,
            "generations": [{"id": "video_ref", "video_url": "https://r2.example/video.mp4"}]
        })))
        .mount(&server)
        .await;

    let client = ClientBuilder::new()
        .base_url(server.uri())
        .api_key("test-key")
        .poll_policy(PollPolicy {
            min_interval: Duration::from_millis(20),
            max_interval: Duration::from_millis(100),
            retry_base_delay: Duration::from_millis(10),
            ..PollPolicy::default()
        })
        .build()
        .unwrap();

    let mut partials = Vec::new();
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        client.generate(&job(), |p| partials.push(p.id.clone())),
    )
    .await
    .expect("job finished in time")
    .unwrap();

    assert_eq!(partials, vec!["frame_ref_1"]);
    assert_eq!(result.artifacts.len(), 1);
    assert_eq!(result.artifacts[0].id, "video_ref");
    assert_eq!(result.job_id, JobId::from("e2e"));
}
