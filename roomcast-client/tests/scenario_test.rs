//! Two peers sharing a room, end to end

mod common;

use wiremock::MockServer;

use common::*;
use roomcast_client::{CameraStream, Direction, MediaTag, PeerId, SessionPhase};

#[tokio::test]
async fn test_publish_watch_and_depart() {
    let server = MockServer::start().await;
    send_track_mock("cam-video").mount(&server).await;
    send_track_mock("cam-audio").mount(&server).await;
    recv_track_mock("alice", "cam-video", "video").mount(&server).await;
    sync_mock(sync_body(
        &[
            ("alice", 100, vec!["cam-video", "cam-audio"]),
            ("bob", 200, vec![]),
        ],
        Some("alice"),
    ))
    .up_to_n_times(1)
    .mount(&server)
    .await;
    sync_mock(sync_body(&[("bob", 200, vec![])], None))
        .mount(&server)
        .await;
    mount_room(&server).await;

    let alice_engine = FakeEngine::new();
    let bob_engine = FakeEngine::new();
    let alice = session_for(&server, "alice", alice_engine.clone());
    let bob = session_for(&server, "bob", bob_engine.clone());

    // Alice publishes her camera
    let published = alice
        .publish_camera(CameraStream {
            video: Some(video_track()),
            audio: Some(audio_track()),
        })
        .await
        .unwrap();
    assert_eq!(published.len(), 2);
    assert_eq!(alice_engine.transport_count(), 1);

    // Bob sees both of her tracks
    bob.join().await.unwrap();
    bob.sync().await.unwrap();
    let streams: Vec<(String, String)> = bob
        .peer_streams()
        .into_iter()
        .map(|s| (s.peer_id.to_string(), s.media_tag.to_string()))
        .collect();
    assert_eq!(
        streams,
        vec![
            ("alice".to_string(), "cam-audio".to_string()),
            ("alice".to_string(), "cam-video".to_string()),
        ]
    );

    // Bob watches her video; resume happens only once the transport is up
    let consumer = bob
        .subscribe(PeerId::from("alice"), MediaTag::cam_video())
        .await
        .unwrap();
    assert!(!consumer.is_paused());
    assert!(bob.transport(Direction::Recv).is_some());
    assert!(bob.transport(Direction::Send).is_none());

    let log = request_log(&server).await;
    let connect_at = log.iter().position(|e| e == "connect-transport").unwrap();
    let resume_at = log.iter().position(|e| e == "resume-consumer").unwrap();
    assert!(connect_at < resume_at);

    // Alice leaves; Bob's next sync retires what he was watching
    assert!(alice.leave().await.is_done());
    assert_eq!(alice.phase(), SessionPhase::Idle);
    assert!(published.iter().all(|p| p.is_closed()));

    let report = bob.sync().await.unwrap();
    assert_eq!(report.departed, vec![PeerId::from("alice")]);
    assert!(consumer.is_closed());
    assert!(bob.consumers().is_empty());
    assert!(bob.peer_streams().is_empty());
    assert!(bob.active_speaker().and_then(|s| s.peer_id).is_none());
    assert!(bob.is_joined());
}
