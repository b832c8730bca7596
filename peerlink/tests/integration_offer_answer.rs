use peer_link::rtc::peer_connection::ConnectionCallback;
use peer_link::{
    ChannelEvent, ConnectionEvent, DataChannel, PeerConnection, PeerConnectionRole, RtcConfig,
};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

fn loopback() -> RtcConfig {
    RtcConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        check_timeout: Duration::from_millis(500),
        include_loopback: true,
        stun_server: None,
    }
}

fn connection(role: PeerConnectionRole) -> (PeerConnection, mpsc::Receiver<ConnectionEvent>) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let callback: ConnectionCallback = Arc::new(move |event| {
        if let Ok(tx) = tx.lock() {
            let _ = tx.send(event);
        }
    });
    (PeerConnection::new(loopback(), role, callback).unwrap(), rx)
}

fn wait_for_channel(rx: &mpsc::Receiver<ConnectionEvent>) -> DataChannel {
    let deadline = Instant::now() + Duration::from_secs(10);
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(left) {
            Ok(ConnectionEvent::ChannelOpened(channel)) => return channel,
            Ok(_) => continue,
            Err(_) => break,
        }
    }
    panic!("no data channel opened");
}

fn candidate_lines(pc: &PeerConnection) -> Vec<String> {
    pc.local_candidates()
        .unwrap()
        .iter()
        .map(|candidate| candidate.to_string())
        .collect()
}

#[test]
fn offer_answer_roundtrip_sets_descriptions() {
    let (mut offerer, _offerer_events) = connection(PeerConnectionRole::Controlling);
    let offer = offerer.create_offer().unwrap();

    let (mut answerer, _answerer_events) = connection(PeerConnectionRole::Controlled);
    let answer = answerer.process_offer(&offer).unwrap();

    offerer.set_remote_description(&answer).unwrap();

    assert!(offerer.local_description().is_some());
    assert!(offerer.remote_description().is_some());
    assert!(answerer.local_description().is_some());
    assert!(answerer.remote_description().is_some());
}

#[test]
fn candidates_before_descriptions_still_connect() {
    let (mut offerer, offerer_events) = connection(PeerConnectionRole::Controlling);
    let (mut answerer, answerer_events) = connection(PeerConnectionRole::Controlled);

    let offer = offerer.create_offer().unwrap();

    // The answerer learns the candidates before it sees the offer.
    for line in candidate_lines(&offerer) {
        answerer.add_remote_candidate(&line).unwrap();
    }
    let answer = answerer.process_offer(&offer).unwrap();

    // And the offerer learns them before the answer.
    for line in candidate_lines(&answerer) {
        offerer.add_remote_candidate(&line).unwrap();
    }
    offerer.set_remote_description(&answer).unwrap();

    let offerer_channel = wait_for_channel(&offerer_events);
    let answerer_channel = wait_for_channel(&answerer_events);
    assert!(offerer.is_connected());
    assert!(answerer.is_connected());

    let (tx, rx) = mpsc::channel();
    answerer_channel
        .start_listener(move |event| {
            let _ = tx.send(event);
        })
        .unwrap();

    offerer_channel.send("hello").unwrap();
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        ChannelEvent::Message("hello".to_string())
    );

    offerer_channel.close();
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        ChannelEvent::Closed
    );
}

#[test]
fn wrong_credentials_never_open_a_channel() {
    let (mut target, target_events) = connection(PeerConnectionRole::Controlling);
    target.create_offer().unwrap();

    let (mut stranger_offerer, _events) = connection(PeerConnectionRole::Controlling);
    let unrelated_offer = stranger_offerer.create_offer().unwrap();

    let (mut intruder, intruder_events) = connection(PeerConnectionRole::Controlled);
    intruder.process_offer(&unrelated_offer).unwrap();
    for line in candidate_lines(&target) {
        intruder.add_remote_candidate(&line).unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(15);
    let mut failed = false;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match intruder_events.recv_timeout(left) {
            Ok(ConnectionEvent::CheckFailed { candidate, .. }) => {
                assert_eq!(candidate.port, target.local_addr().port());
                failed = true;
                break;
            }
            Ok(ConnectionEvent::ChannelOpened(_)) => panic!("intruder opened a channel"),
            Ok(_) => continue,
            Err(_) => break,
        }
    }
    assert!(failed, "check against the target should fail");

    while let Ok(event) = target_events.try_recv() {
        assert!(!matches!(event, ConnectionEvent::ChannelOpened(_)));
    }
    assert!(!target.is_connected());
}
