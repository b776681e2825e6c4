//! Remote pulser against a local JSON-lines server.

use acoustic_daq::{
    core::{AcquisitionParams, Mode, Pulser},
    error::DaqError,
    instrument::remote::RemotePulser,
};
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

fn params(freq: f64) -> AcquisitionParams {
    AcquisitionParams {
        mode: Mode::Pe,
        gain_db: 30.0,
        frequency_mhz: freq,
        window_us: 20.0,
        delay_us: 5.0,
        filter_mode: "11".to_string(),
    }
}

/// Serve one connection, answering each request with the next canned reply.
async fn serve(listener: TcpListener, replies: Vec<&'static str>) -> Vec<Value> {
    let (stream, _) = listener.accept().await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut requests = Vec::new();
    for reply in replies {
        let Some(line) = lines.next_line().await.unwrap() else {
            break;
        };
        requests.push(serde_json::from_str(&line).unwrap());
        write.write_all(reply.as_bytes()).await.unwrap();
        write.write_all(b"\n").await.unwrap();
    }
    requests
}

#[tokio::test]
async fn test_acquire_round_trip_and_server_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let server = tokio::spawn(serve(
        listener,
        vec![
            r#"{"time (us)":[5.0,5.008],"amp":[0.1,-0.2],"gain":30.0}"#,
            r#"{"error":"scope did not trigger"}"#,
        ],
    ));

    let mut pulser = RemotePulser::new(address, Duration::from_secs(2));
    pulser.connect().await.unwrap();
    pulser.connect().await.unwrap();
    assert!(pulser.is_connected());

    let waveform = pulser.configure_and_acquire(&params(2.25)).await.unwrap();
    assert_eq!(waveform.amp, vec![0.1, -0.2]);
    assert_eq!(waveform.time_us, vec![5.0, 5.008]);

    let err = pulser
        .configure_and_acquire(&params(3.5))
        .await
        .unwrap_err();
    assert!(matches!(err, DaqError::Acquisition(msg) if msg == "scope did not trigger"));
    // A server-side error keeps the stream
    assert!(pulser.is_connected());

    let requests = server.await.unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0]["command"], "acquire");
    assert_eq!(requests[0]["mode"], "pe");
    assert_eq!(requests[0]["freq"], 2.25);
    assert_eq!(requests[1]["freq"], 3.5);
    assert_eq!(requests[1]["filtermode"], "11");
}

#[tokio::test]
async fn test_silent_server_times_out_and_drops_stream() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        // Hold the connection open without answering
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(stream);
    });

    let mut pulser = RemotePulser::new(address, Duration::from_millis(200));
    let err = pulser
        .configure_and_acquire(&params(1.0))
        .await
        .unwrap_err();
    assert!(matches!(err, DaqError::Acquisition(_)));
    assert!(!pulser.is_connected());

    server.abort();
}

#[tokio::test]
async fn test_reconnects_after_server_hangs_up() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let server = tokio::spawn(async move {
        // First connection: hang up without replying
        let (first, _) = listener.accept().await.unwrap();
        drop(first);
        serve(listener, vec![r#"{"time (us)":[0.0],"amp":[1.0],"gain":30.0}"#]).await
    });

    let mut pulser = RemotePulser::new(address, Duration::from_secs(2));
    assert!(pulser.configure_and_acquire(&params(1.0)).await.is_err());
    assert!(!pulser.is_connected());

    let waveform = pulser.configure_and_acquire(&params(1.0)).await.unwrap();
    assert_eq!(waveform.amp, vec![1.0]);
    assert_eq!(server.await.unwrap().len(), 1);
}
