//! End-to-end relay against a loopback econ server.

use econ_relay_core::{
    resolve_target, CancelSignal, Command, EconConnection, RelayError, RelayPipeline, Rejection,
    SubmitOutcome,
};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

async fn spawn_econ_server(password: &'static str) -> (String, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (tx, rx) = mpsc::channel(128);
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        write_half.write_all(b"Enter password:\n").await.unwrap();
        let given = lines.next_line().await.unwrap().unwrap_or_default();
        if given != password {
            let _ = write_half.write_all(b"Wrong password 1/3.\n").await;
            return;
        }
        write_half
            .write_all(b"Authentication successful. External console access granted.\n")
            .await
            .unwrap();
        while let Ok(Some(line)) = lines.next_line().await {
            let _ = write_half
                .write_all(format!("[server]: executed {line}\n").as_bytes())
                .await;
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
    (addr, rx)
}

#[tokio::test]
async fn relays_accepted_commands_in_order() {
    let (addr, mut received) = spawn_econ_server("secret").await;
    let signal = CancelSignal::new();
    let target = resolve_target(&addr).await.unwrap();
    let conn = EconConnection::connect(&target, "secret", Duration::from_secs(5), signal.clone())
        .await
        .unwrap();
    let pipeline = RelayPipeline::spawn(conn, 64, signal);
    let gateway = pipeline.gateway();

    let commands: Vec<String> = (0..20).map(|i| format!("say message {i}")).collect();
    for command in &commands {
        assert_eq!(
            gateway.submit(Command::new(command.clone()).unwrap()),
            SubmitOutcome::Accepted
        );
    }

    let mut seen = Vec::new();
    while seen.len() < commands.len() {
        let line = tokio::time::timeout(Duration::from_secs(5), received.recv())
            .await
            .expect("server should receive every command")
            .expect("server closed early");
        seen.push(line);
    }
    assert_eq!(seen, commands);

    let report = pipeline.shutdown().await.unwrap();
    assert_eq!(report.written, 20);
    assert_eq!(report.failed, 0);

    assert_eq!(
        gateway.submit(Command::new("status").unwrap()),
        SubmitOutcome::Rejected(Rejection::ShuttingDown)
    );
}

#[tokio::test]
async fn wrong_password_never_starts_relay() {
    let (addr, _received) = spawn_econ_server("secret").await;
    let target = resolve_target(&addr).await.unwrap();
    let signal = CancelSignal::new();
    let err = EconConnection::connect(&target, "nope", Duration::from_secs(5), signal)
        .await
        .err()
        .expect("authentication must fail");
    assert!(matches!(err, RelayError::Auth(_)));
}

#[tokio::test]
async fn shutdown_while_idle_closes_remote_side() {
    let (addr, mut received) = spawn_econ_server("secret").await;
    let signal = CancelSignal::new();
    let target = resolve_target(&addr).await.unwrap();
    let conn = EconConnection::connect(&target, "secret", Duration::from_secs(5), signal.clone())
        .await
        .unwrap();
    let pipeline = RelayPipeline::spawn(conn, 4, signal);
    pipeline.shutdown().await.unwrap();

    let next = tokio::time::timeout(Duration::from_secs(5), received.recv())
        .await
        .expect("server should observe the close");
    assert!(next.is_none());
}
