//! Minimal diagnostic client: joins the server, steers its snake through a
//! few direction changes while printing every broadcast, then leaves.

use shared::{Direction, Packet, DEFAULT_PORT};
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Create local socket
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    // Server address, overridable as the first argument
    let server_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| format!("127.0.0.1:{}", DEFAULT_PORT))
        .parse::<SocketAddr>()?;

    // Send join request
    println!("Joining server at {}", server_addr);
    socket.send_to(&Packet::Join.encode(), server_addr).await?;

    let mut buf = [0u8; 2048];

    // Wait for the ack carrying our session id
    let (len, addr) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await??;
    println!("Received {} bytes from {}", len, addr);

    let session_id = match Packet::decode(&buf[0..len]) {
        Ok(Packet::JoinAck { session_id }) => {
            println!("Join acked with session id {}", session_id);
            session_id
        }
        Ok(other) => {
            println!("Expected JoinAck but got: {:?}", other);
            return Ok(());
        }
        Err(e) => {
            println!("Failed to decode response: {}", e);
            return Ok(());
        }
    };

    // Steer through a small square while printing broadcasts
    let directions = [
        Direction::Right,
        Direction::Down,
        Direction::Left,
        Direction::Up,
    ];

    for (i, direction) in directions.iter().cycle().take(12).enumerate() {
        let state_packet = Packet::PlayerState {
            session_id,
            direction: *direction,
            timestamp: get_timestamp(),
        };
        println!("Steering {:?}", direction);
        socket.send_to(&state_packet.encode(), server_addr).await?;

        // Drain broadcasts for half a second
        loop {
            match timeout(Duration::from_millis(500), socket.recv_from(&mut buf)).await {
                Ok(Ok((len, _))) => match Packet::decode(&buf[0..len]) {
                    Ok(Packet::GameState {
                        timestamp, players, ..
                    }) => {
                        println!(
                            "Game state update {} - time: {}, players: {}",
                            i,
                            timestamp,
                            players.len()
                        );
                        for (n, player) in players.iter().enumerate() {
                            println!(
                                "  Player {}: {:?} {:?}",
                                n, player.direction, player.segments
                            );
                        }
                        break;
                    }
                    Ok(other) => println!("Unexpected packet: {:?}", other),
                    Err(e) => println!("Failed to decode broadcast: {}", e),
                },
                Ok(Err(e)) => {
                    println!("Error receiving broadcast: {}", e);
                    break;
                }
                Err(_) => {
                    println!("No broadcast within 500ms");
                    break;
                }
            }
        }

        sleep(Duration::from_millis(500)).await;
    }

    // Leave when done
    println!("Sending leave request");
    socket
        .send_to(&Packet::Leave { session_id }.encode(), server_addr)
        .await?;

    // Broadcasts may still be in flight ahead of the ack
    for _ in 0..10 {
        let Ok(Ok((len, _))) = timeout(Duration::from_secs(1), socket.recv_from(&mut buf)).await
        else {
            break;
        };
        if let Ok(Packet::LeaveAck) = Packet::decode(&buf[0..len]) {
            println!("Leave acked");
            break;
        }
    }

    println!("Test client finished");
    Ok(())
}
